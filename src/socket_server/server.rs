//! Server: accept loop, WebSocket handshake, and per-connection configuration

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use crate::config::ServerConfig;
use crate::error::RpcError;
use crate::hooks::{BoxFuture, Hook, HookChain};
use crate::registry::Registry;
use crate::socket_server::connection::{run_connection, ConnectionContext};
use crate::socket_server::protocol::{Codec, JsonCodec};

/// What the server learned about a client during the WebSocket handshake
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub peer: Option<SocketAddr>,
    pub path: String,
    /// Header names are lowercase; values that are not valid UTF-8 are skipped
    pub headers: HashMap<String, String>,
}

/// Decides whether a connection is admitted, yielding the caller's identity
pub type Authorizer =
    Arc<dyn Fn(Handshake) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Everything a connection task reads; immutable once serving starts
pub(crate) struct ServerShared {
    pub(crate) registry: Arc<Registry>,
    pub(crate) middleware: HookChain<ConnectionContext>,
    pub(crate) authorizer: Option<Authorizer>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) config: ServerConfig,
}

/// Builder for [`Server`]
pub struct ServerBuilder {
    registry: Arc<Registry>,
    middleware: HookChain<ConnectionContext>,
    authorizer: Option<Authorizer>,
    codec: Arc<dyn Codec>,
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Append connection middleware, run once per connection before any message
    pub fn middleware(mut self, hook: Hook<ConnectionContext>) -> Self {
        self.middleware.push(hook);
        self
    }

    /// Install an authorizer, run before middleware
    pub fn authorize<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Handshake) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.authorizer = Some(Arc::new(
            move |handshake| -> BoxFuture<'static, Result<Value, RpcError>> {
                Box::pin(f(handshake))
            },
        ));
        self
    }

    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn build(self) -> Server {
        Server {
            shared: Arc::new(ServerShared {
                registry: self.registry,
                middleware: self.middleware,
                authorizer: self.authorizer,
                codec: self.codec,
                config: self.config,
            }),
        }
    }
}

/// A configured server. Cheap to clone.
#[derive(Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Server {
    pub fn builder(registry: impl Into<Arc<Registry>>) -> ServerBuilder {
        ServerBuilder {
            registry: registry.into(),
            middleware: HookChain::new(),
            authorizer: None,
            codec: Arc::new(JsonCodec),
            config: ServerConfig::default(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Accept connections forever, one task per connection
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        tracing::info!("Switchyard listening on ws://{}", listener.local_addr()?);

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!("Accepted connection from {}", addr);
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_tcp(stream).await;
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Perform the WebSocket handshake on a raw TCP stream and serve it
    pub async fn handle_tcp(&self, stream: TcpStream) {
        let mut handshake = Handshake {
            peer: stream.peer_addr().ok(),
            ..Handshake::default()
        };

        let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            handshake.path = req.uri().path().to_string();
            for (name, value) in req.headers() {
                if let Ok(value) = value.to_str() {
                    handshake
                        .headers
                        .insert(name.as_str().to_string(), value.to_string());
                }
            }
            Ok(resp)
        };

        let ws = match accept_hdr_async(stream, capture).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::error!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        self.serve_connection(ws, handshake).await;
    }

    /// Serve an already-upgraded WebSocket until it closes
    pub async fn serve_connection<S>(&self, ws: WebSocketStream<S>, handshake: Handshake)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        run_connection(ws, handshake, Arc::clone(&self.shared)).await;
    }
}
