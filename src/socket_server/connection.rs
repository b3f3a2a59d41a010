//! WebSocket connection handler
//!
//! One task per connection owns all of that connection's state: the
//! middleware-injected params and the map of open channels. Service calls run
//! on their own tasks and report back to the owning task through an internal
//! queue, so concurrent calls on one connection interleave freely while the
//! connection state is only ever touched from one place.
//!
//! The queue is bounded by `ServerConfig::outbound_capacity`. Finished calls wait
//! for room; channel events that find it full are dropped and logged, so a slow
//! client cannot grow server memory without limit.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

use crate::channel::{ChannelEnd, ChannelId, ListenerId};
use crate::error::RpcError;
use crate::params::{Params, Reply};
use crate::socket_server::protocol::{Envelope, Request, CLOSE};
use crate::socket_server::server::{Handshake, ServerShared};

/// Connection state visible to the authorizer's caller and to middleware.
///
/// Middleware receives it by value once per connection and hands it back;
/// whatever it leaves in `params` is merged into every call on the connection,
/// overwriting caller-supplied keys of the same name.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Unique id generated when the connection was accepted
    pub id: String,
    /// Identity produced by the authorizer, if one is configured
    pub user: Option<Value>,
    /// Params injected into every call on this connection
    pub params: Map<String, Value>,
    /// Details of the WebSocket handshake
    pub handshake: Handshake,
}

/// Work reported back to the connection task
enum Outbound {
    /// An event forwarded from an open channel
    Event(Envelope),
    /// A service call finished
    Completed {
        id: String,
        route: String,
        result: Result<Reply, RpcError>,
    },
}

/// Outcome of the authorizer and middleware for a new connection
enum Admission {
    /// Messages are routed
    Active,
    /// Middleware failed: the transport stays open but messages are ignored
    Inert,
    /// The authorizer refused the connection and it has been closed
    Refused,
}

/// A channel registered on this connection
struct OpenChannel {
    end: ChannelEnd,
    forwarder: ListenerId,
}

/// Drive a single upgraded WebSocket until the peer goes away
pub(crate) async fn run_connection<S>(
    ws: WebSocketStream<S>,
    handshake: Handshake,
    shared: Arc<ServerShared>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut conn = ConnectionState::new(ws, handshake, shared);
    tracing::info!(
        "Connection {} opened from {:?}",
        conn.context.id,
        conn.context.handshake.peer
    );

    match conn.admit().await {
        Admission::Active => conn.run().await,
        Admission::Inert => conn.run_inert().await,
        Admission::Refused => {}
    }

    conn.cleanup();
    tracing::info!("Connection {} closed", conn.context.id);
}

/// State for a single connection
struct ConnectionState<S> {
    ws: WebSocketStream<S>,
    shared: Arc<ServerShared>,
    context: ConnectionContext,
    channels: HashMap<ChannelId, OpenChannel>,
    tx: mpsc::Sender<Outbound>,
    rx: mpsc::Receiver<Outbound>,
}

impl<S> ConnectionState<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(ws: WebSocketStream<S>, handshake: Handshake, shared: Arc<ServerShared>) -> Self {
        let id = format!("conn_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let (tx, rx) = mpsc::channel(shared.config.outbound_capacity.max(1));
        Self {
            ws,
            shared,
            context: ConnectionContext {
                id,
                user: None,
                params: Map::new(),
                handshake,
            },
            channels: HashMap::new(),
            tx,
            rx,
        }
    }

    /// Run the authorizer and then the middleware chain
    async fn admit(&mut self) -> Admission {
        if let Some(authorize) = self.shared.authorizer.clone() {
            match authorize(self.context.handshake.clone()).await {
                Ok(user) => self.context.user = Some(user),
                Err(e) => {
                    tracing::warn!("Connection {} failed authorization: {}", self.context.id, e);
                    self.send(Envelope::error(None, &e)).await;
                    let _ = self.ws.close(None).await;
                    return Admission::Refused;
                }
            }
        }

        match self.shared.middleware.run(self.context.clone()).await {
            Ok(context) => {
                self.context = context;
                Admission::Active
            }
            Err(e) => {
                tracing::warn!("Connection {} rejected by middleware: {}", self.context.id, e);
                self.send(Envelope::error(None, &e)).await;
                Admission::Inert
            }
        }
    }

    async fn run(&mut self) {
        loop {
            tokio::select! {
                // Handle incoming WebSocket messages
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text).await,
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => self.handle_message(&text).await,
                            Err(_) => {
                                let err = RpcError::bad_request("Could not parse message data");
                                self.send(Envelope::error(None, &err)).await;
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            let _ = self.ws.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Connection {} requested close", self.context.id);
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::debug!("WebSocket error on {}: {}", self.context.id, e);
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }

                // Handle channel events and finished calls
                out = self.rx.recv() => {
                    match out {
                        Some(Outbound::Event(envelope)) => self.send(envelope).await,
                        Some(Outbound::Completed { id, route, result }) => {
                            self.complete(id, route, result).await;
                        }
                        None => break,
                    }
                }
            }
        }
    }

    /// Keep the transport open without handling messages until the peer leaves
    async fn run_inert(&mut self) {
        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(Message::Ping(data)) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    }

    /// Decode and route one inbound message
    async fn handle_message(&mut self, text: &str) {
        let incoming = match self.shared.codec.decode(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!("Undecodable message on {}: {}", self.context.id, e);
                self.send(Envelope::error(None, &e)).await;
                return;
            }
        };

        match Request::parse(incoming) {
            Ok(Request::Call {
                id,
                service,
                method,
                data,
            }) => {
                tracing::debug!("{} -> {} {} ({})", self.context.id, service, method, id);
                if let Err(e) = self.dispatch(&id, &service, &method, data) {
                    self.send(Envelope::error(Some(&id), &e)).await;
                }
            }
            Ok(Request::Channel { id, control }) => {
                tracing::debug!("{} -> channel {} {}", self.context.id, id, control.name);
                if !self.channels.contains_key(&id) {
                    let err = RpcError::not_found(format!("Unknown channel \"{}\"", id));
                    self.send(Envelope::error(Some(&id), &err)).await;
                } else if control.name == CLOSE {
                    self.close_channel(&id);
                } else if let Some(open) = self.channels.get(&id) {
                    open.end.emit(&control.name, control.data);
                }
            }
            Err(rejection) => {
                tracing::warn!("Rejected message on {}: {}", self.context.id, rejection.error);
                self.send(Envelope::error(rejection.id.as_deref(), &rejection.error))
                    .await;
            }
        }
    }

    /// Resolve a route and start the call on its own task
    fn dispatch(&self, id: &str, service: &str, method: &str, data: Value) -> Result<(), RpcError> {
        let svc = self
            .shared
            .registry
            .service(service)
            .ok_or_else(|| RpcError::bad_request(format!("Unknown service \"{}\"", service)))?;

        let wrapped = svc.method(method).ok_or_else(|| {
            RpcError::bad_request(format!("Unknown method \"{} {}\"", service, method))
        })?;

        let mut params = Params::from_value(data)?;
        params.merge(&self.context.params);
        params.connection_id = Some(self.context.id.clone());
        params.request_id = Some(id.to_string());
        params.user = self.context.user.clone();

        let tx = self.tx.clone();
        let id = id.to_string();
        let route = wrapped.route();
        tokio::spawn(async move {
            let result = wrapped.call(Some(params)).await;
            let completed = Outbound::Completed { id, route, result };
            if let Err(mpsc::error::SendError(out)) = tx.send(completed).await {
                // The connection is gone; nobody will ever close this feed
                if let Outbound::Completed {
                    result: Ok(Reply::Channel(end)),
                    ..
                } = out
                {
                    end.force_close();
                }
            }
        });

        Ok(())
    }

    /// Turn a finished call into its reply, registering any channel it produced
    async fn complete(&mut self, id: String, route: String, result: Result<Reply, RpcError>) {
        match result {
            Ok(Reply::Value(value)) => {
                let envelope = Envelope::result(&id, value, self.shared.config.result_encoding);
                self.send(envelope).await;
            }
            Ok(Reply::Channel(end)) => {
                let channel_id = end.id().to_string();
                self.open_channel(end);
                self.send(Envelope::channel_opened(&id, &channel_id)).await;
            }
            Err(e) => {
                tracing::debug!("{} failed for {}: {}", route, self.context.id, e);
                self.send(Envelope::error(Some(&id), &e)).await;
            }
        }
    }

    /// Register a channel, or attach another reference if it is already open here.
    ///
    /// A different channel reusing a registered id is closed: the subscriber is
    /// attached to the registered one and nothing would ever close the newcomer.
    fn open_channel(&mut self, end: ChannelEnd) {
        let attached = self
            .channels
            .get(end.id())
            .map(|open| (open.end.increment(), open.end.same_channel(&end)));
        match attached {
            Some((true, same)) => {
                if !same {
                    tracing::debug!(
                        "Channel {} on {} already open, closing duplicate producer",
                        end.id(),
                        self.context.id
                    );
                    end.force_close();
                }
                tracing::debug!("Channel {} on {} gained a reference", end.id(), self.context.id);
                return;
            }
            // The registered channel closed underneath us; replace it
            Some((false, _)) => self.remove_channel(end.id()),
            None => {}
        }

        if end.is_closed() {
            tracing::debug!("Channel {} was already closed, not forwarding", end.id());
            return;
        }

        let channel_id = end.id().to_string();
        let tx = self.tx.clone();
        let forward_id = channel_id.clone();
        let forwarder = end.on_any(move |event, data| {
            let envelope = Envelope::channel_event(&forward_id, event, data.clone());
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(Outbound::Event(envelope)) {
                tracing::warn!("Outbound queue full, dropped {} event on channel {}", event, forward_id);
            }
        });

        tracing::debug!("Channel {} opened on {}", channel_id, self.context.id);
        self.channels.insert(channel_id, OpenChannel { end, forwarder });
    }

    /// Detach one reference; forget the channel once it closes
    fn close_channel(&mut self, channel_id: &str) {
        let closed = match self.channels.get(channel_id) {
            Some(open) => open.end.decrement() || open.end.is_closed(),
            None => false,
        };
        if closed {
            self.remove_channel(channel_id);
        }
    }

    fn remove_channel(&mut self, channel_id: &str) {
        if let Some(open) = self.channels.remove(channel_id) {
            open.end.off(open.forwarder);
            tracing::debug!("Channel {} removed from {}", channel_id, self.context.id);
        }
    }

    /// Force-close every channel still open on this connection
    fn cleanup(&mut self) {
        // Calls still in flight will see the queue closed and close their own feeds
        self.rx.close();
        while let Ok(out) = self.rx.try_recv() {
            if let Outbound::Completed {
                result: Ok(Reply::Channel(end)),
                ..
            } = out
            {
                end.force_close();
            }
        }

        for (channel_id, open) in self.channels.drain() {
            open.end.off(open.forwarder);
            open.end.force_close();
            tracing::debug!("Channel {} torn down with {}", channel_id, self.context.id);
        }
    }

    /// Send an envelope, swallowing transport errors: a peer that cannot
    /// receive it is already gone.
    async fn send(&mut self, envelope: Envelope) {
        let text = match self.shared.codec.encode(&envelope) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode {} envelope: {}", envelope.name, e);
                return;
            }
        };
        if let Err(e) = self.ws.send(Message::Text(text)).await {
            tracing::debug!("Dropped {} envelope for {}: {}", envelope.name, self.context.id, e);
        }
    }
}
