//! Switchyard: real-time RPC and pub/sub over persistent connections
//!
//! Applications register named services whose methods are wrapped in
//! before/after hook pipelines. A connection multiplexer exposes them over
//! WebSocket: clients send `{id, name: "<service> <method>", data}` envelopes and
//! receive results, errors, and events from reference-counted push channels,
//! all interleaved on one connection.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use switchyard::{Method, Params, Registry, Server};
//!
//! let mut registry = Registry::new();
//! registry.register("calc", [(
//!     "add",
//!     Method::sync(|p: &mut Params| Ok(json!(p.get_as::<i64>("a")? + p.get_as::<i64>("b")?))),
//! )])?;
//!
//! let server = Server::builder(Arc::new(registry)).build();
//! server.serve(tokio::net::TcpListener::bind("127.0.0.1:9850").await?).await?;
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod hooks;
pub mod params;
pub mod registry;
pub mod service;
pub mod socket_server;

// Re-export commonly used types
pub use channel::{Channel, ChannelEnd, ChannelId, ListenerId};
pub use config::{ResultEncoding, ServerConfig};
pub use error::{ConfigError, RegistryError, Result, RpcError, WireError};
pub use hooks::{hook, run_hooks, BoxFuture, Hook, HookChain};
pub use params::{Params, Reply};
pub use registry::{Registry, RegistryStats};
pub use service::{Method, MethodKind, Service, WrappedMethod};
pub use socket_server::{
    Authorizer, Codec, ConnectionContext, Envelope, Handshake, JsonCodec, Server, ServerBuilder,
};
