//! Switchyard Socket Server
//!
//! Multiplexes service calls and push channels over WebSocket connections.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SWITCHYARD SERVER (switchyard-daemon)              │
//! │                 Single registry, many connections, many channels        │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Registry (Arc, read-only while serving)                                │
//! │    "calc" ──► Service { methods, before hooks, after hooks }            │
//! │                                                                         │
//! │  WebSocket ──► authorizer ──► middleware ──► ConnectionState per client │
//! │    - Envelope decode / routing                                          │
//! │    - Calls spawned, completions reported back to the connection task    │
//! │    - Open channels keyed by channel id, torn down on disconnect         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! See [`protocol`] for the envelope format.

pub mod connection;
pub mod protocol;
pub mod server;

pub use connection::ConnectionContext;
pub use protocol::{ChannelControl, Codec, Envelope, IncomingEnvelope, JsonCodec, Request};
pub use server::{Authorizer, Handshake, Server, ServerBuilder};
