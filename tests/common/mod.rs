//! Common test utilities and fixtures for switchyard integration tests
//!
//! This module provides:
//! - `TestClient`, a WebSocket client wired to a server over an in-memory duplex stream
//! - `calc_registry()`, a registry with the `calc` fixture service

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod client;
pub mod services;

pub use client::TestClient;
pub use services::{calc_registry, FeedRecorder};
