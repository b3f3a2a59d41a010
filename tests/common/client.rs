//! In-memory WebSocket client for driving a `Server` without a TCP socket

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use switchyard::{Handshake, Server};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestClient {
    ws: WebSocketStream<DuplexStream>,
}

impl TestClient {
    /// Connect to `server` with an empty handshake
    pub async fn connect(server: &Server) -> Self {
        Self::connect_with(server, Handshake::default()).await
    }

    /// Connect to `server`, presenting `handshake` to its authorizer and middleware
    pub async fn connect_with(server: &Server, handshake: Handshake) -> Self {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        let server = server.clone();
        tokio::spawn(async move {
            let ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
            server.serve_connection(ws, handshake).await;
        });

        let ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        Self { ws }
    }

    pub async fn send(&mut self, envelope: Value) {
        self.send_raw(&envelope.to_string()).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("send failed");
    }

    /// Send a call envelope
    pub async fn call(&mut self, id: &str, name: &str, data: Value) {
        self.send(json!({ "id": id, "name": name, "data": data })).await;
    }

    /// Send a channel control envelope
    pub async fn channel(&mut self, channel_id: &str, event: &str, data: Value) {
        self.send(json!({
            "id": channel_id,
            "name": "channel",
            "data": { "name": event, "data": data }
        }))
        .await;
    }

    /// Receive the next envelope, failing the test after a timeout
    pub async fn recv(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("connection ended")
                .expect("transport error");
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).expect("invalid JSON"),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    /// Receive envelopes until one with `id` arrives, discarding channel events
    pub async fn recv_reply(&mut self, id: &str) -> Value {
        loop {
            let envelope = self.recv().await;
            if envelope["id"] == id && envelope["name"] != "channel" {
                return envelope;
            }
        }
    }

    /// Discard everything already in flight, returning once `window` passes quietly
    pub async fn drain(&mut self, window: Duration) -> Vec<Value> {
        let mut drained = Vec::new();
        while let Ok(Some(Ok(Message::Text(text)))) =
            tokio::time::timeout(window, self.ws.next()).await
        {
            drained.push(serde_json::from_str(&text).expect("invalid JSON"));
        }
        drained
    }

    /// Assert that nothing arrives within `window`
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(msg)) = tokio::time::timeout(window, self.ws.next()).await {
            panic!("expected silence, got {:?}", msg);
        }
    }

    /// True once the server has closed the connection
    pub async fn closed_by_server(&mut self) -> bool {
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, self.ws.next()).await {
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }

    pub async fn ping(&mut self, payload: &[u8]) -> Vec<u8> {
        self.ws
            .send(Message::Ping(payload.to_vec()))
            .await
            .expect("ping failed");
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for pong")
                .expect("connection ended")
                .expect("transport error");
            if let Message::Pong(data) = msg {
                return data;
            }
        }
    }

    /// Close the connection from the client side
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
        // Drain until the server acknowledges
        while let Ok(Some(Ok(_))) = tokio::time::timeout(RECV_TIMEOUT, self.ws.next()).await {}
    }
}
