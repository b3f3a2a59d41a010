//! Fixture services

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use switchyard::{Channel, ChannelEnd, Method, Params, Registry, RpcError};

/// Records every channel the `feeds ticker` method hands out, per connection
#[derive(Clone, Default)]
pub struct FeedRecorder {
    channels: Arc<Mutex<HashMap<(String, String), ChannelEnd>>>,
    fresh: Arc<Mutex<Vec<ChannelEnd>>>,
}

impl FeedRecorder {
    /// Any channel named `id`, on whichever connection opened it
    pub fn get(&self, id: &str) -> Option<ChannelEnd> {
        self.all(id).into_iter().next()
    }

    /// Every channel named `id`, one per connection that opened it
    pub fn all(&self, id: &str) -> Vec<ChannelEnd> {
        self.channels
            .lock()
            .iter()
            .filter(|((_, channel_id), _)| channel_id == id)
            .map(|(_, end)| end.clone())
            .collect()
    }

    pub fn created(&self) -> usize {
        self.channels.lock().len()
    }

    /// Every channel `feeds fresh` built, in call order
    pub fn fresh(&self) -> Vec<ChannelEnd> {
        self.fresh.lock().clone()
    }

    /// Wait until the channel `id` has closed, returning false on timeout
    pub async fn wait_closed(&self, id: &str) -> bool {
        for _ in 0..200 {
            if self.get(id).map(|end| end.is_closed()).unwrap_or(false) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Reuse the connection's open channel named `id`, or start a new ticker under that name
    fn open(&self, connection: String, id: Option<String>) -> ChannelEnd {
        let mut channels = self.channels.lock();
        if let Some(id) = &id {
            let key = (connection.clone(), id.clone());
            if let Some(end) = channels.get(&key).filter(|end| !end.is_closed()) {
                return end.clone();
            }
        }

        let channel = match id {
            Some(id) => Channel::with_id(id),
            None => Channel::new(),
        };
        let end = channel.end();
        channels.insert((connection, channel.id().to_string()), end.clone());
        spawn_ticker(channel);
        end
    }
}

/// Start a new ticker on every call, even when the name is already in use
fn open_fresh(recorder: &FeedRecorder, id: Option<String>) -> ChannelEnd {
    let channel = match id {
        Some(id) => Channel::with_id(id),
        None => Channel::new(),
    };
    let end = channel.end();
    recorder.fresh.lock().push(end.clone());
    spawn_ticker(channel);
    end
}

/// A channel that answers a consumer `flood` event (`{"count": n}`) by emitting
/// `n` `burst` events at once
fn open_flood(recorder: &FeedRecorder, connection: String, id: Option<String>) -> ChannelEnd {
    let channel = Arc::new(match id {
        Some(id) => Channel::with_id(id),
        None => Channel::new(),
    });
    let end = channel.end();
    recorder
        .channels
        .lock()
        .insert((connection, channel.id().to_string()), end.clone());

    let weak: Weak<Channel> = Arc::downgrade(&channel);
    channel.on("flood", move |data| {
        let Some(channel) = weak.upgrade() else {
            return;
        };
        let count = data["count"].as_u64().unwrap_or(0);
        for n in 1..=count {
            channel.emit("burst", json!(n));
        }
    });

    tokio::spawn(async move { channel.closed().await });
    end
}

/// Emit `tick` every 20ms and answer consumer `ping` events with `pong` until closed
fn spawn_ticker(channel: Channel) {
    let (ping_tx, mut ping_rx) = tokio::sync::mpsc::unbounded_channel();
    channel.on("ping", move |data| {
        let _ = ping_tx.send(data.clone());
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        let mut count = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    count += 1;
                    channel.emit("tick", json!(count));
                }
                Some(data) = ping_rx.recv() => channel.emit("pong", data),
                _ = channel.closed() => break,
            }
        }
    });
}

fn channel_name(params: &Params) -> Option<String> {
    params
        .get("channel")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Registry with two services:
///
/// - `calc`: `add`, `wrong` (code 123), `slow` (deferred), `crash` (500), `echo`
/// - `feeds`: `ticker` (feed, named by `params.channel` when given; reused per connection),
///   `fresh` (a new ticker per call), `flood` (bursts on request)
pub fn calc_registry(recorder: &FeedRecorder) -> Registry {
    let mut registry = Registry::new();

    registry
        .register(
            "calc",
            [
                (
                    "add",
                    Method::sync(|params: &mut Params| {
                        let a: i64 = params.get_as("a")?;
                        let b: i64 = params.get_as("b")?;
                        Ok(json!(a + b))
                    }),
                ),
                (
                    "wrong",
                    Method::sync(|_: &mut Params| Err(RpcError::new(123, "wrong"))),
                ),
                (
                    "slow",
                    Method::deferred(|params: Params| async move {
                        let ms: u64 = params.get_as("ms")?;
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        Ok(json!(ms))
                    }),
                ),
                (
                    "crash",
                    Method::deferred(|_: Params| async move {
                        Err::<Value, _>(RpcError::internal("database handle poisoned"))
                    }),
                ),
                (
                    "echo",
                    Method::sync(|params: &mut Params| {
                        Ok(json!({
                            "data": Value::Object(params.data().clone()),
                            "connection": params.connection_id,
                            "request": params.request_id,
                            "user": params.user,
                        }))
                    }),
                ),
            ],
        )
        .expect("calc registers");

    let (ticker, fresh, flood) = (recorder.clone(), recorder.clone(), recorder.clone());
    registry
        .register(
            "feeds",
            [
                (
                    "ticker",
                    Method::feed(move |params: Params| {
                        let recorder = ticker.clone();
                        async move {
                            let connection = params.connection_id.clone().unwrap_or_default();
                            Ok(recorder.open(connection, channel_name(&params)))
                        }
                    }),
                ),
                (
                    "fresh",
                    Method::feed(move |params: Params| {
                        let recorder = fresh.clone();
                        async move { Ok(open_fresh(&recorder, channel_name(&params))) }
                    }),
                ),
                (
                    "flood",
                    Method::feed(move |params: Params| {
                        let recorder = flood.clone();
                        async move {
                            let connection = params.connection_id.clone().unwrap_or_default();
                            Ok(open_flood(&recorder, connection, channel_name(&params)))
                        }
                    }),
                ),
            ],
        )
        .expect("feeds registers");

    registry
}
