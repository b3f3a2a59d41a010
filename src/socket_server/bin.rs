//! Switchyard Daemon Binary
//!
//! A WebSocket server exposing a small demonstration `calc` service.
//!
//! # Usage
//!
//! ```bash
//! switchyard-daemon --port 9850
//! switchyard-daemon --config switchyard.toml --bare-results
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use switchyard::{Channel, Method, Params, Registry, RegistryError, RpcError, Server, ServerConfig};

/// Switchyard Socket Server Daemon
#[derive(Parser, Debug)]
#[command(name = "switchyard-daemon")]
#[command(about = "Real-time RPC and pub/sub over WebSocket")]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "SWITCHYARD_PORT")]
    port: Option<u16>,

    /// Host to bind to (overrides the config file)
    #[arg(long, env = "SWITCHYARD_HOST")]
    host: Option<String>,

    /// TOML config file
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Send plain-value results without the `{"data": ...}` wrapper
    #[arg(long)]
    bare_results: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.bare_results {
            config.result_encoding = switchyard::ResultEncoding::Bare;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.log_filter.parse()?)
                .add_directive("switchyard_daemon=info".parse()?),
        )
        .init();

    let addr = config.bind_addr()?;

    let mut registry = Registry::new();
    registry.configure(register_calc)?;

    let server = Server::builder(Arc::new(registry)).config(config).build();

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Connect with a WebSocket client to start");

    tokio::select! {
        result = server.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}

/// Register the demonstration `calc` service
fn register_calc(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register(
        "calc",
        [
            (
                "add",
                Method::sync(|params: &mut Params| {
                    if let (Ok(a), Ok(b)) = (params.get_as::<i64>("a"), params.get_as::<i64>("b")) {
                        return Ok(json!(a.saturating_add(b)));
                    }
                    let a: f64 = params.get_as("a")?;
                    let b: f64 = params.get_as("b")?;
                    Ok(json!(a + b))
                }),
            ),
            (
                "wrong",
                Method::sync(|_: &mut Params| Err(RpcError::new(123, "wrong"))),
            ),
            ("counter", Method::feed(counter)),
        ],
    )?;
    Ok(())
}

/// Emit an incrementing `update` event until the last subscriber leaves.
///
/// The channel is named after `params.channel` when given. A second call naming a
/// channel already open on the connection attaches to it, and the duplicate
/// counter built here is closed by the connection straight away.
async fn counter(params: Params) -> Result<switchyard::ChannelEnd, RpcError> {
    let interval_ms = match params.get("interval") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(1000).max(10),
        _ => 1000,
    };
    let channel = match params.get("channel").and_then(Value::as_str) {
        Some(id) => Channel::with_id(id),
        None => match &params.request_id {
            Some(id) => Channel::with_id(format!("counter-{}", id)),
            None => Channel::new(),
        },
    };
    let end = channel.end();

    tokio::spawn(async move {
        // First tick one period out, after the connection has attached its forwarder
        let period = Duration::from_millis(interval_ms);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut count: u64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    count += 1;
                    channel.emit("update", json!(count));
                }
                _ = channel.closed() => {
                    tracing::debug!("Counter {} stopped after {} updates", channel.id(), count);
                    break;
                }
            }
        }
    });

    Ok(end)
}
