//! Room relay server
//!
//! Serves the room relay over WebSocket: rooms of at most two participants,
//! `invite`/`ok`/`ice_candidate`/`bye` forwarded to the other member.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin relay_server -- --bind 0.0.0.0:8080
//! RUST_LOG=debug cargo run --bin relay_server
//! ```

use anyhow::Context;
use clap::Parser;
use peercall::RelayServer;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// PeerCall relay server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080", env = "PEERCALL_RELAY_BIND")]
    bind: SocketAddr,

    /// Log as JSON lines
    #[arg(long, default_value_t = false, env = "PEERCALL_LOG_JSON")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let server = RelayServer::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    let handle = server.start()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %handle.url(),
        "Relay server listening"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutting down relay server");
    handle.shutdown().await;
    Ok(())
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
