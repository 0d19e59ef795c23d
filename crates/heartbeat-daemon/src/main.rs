//! heartbeat-daemon: runs one node of the heartbeat protocol.
//!
//! Every daemon pointed at the same store directory and bucket joins the same
//! cluster. Each one sends its own heartbeats and reports peers that stop.

use anyhow::{Result, bail};
use clap::Parser;
use heartbeat_core::{HeartbeatConfig, Heartbeater, SharedStore};
use heartbeat_daemon::FileStoreConnector;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "heartbeat-daemon")]
#[command(about = "Decentralized heartbeat sender and stale-node detector")]
struct Args {
    /// Store endpoint: a directory shared by every node (plain path or file:// URL)
    #[arg(short, long)]
    store: String,

    /// Bucket within the store
    #[arg(short, long, default_value = "default")]
    bucket: String,

    /// Prefix for every heartbeat key
    #[arg(long, default_value = "")]
    key_prefix: String,

    /// Node ID (generated if not provided)
    #[arg(long)]
    node_id: Option<String>,

    /// Milliseconds between heartbeats
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Milliseconds between stale-heartbeat checks
    #[arg(long, default_value_t = 2500)]
    stale_threshold_ms: u64,

    /// Only send heartbeats, never check peers
    #[arg(long)]
    no_check: bool,

    /// Only check peers, never send heartbeats
    #[arg(long)]
    no_send: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG; defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,heartbeat_daemon=debug"
    } else {
        "info,heartbeat_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.no_send && args.no_check {
        bail!("--no-send and --no-check together leave nothing to do");
    }

    let node_id = args.node_id.unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().to_string();
        info!("Generated node ID: {}", id);
        id
    });

    info!("Starting heartbeat-daemon");
    info!("Store: {} (bucket {})", args.store, args.bucket);

    let config = HeartbeatConfig::new(&args.store, &args.bucket, &args.key_prefix, &node_id);
    let shared = SharedStore::new(FileStoreConnector, &args.store, &args.bucket);
    let heartbeater = Heartbeater::connect(config, &shared).await?;

    if !args.no_send {
        heartbeater.start_sending_heartbeats(Duration::from_millis(args.interval_ms))?;
    }
    if !args.no_check {
        heartbeater
            .start_checking_heartbeats(
                Duration::from_millis(args.stale_threshold_ms),
                |node: &str| warn!("Node {} stopped sending heartbeats", node),
            )
            .await?;
    }

    info!("Node {} running. Press Ctrl+C to stop.", heartbeater.node_id());
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Our liveness record stays behind; peers clean it up once the expiry lapses.
    if heartbeater.is_sending() {
        heartbeater.stop_sending_heartbeats().await?;
    }
    if heartbeater.is_checking() {
        heartbeater.stop_checking_heartbeats().await?;
    }

    info!("Shutting down");
    Ok(())
}
