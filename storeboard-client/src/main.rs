//! storeboard - in-store signage board client
//!
//! Keeps a local, resilient view of the remote backend synchronized: an
//! initial bulk read per collection, a live change feed reconciled into
//! in-memory collections, and opportunistic snapshots through the tiered
//! persistence store so a cold start without connectivity still renders
//! the last known state.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storeboard_client::engine::Engine;
use storeboard_client::feed::{HttpBackend, NullBackend, RemoteBackend};
use storeboard_client::heartbeat::HeartbeatService;
use storeboard_client::store::TieredStore;
use storeboard_common::config::{ClientConfig, Overrides};
use storeboard_common::events::BoardEvent;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "storeboard", about = "In-store signage board client")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Local data directory for snapshots
    #[arg(long)]
    data_dir: Option<String>,

    /// Remote data service base URL
    #[arg(long)]
    remote_url: Option<String>,

    /// Remote data service API key
    #[arg(long)]
    api_key: Option<String>,

    /// Device id to heartbeat as (paired display mode)
    #[arg(long)]
    device_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting storeboard v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = ClientConfig::resolve(Overrides {
        config_path: args.config,
        data_dir: args.data_dir,
        remote_url: args.remote_url,
        api_key: args.api_key,
        device_id: args.device_id,
    })?;
    info!("Data directory: {}", config.data_dir.display());

    let (event_tx, _) = broadcast::channel(256);

    let store = Arc::new(TieredStore::open(&config.data_dir, event_tx.clone()).await);
    info!("Active storage tier: {}", store.active_tier().await);

    let remote: Arc<dyn RemoteBackend> = match HttpBackend::from_config(&config) {
        Some(backend) => {
            info!("Remote data service: {}", config.remote_url.as_deref().unwrap_or(""));
            Arc::new(backend)
        }
        None => {
            warn!("Remote data service not configured, running offline");
            Arc::new(NullBackend)
        }
    };

    let engine = Arc::new(Engine::new(store, Arc::clone(&remote), event_tx));

    // Seed every collection: remote when reachable, snapshot otherwise
    engine.sync_all().await;
    let feed_tasks = engine.spawn_feeds();

    let mut heartbeat = config.device_id.clone().map(|device_id| {
        info!("Heartbeating as device {}", device_id);
        HeartbeatService::start(
            Arc::clone(&remote),
            device_id,
            Duration::from_secs(config.heartbeat_interval_secs),
        )
    });

    // Surface board events in the log; the presentation layer consumes the
    // same broadcast channel for rendering and the notification sound.
    let mut events = engine.subscribe_events();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BoardEvent::OrderReady { order, .. }) => {
                    info!(
                        "Order {} ready for {}",
                        order.order_number, order.customer_name
                    );
                }
                Ok(BoardEvent::StorageDemoted { from, to, .. }) => {
                    warn!("Storage demoted from {} to {}", from, to);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Board event consumer lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Some(heartbeat) = heartbeat.as_mut() {
        heartbeat.stop();
    }
    for task in feed_tasks {
        task.abort();
    }
    event_log.abort();

    Ok(())
}
