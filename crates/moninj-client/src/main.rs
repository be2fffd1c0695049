//! MonInj-Over-IP client entry point.
//!
//! Wires the upstream and proxy-link reconnectors into the device manager's
//! event loop.  Display commands are drained into structured logs; a GUI
//! embedding this crate would drain the same channel into widgets instead.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ ClientConfig::load()  -- client.toml (MONINJ_CLIENT_CONFIG override)
//!  └─ start services
//!       ├─ Reconnector("upstream")    -- configuration subscription
//!       ├─ Reconnector("proxy")       -- pubsub + RPC link to the proxy
//!       └─ display consumer           -- logs DisplayCommand stream
//!  └─ event loop: ClientEvent → DeviceManager::handle_event
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use moninj_core::reconnect::DEFAULT_BACKOFF;
use moninj_core::Reconnector;
use moninj_client::application::{run, DeviceManager};
use moninj_client::config::ClientConfig;
use moninj_client::infrastructure::display::{ChannelDisplayBridge, DisplayCommand};
use moninj_client::infrastructure::proxy_link::{EndpointSlot, ProxyLinkConnector};
use moninj_client::infrastructure::rpc_client::RpcSlot;
use moninj_client::infrastructure::upstream::UpstreamConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("MONINJ_CLIENT_CONFIG").unwrap_or_else(|_| "client.toml".to_owned());
    let config = ClientConfig::load(Path::new(&config_path))
        .with_context(|| format!("loading {config_path}"))?;
    info!(
        upstream = config.upstream.host,
        notify_port = config.upstream.notify_port,
        "MonInj-Over-IP client starting"
    );

    let rpc = Arc::new(RpcSlot::default());
    let endpoint = Arc::new(EndpointSlot::default());
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let (bridge, mut display_rx) = ChannelDisplayBridge::new();
    tokio::spawn(async move {
        while let Some(command) = display_rx.recv().await {
            match &command {
                DisplayCommand::Create { handle, kind, spec } => {
                    info!(handle, ?kind, title = %spec.title, "display created");
                }
                DisplayCommand::Update { handle, field, value } => {
                    info!(handle, ?field, ?value, "display updated");
                }
                DisplayCommand::Destroy { handle } => {
                    info!(handle, "display destroyed");
                }
            }
        }
    });

    // ── Managed links ─────────────────────────────────────────────────────────
    let upstream_rec = Reconnector::spawn(
        "upstream",
        UpstreamConnector::new(
            config.upstream.host.clone(),
            config.upstream.notify_port,
            event_tx.clone(),
        ),
        DEFAULT_BACKOFF,
    );
    let proxy_rec = Reconnector::spawn(
        "proxy",
        ProxyLinkConnector::new(Arc::clone(&endpoint), Arc::clone(&rpc), event_tx.clone()),
        DEFAULT_BACKOFF,
    );
    // The proxy link waits until the configuration names an endpoint.
    upstream_rec.wake();

    // ── Event loop ────────────────────────────────────────────────────────────
    let manager = DeviceManager::new(bridge, Arc::clone(&rpc), Arc::clone(&endpoint));
    let upstream_wake = upstream_rec.wake_handle();
    let proxy_wake = proxy_rec.wake_handle();
    let loop_task = tokio::spawn(run(manager, event_rx, upstream_wake, proxy_wake));

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    loop_task.abort();
    proxy_rec.shutdown().await;
    upstream_rec.shutdown().await;
    Ok(())
}
