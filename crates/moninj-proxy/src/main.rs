//! MonInj-Over-IP proxy entry point.
//!
//! Wires the device-link and upstream reconnectors, the two listeners, and
//! the single event loop that owns every mutation of the canonical tree.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ ProxyConfig::load()   -- proxy.toml (MONINJ_PROXY_CONFIG override)
//!  └─ start services
//!       ├─ Reconnector("upstream")  -- configuration subscription
//!       ├─ Reconnector("device")    -- binary device link
//!       ├─ SyncPublisher            -- state stream listener
//!       └─ RpcServer                -- forwarding RPC listener
//!  └─ event loop: ProxyEvent → MonInjProxy::handle_event
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use moninj_core::reconnect::DEFAULT_BACKOFF;
use moninj_core::Reconnector;
use moninj_proxy::application::proxy::{DeviceHandle, MonInjProxy};
use moninj_proxy::config::ProxyConfig;
use moninj_proxy::infrastructure::device_link::DeviceLinkConnector;
use moninj_proxy::infrastructure::publisher::SyncPublisher;
use moninj_proxy::infrastructure::rpc::RpcServer;
use moninj_proxy::infrastructure::upstream::UpstreamConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("MONINJ_PROXY_CONFIG").unwrap_or_else(|_| "proxy.toml".to_owned());
    let config = ProxyConfig::load(Path::new(&config_path))
        .with_context(|| format!("loading {config_path}"))?;
    info!(
        upstream = config.upstream.host,
        notify_port = config.upstream.notify_port,
        "MonInj-Over-IP proxy starting"
    );

    let device = Arc::new(DeviceHandle::default());
    let proxy = Arc::new(MonInjProxy::new(Arc::clone(&device)));
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    // ── Managed links ─────────────────────────────────────────────────────────
    let device_rec = Reconnector::spawn(
        "device",
        DeviceLinkConnector::new(
            Arc::clone(&proxy),
            Arc::clone(&device),
            config.device.port,
            event_tx.clone(),
        ),
        DEFAULT_BACKOFF,
    );
    let upstream_rec = Reconnector::spawn(
        "upstream",
        UpstreamConnector::new(
            config.upstream.host.clone(),
            config.upstream.notify_port,
            event_tx.clone(),
        ),
        DEFAULT_BACKOFF,
    );
    // The device link waits until the configuration names an endpoint.
    upstream_rec.wake();

    // ── Listeners ─────────────────────────────────────────────────────────────
    let pubsub_listener =
        TcpListener::bind((config.bind.address.as_str(), config.bind.pubsub_port))
            .await
            .with_context(|| format!("binding publisher on port {}", config.bind.pubsub_port))?;
    let rpc_listener = TcpListener::bind((config.bind.address.as_str(), config.bind.rpc_port))
        .await
        .with_context(|| format!("binding rpc server on port {}", config.bind.rpc_port))?;
    tokio::spawn(SyncPublisher::new(Arc::clone(&proxy)).run(pubsub_listener));
    tokio::spawn(RpcServer::new(Arc::clone(&proxy)).run(rpc_listener));
    info!(
        bind = config.bind.address,
        pubsub_port = config.bind.pubsub_port,
        rpc_port = config.bind.rpc_port,
        "listeners up"
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    let device_wake = device_rec.wake_handle();
    let upstream_wake = upstream_rec.wake_handle();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                proxy.handle_event(event, &device_wake, &upstream_wake);
            }
        }
    }

    info!("shutting down");
    device_rec.shutdown().await;
    upstream_rec.shutdown().await;
    Ok(())
}
