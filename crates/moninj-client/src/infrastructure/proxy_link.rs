//! The client's combined link to the proxy.
//!
//! One connect attempt establishes both halves of the proxy conversation: a
//! pubsub subscription to the `"coredevice"` state stream and an RPC
//! connection for subscription calls.  The pubsub `init` snapshot is consumed
//! during the handshake, so a successful connect always delivers a complete
//! tree before [`ClientEvent::ProxyConnected`] announces the link.
//!
//! The endpoint itself comes out of the configuration tree and may change at
//! runtime; the device manager writes it into the shared [`EndpointSlot`] and
//! wakes the reconnector, which calls back into [`ProxyLinkConnector`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use moninj_core::{Connector, LinkError, ManagedLink, ProxyEndpoint, SyncOp};

use crate::application::device_manager::ClientEvent;
use crate::infrastructure::rpc_client::{rpc_io, RpcSlot};

/// Stream name of the canonical state tree on the proxy's publisher.
pub const STREAM_NAME: &str = "coredevice";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared slot holding the proxy endpoint most recently reconciled out of the
/// configuration tree.  Written by the device manager, read by the connector.
#[derive(Default)]
pub struct EndpointSlot {
    endpoint: Mutex<Option<ProxyEndpoint>>,
}

impl EndpointSlot {
    pub fn get(&self) -> Option<ProxyEndpoint> {
        lock(&self.endpoint).clone()
    }

    /// Stores `endpoint`, returning `true` when it differs from the previous
    /// value (including appearing or disappearing).
    pub fn replace(&self, endpoint: Option<ProxyEndpoint>) -> bool {
        let mut guard = lock(&self.endpoint);
        let changed = *guard != endpoint;
        *guard = endpoint;
        changed
    }
}

/// Connect seam for the proxy link, driven by a reconnector.
pub struct ProxyLinkConnector {
    endpoint: Arc<EndpointSlot>,
    rpc: Arc<RpcSlot>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ProxyLinkConnector {
    pub fn new(
        endpoint: Arc<EndpointSlot>,
        rpc: Arc<RpcSlot>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        Self { endpoint, rpc, events }
    }
}

/// One established proxy link: the pubsub follower and the RPC driver.
pub struct ProxyLink {
    rpc: Arc<RpcSlot>,
    sync_reader: JoinHandle<()>,
    rpc_driver: JoinHandle<()>,
}

#[async_trait]
impl ManagedLink for ProxyLink {
    async fn close(&mut self) {
        // Stop both tasks before dropping the call channel; an aborted driver
        // can no longer report a spurious death.
        self.sync_reader.abort();
        self.rpc_driver.abort();
        self.rpc.clear();
    }
}

#[async_trait]
impl Connector for ProxyLinkConnector {
    type Link = ProxyLink;

    async fn connect(&mut self) -> Result<ProxyLink, LinkError> {
        let endpoint = self.endpoint.get().ok_or(LinkError::NotConfigured)?;

        let pubsub =
            TcpStream::connect((endpoint.host.as_str(), endpoint.pubsub_port)).await?;
        let (read_half, mut write_half) = pubsub.into_split();

        let request = format!("{}\n", serde_json::json!({ "subscribe": STREAM_NAME }));
        write_half.write_all(request.as_bytes()).await?;

        let mut lines = BufReader::new(read_half).lines();
        let first = lines
            .next_line()
            .await?
            .ok_or_else(|| LinkError::Handshake("proxy closed before init".to_owned()))?;
        let op = SyncOp::from_line(&first)
            .map_err(|e| LinkError::Handshake(format!("bad init line: {e}")))?;
        if !matches!(op, SyncOp::Init { .. }) {
            return Err(LinkError::Handshake("expected init as first operation".to_owned()));
        }

        let rpc_stream =
            TcpStream::connect((endpoint.host.as_str(), endpoint.rpc_port)).await?;
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        self.rpc.install(call_tx);
        let rpc_driver = tokio::spawn(rpc_io(rpc_stream, call_rx, self.events.clone()));

        info!(host = endpoint.host, "proxy link established");
        let _ = self.events.send(ClientEvent::ProxyOp(op));
        let _ = self.events.send(ClientEvent::ProxyConnected);

        let sync_reader = tokio::spawn(follow(lines, write_half, self.events.clone()));
        Ok(ProxyLink { rpc: Arc::clone(&self.rpc), sync_reader, rpc_driver })
    }
}

/// Forwards the diff stream into the event loop until the connection dies.
///
/// `write_half` is only held to keep the socket open for the lifetime of the
/// subscription.
async fn follow(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    _write_half: OwnedWriteHalf,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let op = match SyncOp::from_line(&line) {
                    Ok(op) => op,
                    Err(e) => {
                        warn!("discarding malformed proxy operation: {e}");
                        continue;
                    }
                };
                if events.send(ClientEvent::ProxyOp(op)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("proxy closed the state subscription");
                let _ = events.send(ClientEvent::ProxyGone);
                break;
            }
            Err(e) => {
                warn!("proxy state read failed: {e}");
                let _ = events.send(ClientEvent::ProxyGone);
                break;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
