//! Upstream configuration subscription.
//!
//! The proxy follows the `"devices"` stream of the upstream configuration
//! publisher through a [`JsonMirror`].  The connect attempt consumes the
//! `init` snapshot so a successful connection always starts from a complete
//! tree; every change afterwards re-extracts the device endpoint and reports
//! it to the event loop, which decides whether a reconnect is warranted.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use moninj_core::{device_host, Connector, JsonMirror, LinkError, ManagedLink, SyncOp};

use crate::application::proxy::ProxyEvent;

/// Stream name of the configuration tree on the upstream publisher.
pub const STREAM_NAME: &str = "devices";

/// Connect seam for the upstream subscription, driven by a reconnector.
pub struct UpstreamConnector {
    host: String,
    port: u16,
    events: mpsc::UnboundedSender<ProxyEvent>,
}

impl UpstreamConnector {
    pub fn new(host: String, port: u16, events: mpsc::UnboundedSender<ProxyEvent>) -> Self {
        Self { host, port, events }
    }
}

/// One established upstream subscription.
pub struct UpstreamLink {
    reader: JoinHandle<()>,
}

#[async_trait]
impl ManagedLink for UpstreamLink {
    async fn close(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Connector for UpstreamConnector {
    type Link = UpstreamLink;

    async fn connect(&mut self) -> Result<UpstreamLink, LinkError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let (read_half, mut write_half) = stream.into_split();

        let request = format!("{}\n", serde_json::json!({ "subscribe": STREAM_NAME }));
        write_half.write_all(request.as_bytes()).await?;

        let mut lines = BufReader::new(read_half).lines();
        let first = lines
            .next_line()
            .await?
            .ok_or_else(|| LinkError::Handshake("upstream closed before init".to_owned()))?;
        let op = SyncOp::from_line(&first)
            .map_err(|e| LinkError::Handshake(format!("bad init line: {e}")))?;
        if !matches!(op, SyncOp::Init { .. }) {
            return Err(LinkError::Handshake("expected init as first operation".to_owned()));
        }

        let mut mirror = JsonMirror::new();
        mirror.apply(op);
        info!(host = self.host, port = self.port, "upstream subscription established");
        let _ = self.events.send(ProxyEvent::UpstreamUp);
        let _ = self
            .events
            .send(ProxyEvent::ConfigChanged { device_host: device_host(mirror.tree()) });

        let reader = tokio::spawn(follow(lines, write_half, mirror, self.events.clone()));
        Ok(UpstreamLink { reader })
    }
}

/// Applies the diff stream until the connection dies.
///
/// `write_half` is only held to keep the socket open for the lifetime of the
/// subscription.
async fn follow(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    _write_half: OwnedWriteHalf,
    mut mirror: JsonMirror,
    events: mpsc::UnboundedSender<ProxyEvent>,
) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let op = match SyncOp::from_line(&line) {
                    Ok(op) => op,
                    Err(e) => {
                        warn!("discarding malformed upstream operation: {e}");
                        continue;
                    }
                };
                if mirror.apply(op) {
                    let changed = ProxyEvent::ConfigChanged {
                        device_host: device_host(mirror.tree()),
                    };
                    if events.send(changed).is_err() {
                        break;
                    }
                }
            }
            Ok(None) => {
                info!("upstream closed the subscription");
                let _ = events.send(ProxyEvent::UpstreamGone);
                break;
            }
            Err(e) => {
                warn!("upstream read failed: {e}");
                let _ = events.send(ProxyEvent::UpstreamGone);
                break;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
