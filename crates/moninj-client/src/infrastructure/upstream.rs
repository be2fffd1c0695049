//! Upstream configuration subscription.
//!
//! The client follows the `"devices"` stream of the configuration publisher
//! and forwards every operation raw into the event loop; the device manager
//! owns the mirrored tree and decides what a change means.  The connect
//! attempt consumes the `init` snapshot so a successful connection always
//! starts the manager from a complete tree.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use moninj_core::{Connector, LinkError, ManagedLink, SyncOp};

use crate::application::device_manager::ClientEvent;

/// Stream name of the configuration tree on the upstream publisher.
pub const STREAM_NAME: &str = "devices";

/// Connect seam for the upstream subscription, driven by a reconnector.
pub struct UpstreamConnector {
    host: String,
    port: u16,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl UpstreamConnector {
    pub fn new(host: String, port: u16, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
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

        info!(host = self.host, port = self.port, "upstream subscription established");
        let _ = self.events.send(ClientEvent::ConfigOp(op));

        let reader = tokio::spawn(follow(lines, write_half, self.events.clone()));
        Ok(UpstreamLink { reader })
    }
}

/// Forwards the diff stream until the connection dies.
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
                        warn!("discarding malformed upstream operation: {e}");
                        continue;
                    }
                };
                if events.send(ClientEvent::ConfigOp(op)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("upstream closed the subscription");
                let _ = events.send(ClientEvent::UpstreamGone);
                break;
            }
            Err(e) => {
                warn!("upstream read failed: {e}");
                let _ = events.send(ClientEvent::UpstreamGone);
                break;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn accept_and_init(listener: &TcpListener, tree: serde_json::Value) -> TcpStream {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = vec![0u8; 64];
        let n = stream.read(&mut buf).await.expect("subscribe line");
        let request: serde_json::Value =
            serde_json::from_slice(&buf[..n]).expect("subscribe json");
        assert_eq!(request["subscribe"], json!(STREAM_NAME));
        let init = SyncOp::Init { value: tree };
        stream.write_all(init.to_line().as_bytes()).await.expect("init");
        stream
    }

    #[tokio::test]
    async fn test_connect_forwards_snapshot_then_diffs() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut connector =
            UpstreamConnector::new(addr.ip().to_string(), addr.port(), event_tx);

        let tree = json!({"ttl0": {"type": "local", "driver": "ttl_out",
                                    "arguments": {"channel": 0}}});
        let (_link, mut stream) =
            tokio::join!(async { connector.connect().await.expect("connect") }, async {
                accept_and_init(&listener, tree).await
            });

        assert!(matches!(
            event_rx.recv().await,
            Some(ClientEvent::ConfigOp(SyncOp::Init { .. }))
        ));

        let op = SyncOp::SetItem {
            path: vec![json!("ttl0"), json!("arguments")],
            key: json!("channel"),
            value: json!(4),
        };
        stream.write_all(op.to_line().as_bytes()).await.expect("setitem");
        assert!(matches!(
            event_rx.recv().await,
            Some(ClientEvent::ConfigOp(SyncOp::SetItem { .. }))
        ));
    }

    #[tokio::test]
    async fn test_peer_disconnect_reports_upstream_gone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut connector =
            UpstreamConnector::new(addr.ip().to_string(), addr.port(), event_tx);

        let (_link, stream) =
            tokio::join!(async { connector.connect().await.expect("connect") }, async {
                accept_and_init(&listener, json!({})).await
            });
        event_rx.recv().await.expect("snapshot");

        drop(stream);
        assert!(matches!(event_rx.recv().await, Some(ClientEvent::UpstreamGone)));
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped_not_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut connector =
            UpstreamConnector::new(addr.ip().to_string(), addr.port(), event_tx);

        let (_link, mut stream) =
            tokio::join!(async { connector.connect().await.expect("connect") }, async {
                accept_and_init(&listener, json!({})).await
            });
        event_rx.recv().await.expect("snapshot");

        stream.write_all(b"garbage\n").await.expect("garbage");
        let op = SyncOp::SetItem { path: vec![], key: json!("x"), value: json!(1) };
        stream.write_all(op.to_line().as_bytes()).await.expect("setitem");

        assert!(matches!(
            event_rx.recv().await,
            Some(ClientEvent::ConfigOp(SyncOp::SetItem { .. }))
        ));
    }

    #[tokio::test]
    async fn test_non_init_first_operation_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let mut connector =
            UpstreamConnector::new(addr.ip().to_string(), addr.port(), event_tx);

        let (result, _) = tokio::join!(connector.connect(), async {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 64];
            let _ = stream.read(&mut buf).await.expect("subscribe line");
            let op = SyncOp::SetItem { path: vec![], key: json!("x"), value: json!(1) };
            stream.write_all(op.to_line().as_bytes()).await.expect("write");
            stream
        });

        assert!(matches!(result, Err(LinkError::Handshake(_))));
    }
}
