//! State publisher: streams the canonical tree to TCP subscribers.
//!
//! Each accepted connection sends one JSON subscribe line naming the stream
//! it wants (only `"coredevice"` exists), is attached to the notifier, and
//! from then on receives the `init` snapshot followed by every diff, one
//! JSON line per operation.  A subscriber that disappears is detached on the
//! spot; slow subscribers buffer in their unbounded channel rather than slow
//! the event loop down.

use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::application::proxy::MonInjProxy;

/// Name subscribers must request; mirrors the single published tree.
pub const STREAM_NAME: &str = "coredevice";

#[derive(Deserialize)]
struct SubscribeRequest {
    subscribe: String,
}

pub struct SyncPublisher {
    proxy: Arc<MonInjProxy>,
}

impl SyncPublisher {
    pub fn new(proxy: Arc<MonInjProxy>) -> Self {
        Self { proxy }
    }

    /// Accept loop; runs until the listener fails fatally.
    pub async fn run(self, listener: TcpListener) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("publisher accept failed: {e}");
                    continue;
                }
            };
            debug!(%peer, "sync subscriber connecting");
            let proxy = Arc::clone(&self.proxy);
            tokio::spawn(async move {
                handle_subscriber(stream, proxy).await;
            });
        }
    }
}

async fn handle_subscriber(stream: TcpStream, proxy: Arc<MonInjProxy>) {
    let peer = stream.peer_addr().ok();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let request = match lines.next_line().await {
        Ok(Some(line)) => line,
        _ => return,
    };
    match serde_json::from_str::<SubscribeRequest>(&request) {
        Ok(req) if req.subscribe == STREAM_NAME => {}
        Ok(req) => {
            warn!(peer = ?peer, stream = req.subscribe, "unknown stream requested");
            return;
        }
        Err(e) => {
            warn!(peer = ?peer, "malformed subscribe request: {e}");
            return;
        }
    }

    let (id, mut ops) = proxy.attach_subscriber();
    info!(peer = ?peer, subscriber = %id, "sync subscriber attached");

    loop {
        tokio::select! {
            op = ops.recv() => {
                // None means the notifier itself is gone; shut the stream.
                let Some(op) = op else { break };
                if write_half.write_all(op.to_line().as_bytes()).await.is_err() {
                    break;
                }
            }
            line = lines.next_line() => {
                match line {
                    // Nothing further is expected from a subscriber; drain
                    // and ignore chatter, stop on EOF or error.
                    Ok(Some(_)) => continue,
                    _ => break,
                }
            }
        }
    }

    proxy.detach_subscriber(id);
    info!(peer = ?peer, subscriber = %id, "sync subscriber detached");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
