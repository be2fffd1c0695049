//! JSON-line RPC client for the proxy's forwarding surface.
//!
//! Subscription calls are fire-and-forget: the device manager drops typed
//! commands into the [`RpcSlot`], a writer task serializes them as request
//! lines in FIFO order, and a reader task consumes the responses (logging
//! rejections).  This keeps the order of an enable/disable sequence intact on
//! the wire while the device manager itself never awaits the network.
//!
//! The same connection carries a periodic `healthy` poll; health transitions
//! are logged so an operator can see a degraded proxy from the client log.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use moninj_core::DeviceCommand;

use crate::application::device_manager::ClientEvent;

/// Interval of the background `healthy` poll.
pub const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(3);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write-side slot for the active proxy RPC connection.
///
/// Calls made while no connection is installed are dropped silently; the
/// device manager's bookkeeping proceeds regardless and the subscriptions are
/// re-armed when the link comes back.
#[derive(Default)]
pub struct RpcSlot {
    tx: Mutex<Option<mpsc::UnboundedSender<DeviceCommand>>>,
}

impl RpcSlot {
    pub fn install(&self, tx: mpsc::UnboundedSender<DeviceCommand>) {
        *lock(&self.tx) = Some(tx);
    }

    pub fn clear(&self) {
        lock(&self.tx).take();
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.tx).is_some()
    }

    pub fn send(&self, cmd: DeviceCommand) {
        let mut guard = lock(&self.tx);
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(cmd).is_err() {
                    debug!("rpc writer gone, clearing slot");
                    *guard = None;
                }
            }
            None => debug!(?cmd, "proxy rpc down, skipping call"),
        }
    }
}

/// Serializes one command as a request line.
pub fn request_line(id: u64, cmd: &DeviceCommand) -> String {
    let (method, params) = match *cmd {
        DeviceCommand::MonitorProbe { enable, channel, probe } => {
            ("monitor_probe", json!([enable, channel, probe]))
        }
        DeviceCommand::MonitorInjection { enable, channel, overrd } => {
            ("monitor_injection", json!([enable, channel, overrd]))
        }
        DeviceCommand::Inject { channel, overrd, value } => {
            ("inject", json!([channel, overrd, value]))
        }
        DeviceCommand::GetInjectionStatus { channel, overrd } => {
            ("get_injection_status", json!([channel, overrd]))
        }
    };
    let mut line = json!({"id": id, "method": method, "params": params}).to_string();
    line.push('\n');
    line
}

fn health_request_line(id: u64) -> String {
    let mut line = json!({"id": id, "method": "healthy", "params": []}).to_string();
    line.push('\n');
    line
}

/// Drives one RPC connection until it dies.
///
/// Reports `ProxyGone` on an unexpected death; a deliberate teardown aborts
/// this task before that can happen.
pub async fn rpc_io(
    stream: TcpStream,
    mut calls: mpsc::UnboundedReceiver<DeviceCommand>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut next_id: u64 = 1;
    let mut last_health: Option<bool> = None;
    let mut health_tick = tokio::time::interval(HEALTH_POLL_INTERVAL);

    loop {
        tokio::select! {
            call = calls.recv() => {
                let Some(cmd) = call else { break };
                let line = request_line(next_id, &cmd);
                next_id += 1;
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
            _ = health_tick.tick() => {
                let line = health_request_line(next_id);
                next_id += 1;
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => handle_response(&line, &mut last_health),
                    _ => break,
                }
            }
        }
    }
    let _ = events.send(ClientEvent::ProxyGone);
}

/// Consumes one response line: logs rejections and health transitions.
fn handle_response(line: &str, last_health: &mut Option<bool>) {
    let response: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!("malformed rpc response: {e}");
            return;
        }
    };
    if response["status"] == json!("error") {
        warn!(message = %response["message"], "proxy rejected rpc call");
        return;
    }
    // Only the health poll returns a structured result.
    if let Some(healthy) = response["result"]["healthy"].as_bool() {
        if *last_health != Some(healthy) {
            if healthy {
                info!("proxy is in a healthy state");
            } else {
                warn!(degraded = %response["result"]["degraded"], "proxy is in an unhealthy state");
            }
            *last_health = Some(healthy);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line_layout() {
        let line = request_line(
            7,
            &DeviceCommand::MonitorProbe { enable: true, channel: 5, probe: 0 },
        );
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["id"], json!(7));
        assert_eq!(parsed["method"], json!("monitor_probe"));
        assert_eq!(parsed["params"], json!([true, 5, 0]));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_inject_params_preserve_sign() {
        let line = request_line(1, &DeviceCommand::Inject { channel: 3, overrd: 1, value: -1 });
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["params"], json!([3, 1, -1]));
    }

    #[test]
    fn test_slot_skips_calls_while_disconnected() {
        let slot = RpcSlot::default();
        assert!(!slot.is_connected());
        // Must not panic or error.
        slot.send(DeviceCommand::GetInjectionStatus { channel: 1, overrd: 0 });

        let (tx, mut rx) = mpsc::unbounded_channel();
        slot.install(tx);
        slot.send(DeviceCommand::GetInjectionStatus { channel: 1, overrd: 0 });
        assert!(rx.try_recv().is_ok());

        slot.clear();
        slot.send(DeviceCommand::GetInjectionStatus { channel: 2, overrd: 0 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_health_transition_is_tracked_once() {
        let mut last = None;
        let ok = r#"{"id":1,"status":"ok","result":{"healthy":true,"degraded":[]}}"#;
        handle_response(ok, &mut last);
        assert_eq!(last, Some(true));
        let bad = r#"{"id":2,"status":"ok","result":{"healthy":false,"degraded":["device_link"]}}"#;
        handle_response(bad, &mut last);
        assert_eq!(last, Some(false));
    }
}
