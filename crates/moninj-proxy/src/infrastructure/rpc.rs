//! Forwarding RPC server.
//!
//! JSON-line request/response on TCP.  One request per line:
//!
//! ```text
//! {"id": 7, "method": "monitor_probe", "params": [true, 5, 0]}
//! ```
//!
//! answered by `{"id": 7, "status": "ok", "result": …}` or
//! `{"id": 7, "status": "error", "message": …}`.  Requests on one connection
//! are handled strictly in order, which preserves the order of an
//! enable/disable sequence all the way to the device link.  The forwarding
//! methods return `null` immediately; they do not wait for the device.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::application::proxy::MonInjProxy;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("{method}: expected {expected} parameters, got {got}")]
    ParamCount { method: &'static str, expected: usize, got: usize },
    #[error("{method}: bad parameter {index}: {source}")]
    BadParam {
        method: &'static str,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<u64>,
    method: String,
    #[serde(default)]
    params: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
enum RpcOutcome {
    #[serde(rename = "ok")]
    Ok { result: Value },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(flatten)]
    outcome: RpcOutcome,
}

pub struct RpcServer {
    proxy: Arc<MonInjProxy>,
}

impl RpcServer {
    pub fn new(proxy: Arc<MonInjProxy>) -> Self {
        Self { proxy }
    }

    /// Accept loop; runs until the listener fails fatally.
    pub async fn run(self, listener: TcpListener) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("rpc accept failed: {e}");
                    continue;
                }
            };
            debug!(%peer, "rpc client connected");
            let proxy = Arc::clone(&self.proxy);
            tokio::spawn(async move {
                handle_client(stream, proxy).await;
            });
        }
    }
}

async fn handle_client(stream: TcpStream, proxy: Arc<MonInjProxy>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                let outcome = match dispatch(&proxy, &request.method, &request.params) {
                    Ok(result) => RpcOutcome::Ok { result },
                    Err(e) => {
                        debug!(method = request.method, "rpc rejected: {e}");
                        RpcOutcome::Error { message: e.to_string() }
                    }
                };
                RpcResponse { id: request.id, outcome }
            }
            Err(e) => RpcResponse {
                id: None,
                outcome: RpcOutcome::Error { message: format!("malformed request: {e}") },
            },
        };
        let Ok(mut payload) = serde_json::to_string(&response) else { break };
        payload.push('\n');
        if write_half.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Executes one method against the proxy.  All methods are non-blocking.
fn dispatch(proxy: &MonInjProxy, method: &str, params: &[Value]) -> Result<Value, RpcError> {
    match method {
        "monitor_probe" => {
            expect_params("monitor_probe", params, 3)?;
            proxy.monitor_probe(
                param("monitor_probe", params, 0)?,
                param("monitor_probe", params, 1)?,
                param("monitor_probe", params, 2)?,
            );
            Ok(Value::Null)
        }
        "monitor_injection" => {
            expect_params("monitor_injection", params, 3)?;
            proxy.monitor_injection(
                param("monitor_injection", params, 0)?,
                param("monitor_injection", params, 1)?,
                param("monitor_injection", params, 2)?,
            );
            Ok(Value::Null)
        }
        "inject" => {
            expect_params("inject", params, 3)?;
            proxy.inject(
                param("inject", params, 0)?,
                param("inject", params, 1)?,
                param("inject", params, 2)?,
            );
            Ok(Value::Null)
        }
        "get_injection_status" => {
            expect_params("get_injection_status", params, 2)?;
            proxy.get_injection_status(
                param("get_injection_status", params, 0)?,
                param("get_injection_status", params, 1)?,
            );
            Ok(Value::Null)
        }
        "healthy" => {
            expect_params("healthy", params, 0)?;
            Ok(serde_json::to_value(proxy.healthy())
                .unwrap_or_else(|_| Value::String("unserializable health report".into())))
        }
        other => Err(RpcError::UnknownMethod(other.to_owned())),
    }
}

fn expect_params(method: &'static str, params: &[Value], expected: usize) -> Result<(), RpcError> {
    if params.len() != expected {
        return Err(RpcError::ParamCount { method, expected, got: params.len() });
    }
    Ok(())
}

fn param<T: serde::de::DeserializeOwned>(
    method: &'static str,
    params: &[Value],
    index: usize,
) -> Result<T, RpcError> {
    serde_json::from_value(params[index].clone())
        .map_err(|source| RpcError::BadParam { method, index, source })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
