//! Generic retry/backoff loop around a connect operation.
//!
//! One [`Reconnector`] task manages one link for its whole lifetime:
//!
//! ```text
//!            wake                    connect ok
//!   idle ──────────► connecting ─────────────────► connected
//!    ▲                  │    ▲                         │
//!    │       connect err│    │ after backoff wait      │ wake (link torn
//!    │                  ▼    │ (self-wake)             │  down first)
//!    │               backoff ┘                         │
//!    └──────────── shutdown from any state ◄───────────┘
//! ```
//!
//! The wake signal is a capacity-1 channel written with `try_send`, so any
//! number of signals arriving before the loop consumes one coalesce into a
//! single retry.  Shutdown closes an open link, interrupts an in-progress
//! wait or connect attempt, and never re-arms.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Observable state of one managed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Backoff,
}

/// Errors surfaced by a connect attempt.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No endpoint is configured yet; the loop parks in `idle` without
    /// backing off and waits for the next wake.
    #[error("link endpoint not configured")]
    NotConfigured,
    /// The connection attempt failed; the loop backs off and retries.
    #[error("connect failed: {0}")]
    Connect(#[from] std::io::Error),
    /// The peer violated the link protocol during the handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// An established link that the reconnector can tear down.
#[async_trait]
pub trait ManagedLink: Send {
    /// Closes the link.  Must be idempotent and must stop delivery of any
    /// further callbacks from this link instance before returning.
    async fn close(&mut self);
}

/// The connect operation wrapped by a [`Reconnector`].
#[async_trait]
pub trait Connector: Send + 'static {
    type Link: ManagedLink + 'static;

    /// One connection attempt, including any handshake and the installation
    /// of the link into whatever shared slot the owner reads RPCs from.
    async fn connect(&mut self) -> Result<Self::Link, LinkError>;
}

/// Wait before retrying a failed connection attempt.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(10);

/// Cloneable handle that delivers wake signals to one reconnection loop.
///
/// Signals coalesce exactly like [`Reconnector::wake`]; handles stay valid
/// (and become no-ops) after the loop terminates.
#[derive(Clone)]
pub struct WakeHandle(mpsc::Sender<()>);

impl WakeHandle {
    pub fn wake(&self) {
        let _ = self.0.try_send(());
    }

    /// A free-standing handle paired with its receiving end, for event loops
    /// (or tests) that route wake signals themselves instead of going through
    /// a [`Reconnector`].
    pub fn pair() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self(tx), rx)
    }
}

/// Handle to one perpetual reconnection task.
pub struct Reconnector {
    wake_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<LinkState>,
    task: JoinHandle<()>,
}

impl Reconnector {
    /// Spawns the reconnection loop for `connector`.
    ///
    /// The loop starts in `idle` and does nothing until the first [`wake`].
    ///
    /// [`wake`]: Reconnector::wake
    pub fn spawn<C: Connector>(name: &'static str, mut connector: C, backoff: Duration) -> Self {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);
        let self_wake = wake_tx.clone();

        let task = tokio::spawn(async move {
            let mut link: Option<C::Link> = None;
            'main: loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break 'main,
                    recv = wake_rx.recv() => {
                        if recv.is_none() {
                            break 'main;
                        }
                    }
                }
                // Coalesce wake signals that raced with the one just taken.
                while wake_rx.try_recv().is_ok() {}

                if let Some(mut old) = link.take() {
                    debug!(link = name, "tearing down superseded link");
                    old.close().await;
                }

                let _ = state_tx.send(LinkState::Connecting);
                let attempt = tokio::select! {
                    _ = shutdown_rx.recv() => break 'main,
                    attempt = connector.connect() => attempt,
                };
                match attempt {
                    Ok(new_link) => {
                        info!(link = name, "connected");
                        link = Some(new_link);
                        let _ = state_tx.send(LinkState::Connected);
                    }
                    Err(LinkError::NotConfigured) => {
                        debug!(link = name, "no endpoint configured, waiting");
                        let _ = state_tx.send(LinkState::Idle);
                    }
                    Err(e) => {
                        warn!(link = name, "connect failed, retrying in {backoff:?}: {e}");
                        let _ = state_tx.send(LinkState::Backoff);
                        tokio::select! {
                            _ = shutdown_rx.recv() => break 'main,
                            _ = tokio::time::sleep(backoff) => {
                                let _ = self_wake.try_send(());
                            }
                        }
                    }
                }
            }
            if let Some(mut l) = link.take() {
                l.close().await;
            }
            let _ = state_tx.send(LinkState::Idle);
            debug!(link = name, "reconnector terminated");
        });

        Self { wake_tx, shutdown_tx, state_rx, task }
    }

    /// Signals the loop to (re)connect.  Signals sent while one is already
    /// pending coalesce into a single retry.
    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// Current link state, read without blocking.
    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    /// `true` while a link is established.
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// A watch receiver for callers that want to await state transitions.
    pub fn state_watch(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// A cloneable wake handle for event loops that outlive this reference.
    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle(self.wake_tx.clone())
    }

    /// Terminates the loop, closing any open link.  Idempotent from the
    /// caller's perspective; pending waits and connect attempts are
    /// interrupted promptly.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.try_send(());
        let _ = self.task.await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
