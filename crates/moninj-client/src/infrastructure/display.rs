//! Display object bridge.
//!
//! The device manager owns no rendering logic; it describes channel displays
//! through this seam and an external GUI collaborator does the drawing.  The
//! shipped implementation forwards every call onto an mpsc channel, which the
//! binary drains into structured logs and a GUI process would drain into
//! widgets.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

/// Opaque identity of one display object, assigned by the bridge.
pub type DisplayHandle = u64;

/// Which widget class to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisplayKind {
    Ttl,
    Dds,
    Dac,
    Synth,
}

/// Static creation arguments for a display object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplaySpec {
    /// Display title, the channel uid rendered as text.
    pub title: String,
    /// Free-text tooltip from the configuration entry.
    pub comment: Option<String>,
}

/// Typed field updated on a display object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisplayField {
    /// Whether the underlying proxy link is usable; displays grey out while
    /// it is down.
    Enabled,
    Level,
    OutputEnable,
    Override,
    OverrideLevel,
    Value,
    Frequency,
    Register,
    DataHigh,
    DataLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum DisplayValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

/// The seam between the device manager and the rendering collaborator.
#[cfg_attr(test, mockall::automock)]
pub trait DisplayBridge: Send {
    fn create(&mut self, kind: DisplayKind, spec: DisplaySpec) -> DisplayHandle;
    fn update(&mut self, handle: DisplayHandle, field: DisplayField, value: DisplayValue);
    fn destroy(&mut self, handle: DisplayHandle);
}

/// One forwarded bridge call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DisplayCommand {
    Create { handle: DisplayHandle, kind: DisplayKind, spec: DisplaySpec },
    Update { handle: DisplayHandle, field: DisplayField, value: DisplayValue },
    Destroy { handle: DisplayHandle },
}

/// Channel-backed bridge implementation.
pub struct ChannelDisplayBridge {
    next_handle: DisplayHandle,
    tx: mpsc::UnboundedSender<DisplayCommand>,
}

impl ChannelDisplayBridge {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DisplayCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { next_handle: 1, tx }, rx)
    }

    fn forward(&self, command: DisplayCommand) {
        if self.tx.send(command).is_err() {
            warn!("display consumer gone, dropping command");
        }
    }
}

impl DisplayBridge for ChannelDisplayBridge {
    fn create(&mut self, kind: DisplayKind, spec: DisplaySpec) -> DisplayHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.forward(DisplayCommand::Create { handle, kind, spec });
        handle
    }

    fn update(&mut self, handle: DisplayHandle, field: DisplayField, value: DisplayValue) {
        self.forward(DisplayCommand::Update { handle, field, value });
    }

    fn destroy(&mut self, handle: DisplayHandle) {
        self.forward(DisplayCommand::Destroy { handle });
    }
}
