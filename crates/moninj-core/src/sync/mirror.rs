//! Client side of the synchronization protocol.
//!
//! Two appliers are provided:
//!
//! - [`StateMirror`] rebuilds the proxy's typed canonical tree and classifies
//!   each applied operation into exactly one [`MirrorUpdate`], which is the
//!   client device manager's trigger for display updates.
//! - [`JsonMirror`] maintains a free-form JSON tree (the configuration
//!   database), where consumers simply re-read the whole tree on every
//!   change notification.
//!
//! Both appliers ignore unknown or mismatched paths defensively; a stream
//! from a newer peer must never crash an older observer.

use serde_json::Value;
use tracing::warn;

use crate::sync::notifier::{ConnectionSide, StateTree};
use crate::sync::ops::SyncOp;

/// Typed classification of one applied operation, for callback wiring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MirrorUpdate {
    /// An `init` snapshot replaced the mirror wholesale.  The caller should
    /// replay the snapshot through [`StateMirror::tree`].
    Reinitialized,
    /// A monitor leaf changed.
    Monitor { channel: u32, probe: u8, value: i64 },
    /// An injection-status leaf changed.
    InjectionStatus { channel: u32, overrd: u8, value: i8 },
    /// A connection liveness flag changed.
    Connectivity { side: ConnectionSide, up: bool },
}

/// Local mirror of the proxy's canonical state tree.
#[derive(Debug, Default)]
pub struct StateMirror {
    tree: StateTree,
}

impl StateMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mirrored tree as of the last applied operation.
    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    /// Applies one operation and classifies it.
    ///
    /// Returns `None` for operations that touch no recognized region; such
    /// operations are ignored, not errors.
    pub fn apply(&mut self, op: SyncOp) -> Option<MirrorUpdate> {
        match op {
            SyncOp::Init { value } => match serde_json::from_value::<StateTree>(value) {
                Ok(tree) => {
                    self.tree = tree;
                    Some(MirrorUpdate::Reinitialized)
                }
                Err(e) => {
                    warn!("discarding malformed init snapshot: {e}");
                    None
                }
            },
            SyncOp::SetItem { path, key, value } => self.apply_setitem(&path, &key, &value),
        }
    }

    fn apply_setitem(&mut self, path: &[Value], key: &Value, value: &Value) -> Option<MirrorUpdate> {
        match path.first().and_then(Value::as_str) {
            Some("monitor") if path.len() == 2 => {
                let channel = path[1].as_u64()? as u32;
                let probe = key.as_u64()? as u8;
                let value = value.as_i64()?;
                self.tree.monitor.entry(channel).or_default().insert(probe, value);
                Some(MirrorUpdate::Monitor { channel, probe, value })
            }
            Some("injection_status") if path.len() == 2 => {
                let channel = path[1].as_u64()? as u32;
                let overrd = key.as_u64()? as u8;
                let value = value.as_i64()? as i8;
                self.tree.injection_status.entry(channel).or_default().insert(overrd, value);
                Some(MirrorUpdate::InjectionStatus { channel, overrd, value })
            }
            Some("connection") if path.len() == 1 => {
                let up = value.as_bool()?;
                let side = match key.as_str()? {
                    "device_link" => ConnectionSide::DeviceLink,
                    "upstream" => ConnectionSide::Upstream,
                    _ => return None,
                };
                match side {
                    ConnectionSide::DeviceLink => self.tree.connection.device_link = up,
                    ConnectionSide::Upstream => self.tree.connection.upstream = up,
                }
                Some(MirrorUpdate::Connectivity { side, up })
            }
            _ => None,
        }
    }

    /// Replays the current snapshot as a sequence of updates, in region order
    /// then key order.  Used after [`MirrorUpdate::Reinitialized`] to bring
    /// per-channel displays up to date.
    pub fn replay(&self) -> Vec<MirrorUpdate> {
        let mut updates = Vec::new();
        for (&channel, probes) in &self.tree.monitor {
            for (&probe, &value) in probes {
                updates.push(MirrorUpdate::Monitor { channel, probe, value });
            }
        }
        for (&channel, slots) in &self.tree.injection_status {
            for (&overrd, &value) in slots {
                updates.push(MirrorUpdate::InjectionStatus { channel, overrd, value });
            }
        }
        updates
    }
}

/// Mirror of a free-form JSON tree, used for the configuration database.
#[derive(Debug)]
pub struct JsonMirror {
    tree: Value,
}

impl Default for JsonMirror {
    fn default() -> Self {
        Self { tree: Value::Object(Default::default()) }
    }
}

impl JsonMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mirrored tree as of the last applied operation.
    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// Applies one operation.  Returns `true` if the mirror changed, so the
    /// caller knows a re-read is worthwhile.  Path mismatches are ignored.
    pub fn apply(&mut self, op: SyncOp) -> bool {
        match op {
            SyncOp::Init { value } => {
                self.tree = value;
                true
            }
            SyncOp::SetItem { path, key, value } => {
                let mut target = &mut self.tree;
                for seg in &path {
                    let next = match (&mut *target, seg.as_str()) {
                        (Value::Object(map), Some(s)) => map.get_mut(s),
                        _ => None,
                    };
                    match next {
                        Some(v) => target = v,
                        None => return false,
                    }
                }
                match (target, key.as_str()) {
                    (Value::Object(map), Some(k)) => {
                        map.insert(k.to_owned(), value);
                        true
                    }
                    _ => false,
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
