//! Server side of the synchronization protocol: the canonical state tree and
//! the change-tracked [`Notifier`] that republishes it.
//!
//! The tree is strongly typed with three top-level regions (`monitor`,
//! `injection_status`, `connection`); raw path lists appear only in the wire
//! operations the notifier constructs.  All leaves are scalar.
//!
//! # Ordering guarantee
//!
//! For any sequence of mutations M1..Mn, every subscriber attached before M1
//! observes exactly M1..Mn in order; a subscriber attached between Mi and
//! Mi+1 observes an `init` equivalent to "tree after M1..Mi" followed by
//! Mi+1..Mn in order.  This holds because `attach` queues the snapshot into
//! the subscriber's channel before returning, and every later mutation pushes
//! its operation into the same FIFO channel under the same exclusive borrow.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::sync::ops::SyncOp;

/// Identifies one of the two links whose liveness the proxy republishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSide {
    /// The proxy's connection to the embedded hardware controller.
    DeviceLink,
    /// The proxy's subscription to the upstream configuration publisher.
    Upstream,
}

impl ConnectionSide {
    /// The key used for this side in the `connection` region.
    pub fn key(self) -> &'static str {
        match self {
            ConnectionSide::DeviceLink => "device_link",
            ConnectionSide::Upstream => "upstream",
        }
    }
}

/// Liveness flags of the proxy's two links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionFlags {
    pub device_link: bool,
    pub upstream: bool,
}

/// The canonical device-state tree owned by the proxy.
///
/// `BTreeMap` keeps region iteration deterministic, which makes snapshot
/// serialization and test assertions stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateTree {
    /// `channel → probe → value` for every monitored probe.
    pub monitor: BTreeMap<u32, BTreeMap<u8, i64>>,
    /// `channel → override → value` for every monitored override slot.
    pub injection_status: BTreeMap<u32, BTreeMap<u8, i8>>,
    /// Liveness of the device link and the upstream subscription.
    pub connection: ConnectionFlags,
}

struct SubscriberSlot {
    id: Uuid,
    tx: mpsc::UnboundedSender<SyncOp>,
}

/// Change-tracked wrapper around the [`StateTree`].
///
/// Each mutator that actually changes a value constructs the corresponding
/// `setitem` operation and delivers it, in call order, to every attached
/// subscriber.  Subscribers whose channel is closed are detached on the next
/// broadcast.
#[derive(Default)]
pub struct Notifier {
    tree: StateTree,
    subscribers: Vec<SubscriberSlot>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of the current tree.
    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    /// Attaches a new subscriber.
    ///
    /// The returned receiver yields an `init` snapshot of the tree as it is
    /// right now, strictly before any operation generated after this call.
    pub fn attach(&mut self) -> (Uuid, mpsc::UnboundedReceiver<SyncOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let snapshot =
            serde_json::to_value(&self.tree).expect("StateTree serialization cannot fail");
        // Queued before the slot is registered, so no later setitem can
        // overtake the snapshot.
        let _ = tx.send(SyncOp::Init { value: snapshot });
        self.subscribers.push(SubscriberSlot { id, tx });
        debug!(subscriber = %id, "subscriber attached");
        (id, rx)
    }

    /// Detaches a subscriber explicitly.  Dropping the receiver has the same
    /// effect on the next broadcast.
    pub fn detach(&mut self, id: Uuid) {
        self.subscribers.retain(|s| s.id != id);
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Records a monitor reading, creating the per-channel map on first use.
    pub fn set_monitor(&mut self, channel: u32, probe: u8, value: i64) {
        let slot = self.tree.monitor.entry(channel).or_default().entry(probe);
        let changed = match &slot {
            std::collections::btree_map::Entry::Occupied(e) => *e.get() != value,
            std::collections::btree_map::Entry::Vacant(_) => true,
        };
        if changed {
            slot.and_modify(|v| *v = value).or_insert(value);
            self.broadcast(SyncOp::SetItem {
                path: vec![json!("monitor"), json!(channel)],
                key: json!(probe),
                value: json!(value),
            });
        }
    }

    /// Records an injection-status report.
    pub fn set_injection_status(&mut self, channel: u32, overrd: u8, value: i8) {
        let slot = self.tree.injection_status.entry(channel).or_default().entry(overrd);
        let changed = match &slot {
            std::collections::btree_map::Entry::Occupied(e) => *e.get() != value,
            std::collections::btree_map::Entry::Vacant(_) => true,
        };
        if changed {
            slot.and_modify(|v| *v = value).or_insert(value);
            self.broadcast(SyncOp::SetItem {
                path: vec![json!("injection_status"), json!(channel)],
                key: json!(overrd),
                value: json!(value),
            });
        }
    }

    /// Records a link liveness transition.
    pub fn set_connection(&mut self, side: ConnectionSide, up: bool) {
        let flag = match side {
            ConnectionSide::DeviceLink => &mut self.tree.connection.device_link,
            ConnectionSide::Upstream => &mut self.tree.connection.upstream,
        };
        if *flag != up {
            *flag = up;
            self.broadcast(SyncOp::SetItem {
                path: vec![json!("connection")],
                key: json!(side.key()),
                value: json!(up),
            });
        }
    }

    fn broadcast(&mut self, op: SyncOp) {
        self.subscribers.retain(|s| {
            if s.tx.send(op.clone()).is_ok() {
                true
            } else {
                debug!(subscriber = %s.id, "subscriber gone, detaching");
                false
            }
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
