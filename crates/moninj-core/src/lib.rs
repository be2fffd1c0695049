//! # moninj-core
//!
//! Shared library for MonInj-Over-IP containing the device-link wire codec,
//! the incremental synchronization (snapshot + ordered diff) protocol, the
//! channel descriptor model with its reconciliation algorithm, and the
//! generic reconnector state machine.
//!
//! This crate is used by both the proxy and client applications.
//! It has no dependency on rendering code or on any concrete hardware
//! description; the device link is treated as an opaque binary peer.
//!
//! # Architecture overview
//!
//! MonInj-Over-IP distributes the live monitor/inject state of a lab
//! instrument controller to any number of decoupled observers.  One *proxy*
//! process holds the single connection to the embedded controller and
//! republishes its state; *client* processes subscribe and drive typed
//! per-channel subscription lifecycles.
//!
//! This crate defines:
//!
//! - **`protocol`** – the binary monitor/inject frames spoken on the device
//!   link, plus the probe and override constant tables.
//!
//! - **`sync`** – the change-tracked server tree ([`sync::Notifier`]) that
//!   emits ordered diffs, and the client-side appliers that rebuild an exact
//!   mirror from an `init` snapshot followed by `setitem` operations.
//!
//! - **`domain`** – channel descriptors and the pure reconciliation function
//!   that maps a configuration tree onto a descriptor set.
//!
//! - **`reconnect`** – the retry/backoff loop shared by every managed link
//!   (proxy↔device, proxy↔upstream, client↔proxy).

pub mod domain;
pub mod protocol;
pub mod reconnect;
pub mod sync;

// Re-export the most-used types at the crate root so callers can write
// `moninj_core::ChannelDescriptor` instead of the full module path.
pub use domain::descriptor::{ChannelDescriptor, ChannelKind, ChannelUid, ProxyEndpoint, SynthVariant};
pub use domain::reconcile::{device_host, reconcile, ReconcileOutcome};
pub use protocol::codec::{decode_event, encode_command, ProtocolError};
pub use protocol::messages::{DeviceCommand, DeviceEvent};
pub use reconnect::{Connector, LinkError, LinkState, ManagedLink, Reconnector, WakeHandle};
pub use sync::mirror::{JsonMirror, MirrorUpdate, StateMirror};
pub use sync::notifier::{ConnectionSide, Notifier, StateTree};
pub use sync::ops::SyncOp;
