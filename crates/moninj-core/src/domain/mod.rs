//! Channel descriptors and the configuration reconciler.
//!
//! Pure domain logic with no I/O: [`reconcile::reconcile`] maps a
//! configuration tree onto an immutable descriptor set; the caller diffs
//! consecutive sets to drive per-channel subscription lifecycles.

pub mod descriptor;
pub mod reconcile;

pub use descriptor::{ChannelDescriptor, ChannelKind, ChannelUid, ProxyEndpoint, SynthVariant};
pub use reconcile::{device_host, reconcile, ReconcileOutcome};
