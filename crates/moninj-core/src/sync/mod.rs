//! Incremental synchronization protocol: a change-tracked server tree that
//! emits ordered diffs, and client-side appliers that rebuild a mirror from
//! an `init` snapshot followed by `setitem` operations.
//!
//! # Wire contract
//!
//! A subscriber first receives one `init` operation carrying a full snapshot
//! of the tree, then an unbounded stream of `setitem` operations, each
//! addressing one leaf by path.  Operations are totally ordered per
//! subscriber: applying them in receipt order reconstructs the server tree
//! exactly as it was when each operation was generated.
//!
//! Operations travel as newline-delimited JSON, one [`ops::SyncOp`] per line.

pub mod mirror;
pub mod notifier;
pub mod ops;

pub use mirror::{JsonMirror, MirrorUpdate, StateMirror};
pub use notifier::{ConnectionSide, Notifier, StateTree};
pub use ops::SyncOp;
