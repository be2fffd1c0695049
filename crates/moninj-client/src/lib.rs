//! # moninj-client
//!
//! Headless observer for MonInj-Over-IP.  It follows the upstream
//! configuration tree and the proxy's canonical state tree, keeps a set of
//! typed per-channel display objects in lock-step with both, and drives the
//! per-kind enable/disable subscription sequences over the proxy RPC link.
//!
//! Layers:
//!
//! - **`application`** – the [`application::device_manager::DeviceManager`]:
//!   descriptor diffing, subscription lifecycles, typed display dispatch.
//! - **`infrastructure`** – display bridge, proxy pubsub+RPC link, upstream
//!   configuration subscriber.

pub mod application;
pub mod config;
pub mod infrastructure;
