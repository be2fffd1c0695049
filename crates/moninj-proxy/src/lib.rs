//! # moninj-proxy
//!
//! The proxy holds the single connection to the embedded hardware controller
//! and republishes its monitor/inject state to any number of decoupled
//! observers through the synchronization protocol, while forwarding their
//! control calls back onto the device link.
//!
//! Layers:
//!
//! - **`application`** – the [`application::proxy::MonInjProxy`] bridge:
//!   canonical tree ownership, event handling, forwarding RPCs, health
//!   classification.
//! - **`infrastructure`** – device link adapter, state publisher, RPC
//!   server, upstream configuration subscriber.

pub mod application;
pub mod config;
pub mod infrastructure;
