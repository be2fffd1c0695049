//! Network-facing adapters: the device link, the two listeners exposed to
//! observers, and the upstream configuration subscription.

pub mod device_link;
pub mod publisher;
pub mod rpc;
pub mod upstream;
