//! Client-side adapters: the display bridge handed to the GUI collaborator,
//! the combined pubsub+RPC proxy link, and the upstream subscription.

pub mod display;
pub mod proxy_link;
pub mod rpc_client;
pub mod upstream;
