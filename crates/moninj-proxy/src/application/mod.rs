//! Application layer: the proxy bridge between the device link and the
//! published state tree.

pub mod proxy;

pub use proxy::{DeviceHandle, HealthReport, MonInjProxy, ProxyEvent};
