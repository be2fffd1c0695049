//! Application layer: the device manager that keeps display objects in
//! lock-step with the configuration and the proxy's canonical tree.

pub mod device_manager;

pub use device_manager::{run, ClientEvent, DeviceManager};
