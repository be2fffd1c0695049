//! TOML configuration for the proxy binary.
//!
//! Loaded from the path in `MONINJ_PROXY_CONFIG` (default `proxy.toml`).
//! A missing file yields the built-in defaults so the proxy can start on a
//! bare machine; every field carries a serde default for the same reason
//! when upgrading from an older file.
//!
//! ```toml
//! [upstream]
//! host = "::1"
//! notify_port = 3250
//!
//! [device]
//! port = 1383
//!
//! [bind]
//! address = "0.0.0.0"
//! pubsub_port = 2383
//! rpc_port = 2384
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level proxy configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub bind: BindSection,
}

/// Where the upstream configuration publisher lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_upstream_host")]
    pub host: String,
    #[serde(default = "default_notify_port")]
    pub notify_port: u16,
}

/// Device-link parameters.  The device host comes from the configuration
/// tree at runtime; only the port is static.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSection {
    #[serde(default = "default_device_port")]
    pub port: u16,
}

/// Listener addresses exposed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindSection {
    #[serde(default = "default_bind_address")]
    pub address: String,
    #[serde(default = "default_pubsub_port")]
    pub pubsub_port: u16,
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self { host: default_upstream_host(), notify_port: default_notify_port() }
    }
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self { port: default_device_port() }
    }
}

impl Default for BindSection {
    fn default() -> Self {
        Self {
            address: default_bind_address(),
            pubsub_port: default_pubsub_port(),
            rpc_port: default_rpc_port(),
        }
    }
}

fn default_upstream_host() -> String {
    "::1".to_owned()
}
fn default_notify_port() -> u16 {
    3250
}
fn default_device_port() -> u16 {
    1383
}
fn default_bind_address() -> String {
    "0.0.0.0".to_owned()
}
fn default_pubsub_port() -> u16 {
    2383
}
fn default_rpc_port() -> u16 {
    2384
}

impl ProxyConfig {
    /// Loads the configuration, falling back to defaults when the file does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unreadable or unparsable files.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io { path: path.display().to_string(), source: e }),
        }
    }
}
