//! TOML configuration for the client binary.
//!
//! Loaded from the path in `MONINJ_CLIENT_CONFIG` (default `client.toml`);
//! a missing file yields the defaults.  The proxy endpoint itself is not
//! configured here — it is extracted from the configuration tree the
//! upstream publishes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub upstream: UpstreamSection,
}

/// Where the upstream configuration publisher lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_upstream_host")]
    pub host: String,
    #[serde(default = "default_notify_port")]
    pub notify_port: u16,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self { host: default_upstream_host(), notify_port: default_notify_port() }
    }
}

fn default_upstream_host() -> String {
    "::1".to_owned()
}
fn default_notify_port() -> u16 {
    3250
}

impl ClientConfig {
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
