//! Diff operations exchanged on a synchronization stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One operation on a synchronization stream.
///
/// `Init` replaces the subscriber's mirror wholesale; `SetItem` descends the
/// mirror along `path` and assigns `key = value`.  Path elements and keys are
/// JSON values so the same stream format serves both the typed canonical
/// state tree (integer-keyed) and the free-form configuration tree
/// (string-keyed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum SyncOp {
    /// Full snapshot of the tree, delivered on attach (or on the rare
    /// reinitialization of an existing stream).
    #[serde(rename = "init")]
    Init { value: Value },
    /// One leaf mutation.
    #[serde(rename = "setitem")]
    SetItem { path: Vec<Value>, key: Value, value: Value },
}

impl SyncOp {
    /// Serializes the operation as one newline-terminated JSON line.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).expect("SyncOp serialization cannot fail");
        line.push('\n');
        line
    }

    /// Parses one JSON line into an operation.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error for malformed lines.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}
