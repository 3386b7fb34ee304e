use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::bitmask::PartitionBitmask;

/// One line of the completion log describing an upload file node.
///
/// Field order is part of the on-disk format. `partition_size` is optional
/// so logs written without it still replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadNodeRecord {
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub ftime: f64,
    pub bitmask: PartitionBitmask,
    #[serde(default)]
    pub upload_id: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub complete: bool,
    pub file_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_size: Option<u64>,
}

impl UploadNodeRecord {
    /// Encodes the record as a single JSON line (without the trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes one log line. Surrounding whitespace is ignored.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}
