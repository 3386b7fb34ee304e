use serde::{Deserialize, Serialize};

/// Aggregate progress counters for a transfer job.
///
/// Counters are signed: callers undo a previously counted partition with a
/// negative delta, so intermediate values may briefly dip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub completed_bytes: i64,
    pub failed_bytes: i64,
    pub total_bytes: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub total_count: i64,
}

impl TransferProgress {
    /// A fresh job covering `total_bytes` across `total_count` files.
    pub fn with_totals(total_bytes: i64, total_count: i64) -> Self {
        Self {
            total_bytes,
            total_count,
            ..Default::default()
        }
    }

    /// Bytes neither completed nor failed yet.
    pub fn remaining_bytes(&self) -> i64 {
        (self.total_bytes - self.completed_bytes - self.failed_bytes).max(0)
    }

    /// Whether every file has either completed or failed.
    pub fn is_drained(&self) -> bool {
        self.completed_count + self.failed_count >= self.total_count
    }
}
