//! Completion tracking for multipart file transfers.
//!
//! Files are split into fixed-size partitions that transfer independently
//! and concurrently. This crate keeps the per-file partition state, the
//! job-wide progress counters, and an append-only log that lets an
//! interrupted job resume where it stopped. The network calls themselves
//! belong to the caller's transfer executor.

use std::path::PathBuf;

mod checksum;
mod config;
mod node;
mod progress;
mod table;
mod upload;

pub use checksum::{calculate_file_checksum, checksum_bytes};
pub use config::{ENV_PROGRESS_UPDATE_FREQUENCY, ENV_TABLE_FILE, TransferConfig};
pub use node::{FileIdentity, FileNode};
pub use progress::{AsyncTransferProgress, ProgressCallback};
pub use table::{CompletionTable, UploadCompletionTable};
pub use upload::UploadFileNode;

pub use partsync_protocol::{PartitionBitmask, TransferProgress, UploadNodeRecord};

/// Contractual partition size shared with the remote store: 500 MB.
///
/// Bitmasks are only meaningful under the size they were computed with.
pub const DEFAULT_PARTITION_SIZE: u64 = 500_000_000;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("completion log {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt completion log {} at line {line}: {source}", path.display())]
    CorruptLog {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{}: recorded with partition size {found}, expected {expected}", path.display())]
    PartitionSizeMismatch {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("{}: bitmask spans {bits} bits but the file has {partitions} partitions", path.display())]
    BitmaskOverflow {
        path: PathBuf,
        bits: u64,
        partitions: u64,
    },

    #[error("partition size must be greater than zero")]
    InvalidPartitionSize,

    #[error("{} cannot be marked complete before all partitions and the hash are done", .0.display())]
    NotReady(PathBuf),
}
