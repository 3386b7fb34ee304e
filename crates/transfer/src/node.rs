use std::fs::Metadata;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::TransferError;

/// What a tracked file looked like on disk when tracking started.
///
/// Size plus modification time is the usual sync-tool heuristic for "still
/// the same file".
#[derive(Debug, Clone, PartialEq)]
pub struct FileIdentity {
    pub path: PathBuf,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub mtime: f64,
}

impl FileIdentity {
    /// Reads the identity of the regular file at `path`.
    ///
    /// Missing paths and anything that is not a regular file yield
    /// [`TransferError::InvalidPath`].
    pub async fn from_disk(path: &Path) -> Result<Self, TransferError> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::InvalidPath(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(TransferError::InvalidPath(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            size: meta.len(),
            mtime: mtime_secs(&meta)?,
        })
    }

    /// Whether the file on disk still has the recorded size and mtime.
    pub async fn matches_disk(&self) -> bool {
        match Self::from_disk(&self.path).await {
            Ok(current) => current.size == self.size && current.mtime == self.mtime,
            Err(_) => false,
        }
    }
}

fn mtime_secs(meta: &Metadata) -> std::io::Result<f64> {
    let modified = meta.modified()?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    })
}

/// A file tracked by a [`CompletionTable`](crate::CompletionTable).
///
/// Implementations guard their mutable state with an async lock; the
/// identity is fixed at construction.
pub trait FileNode: Send + Sync + Sized + 'static {
    /// The log line representation.
    type Record: Serialize + DeserializeOwned + Send;

    /// A fresh node with every partition outstanding.
    fn new(identity: FileIdentity, partition_size: u64) -> Self;

    /// Rebuilds a node from a replayed log record.
    fn from_record(record: Self::Record, partition_size: u64) -> Result<Self, TransferError>;

    fn identity(&self) -> &FileIdentity;

    /// Snapshot of the persisted field subset.
    fn to_record(&self) -> impl Future<Output = Self::Record> + Send;

    /// Whether anything changed since creation or replay.
    fn is_dirty(&self) -> impl Future<Output = bool> + Send;

    /// Same file on disk and confirmed complete remotely.
    fn is_sync(&self) -> impl Future<Output = bool> + Send;

    /// Bytes covered by completed partitions.
    fn completed_size(&self) -> impl Future<Output = u64> + Send;

    fn path(&self) -> &Path {
        &self.identity().path
    }

    /// Same file on disk as when tracking started.
    fn is_match(&self) -> impl Future<Output = bool> + Send {
        self.identity().matches_disk()
    }

    /// Encodes the node as one log line (no trailing newline).
    fn serialize(&self) -> impl Future<Output = Result<String, TransferError>> + Send {
        async move { Ok(serde_json::to_string(&self.to_record().await)?) }
    }

    /// Decodes one log line.
    fn deserialize(line: &str, partition_size: u64) -> Result<Self, TransferError> {
        let record = serde_json::from_str(line.trim())?;
        Self::from_record(record, partition_size)
    }
}
