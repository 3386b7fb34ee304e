//! Per-file resume report built from a replayed completion table.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use partsync_transfer::{FileNode, UploadFileNode};

/// Where a logged file stands relative to the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Unchanged on disk and finalized remotely.
    Synced,
    /// Unchanged on disk, partitions outstanding.
    Resumable,
    /// Changed or missing on disk; the next run restarts it.
    Stale,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileState::Synced => "synced",
            FileState::Resumable => "resumable",
            FileState::Stale => "stale",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub state: FileState,
    pub size: u64,
    pub completed: u64,
    pub outstanding_partitions: u64,
    pub partitions: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub upload_id: Option<String>,
}

impl FileReport {
    pub async fn from_node(node: &UploadFileNode) -> Self {
        let identity = node.identity();
        let state = if !node.is_match().await {
            FileState::Stale
        } else if node.is_complete().await {
            FileState::Synced
        } else {
            FileState::Resumable
        };
        Self {
            path: identity.path.clone(),
            state,
            size: identity.size,
            completed: node.get_completed_size().await,
            outstanding_partitions: node.bitmask().await.count_set(),
            partitions: node.partition_count(),
            mtime: mtime_to_datetime(identity.mtime),
            upload_id: node.upload_id().await,
        }
    }
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<9} {:>10} / {:<10} {:>4}/{:<4} partitions left  {}",
            self.state,
            format_bytes(self.completed),
            format_bytes(self.size),
            self.outstanding_partitions,
            self.partitions,
            self.path.display(),
        )?;
        if let Some(mtime) = self.mtime {
            write!(f, "  (mtime {})", mtime.format("%Y-%m-%d %H:%M:%S"))?;
        }
        if let Some(id) = &self.upload_id {
            write!(f, "  [upload {id}]")?;
        }
        Ok(())
    }
}

/// Totals across all reports.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub synced: usize,
    pub resumable: usize,
    pub stale: usize,
    pub resumable_bytes: u64,
}

impl Summary {
    pub fn from_reports(reports: &[FileReport]) -> Self {
        let mut summary = Self::default();
        for r in reports {
            match r.state {
                FileState::Synced => summary.synced += 1,
                FileState::Resumable => {
                    summary.resumable += 1;
                    summary.resumable_bytes += r.completed;
                }
                FileState::Stale => summary.stale += 1,
            }
        }
        summary
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} synced, {} resumable ({} already sent), {} stale",
            self.synced,
            self.resumable,
            format_bytes(self.resumable_bytes),
            self.stale
        )
    }
}

fn mtime_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Formats a byte count with a binary unit suffix.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
