//! In-memory registry of in-flight file nodes backed by an append-only log.
//!
//! The table only holds files that have not been durably flushed yet. A
//! node is logged and evicted once its file is done, so memory is bounded
//! by in-flight work. On restart the log is replayed line by line; a later
//! line for a path supersedes every earlier one.
//!
//! At most one coordinating task may work on a given path at a time.
//! Concurrent `create_file_node` calls for the same path must be prevented
//! by the caller's per-path dispatch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::TransferError;
use crate::config::TransferConfig;
use crate::node::{FileIdentity, FileNode};
use crate::upload::UploadFileNode;

/// Completion table for multipart uploads.
pub type UploadCompletionTable = CompletionTable<UploadFileNode>;

/// Authoritative map from file path to tracked node.
pub struct CompletionTable<N: FileNode> {
    table: Mutex<HashMap<PathBuf, Arc<N>>>,
    table_file: Option<PathBuf>,
    partition_size: u64,
    sync_on_flush: bool,
    /// Serializes appends so lines never interleave.
    writer: Mutex<()>,
}

impl<N: FileNode> CompletionTable<N> {
    /// Creates an empty table. Without a `table_file` nothing is persisted.
    ///
    /// # Panics
    ///
    /// Panics if `partition_size` is zero. Use [`try_new`](Self::try_new)
    /// when the size comes from outside the program.
    pub fn new(table_file: Option<PathBuf>, partition_size: u64) -> Self {
        match Self::try_new(table_file, partition_size) {
            Ok(table) => table,
            Err(e) => panic!("{e}"),
        }
    }

    /// Creates an empty table, rejecting a zero `partition_size`.
    pub fn try_new(table_file: Option<PathBuf>, partition_size: u64) -> Result<Self, TransferError> {
        if partition_size == 0 {
            return Err(TransferError::InvalidPartitionSize);
        }
        Ok(Self {
            table: Mutex::new(HashMap::new()),
            table_file,
            partition_size,
            sync_on_flush: true,
            writer: Mutex::new(()),
        })
    }

    /// Creates an empty table from a [`TransferConfig`].
    pub fn from_config(config: &TransferConfig) -> Result<Self, TransferError> {
        Ok(Self::try_new(config.table_file.clone(), config.partition_size)?
            .with_sync_on_flush(config.sync_on_flush))
    }

    /// Whether each append is followed by `fsync` (default `true`).
    pub fn with_sync_on_flush(mut self, sync: bool) -> Self {
        self.sync_on_flush = sync;
        self
    }

    pub fn partition_size(&self) -> u64 {
        self.partition_size
    }

    pub fn table_file(&self) -> Option<&Path> {
        self.table_file.as_deref()
    }

    /// Number of tracked nodes.
    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.is_empty()
    }

    /// All tracked nodes, in no particular order.
    pub async fn nodes(&self) -> Vec<Arc<N>> {
        self.table.lock().await.values().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Node lifecycle
    // -----------------------------------------------------------------------

    /// Starts tracking `path` from scratch, replacing any existing entry.
    ///
    /// Fails with [`TransferError::InvalidPath`] unless `path` is an
    /// existing regular file.
    pub async fn create_file_node(&self, path: &Path) -> Result<Arc<N>, TransferError> {
        let identity = FileIdentity::from_disk(path).await?;
        let node = Arc::new(N::new(identity, self.partition_size));
        self.table
            .lock()
            .await
            .insert(path.to_path_buf(), Arc::clone(&node));
        tracing::debug!(path = %path.display(), "tracking new file");
        Ok(node)
    }

    /// Returns the tracked node for `path`, if any.
    pub async fn get_file_node(&self, path: &Path) -> Option<Arc<N>> {
        self.table.lock().await.get(path).cloned()
    }

    /// Whether `path` is tracked and its node still matches the disk.
    pub async fn is_file_match(&self, path: &Path) -> bool {
        match self.get_file_node(path).await {
            Some(node) => node.is_match().await,
            None => false,
        }
    }

    /// Whether `path` is tracked, matches the disk, and is complete.
    pub async fn is_file_sync(&self, path: &Path) -> bool {
        match self.get_file_node(path).await {
            Some(node) => node.is_sync().await,
            None => false,
        }
    }

    /// Completed bytes and completed file count (0 or 1) for `path`.
    ///
    /// Unknown and stale entries count as nothing done.
    pub async fn calculate_checked_file_completion(&self, path: &Path) -> (u64, u64) {
        let Some(node) = self.get_file_node(path).await else {
            return (0, 0);
        };
        if !node.is_match().await {
            return (0, 0);
        }
        let count = u64::from(node.is_sync().await);
        (node.completed_size().await, count)
    }

    /// Reconciles the tracked state of `path` with the disk.
    ///
    /// - Tracked, unchanged and complete: the entry is dropped and `None`
    ///   returned, nothing left to do.
    /// - Tracked, unchanged, not complete: the existing node is returned so
    ///   the transfer resumes from its bitmask.
    /// - Untracked or changed on disk: a fresh node is created.
    pub async fn get_checked_file_node(&self, path: &Path) -> Result<Option<Arc<N>>, TransferError> {
        if let Some(node) = self.get_file_node(path).await {
            if node.is_match().await {
                if node.is_sync().await {
                    self.delete_file_node(path).await;
                    tracing::debug!(path = %path.display(), "already synced, skipping");
                    return Ok(None);
                }
                tracing::debug!(path = %path.display(), "resuming tracked file");
                return Ok(Some(node));
            }
            tracing::debug!(path = %path.display(), "tracked file changed on disk, restarting");
        }
        self.create_file_node(path).await.map(Some)
    }

    /// Stops tracking `path`.
    pub async fn delete_file_node(&self, path: &Path) {
        self.table.lock().await.remove(path);
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Appends every dirty node to the log without evicting anything.
    ///
    /// Meant for abrupt shutdown. Returns the number of lines written.
    pub async fn save_all_file_nodes(&self) -> Result<usize, TransferError> {
        if self.table_file.is_none() {
            return Ok(0);
        }

        let nodes = self.nodes().await;
        let mut buf = String::new();
        let mut written = 0;
        for node in nodes {
            if node.is_dirty().await {
                buf.push_str(&node.serialize().await?);
                buf.push('\n');
                written += 1;
            }
        }

        if written > 0 {
            self.append(&buf).await?;
        }
        tracing::info!(nodes = written, "saved completion table");
        Ok(written)
    }

    /// Appends the node for `path` to the log and evicts it.
    ///
    /// Clean nodes are neither written nor evicted. Returns whether a line
    /// was written.
    pub async fn async_save_file_node(&self, path: &Path) -> Result<bool, TransferError> {
        if self.table_file.is_none() {
            return Ok(false);
        }
        let Some(node) = self.get_file_node(path).await else {
            return Ok(false);
        };
        if !node.is_dirty().await {
            return Ok(false);
        }

        let mut line = node.serialize().await?;
        line.push('\n');
        self.append(&line).await?;

        // Only evict the node that was written; a concurrent restart may
        // have replaced it.
        let mut table = self.table.lock().await;
        if table.get(path).is_some_and(|current| Arc::ptr_eq(current, &node)) {
            table.remove(path);
        }
        tracing::debug!(path = %path.display(), "flushed file node");
        Ok(true)
    }

    async fn append(&self, data: &str) -> Result<(), TransferError> {
        let Some(path) = self.table_file.as_deref() else {
            return Ok(());
        };
        let persistence = |source| TransferError::Persistence {
            path: path.to_path_buf(),
            source,
        };

        let _guard = self.writer.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(persistence)?;
        file.write_all(data.as_bytes()).await.map_err(persistence)?;
        file.flush().await.map_err(persistence)?;
        if self.sync_on_flush {
            file.sync_data().await.map_err(persistence)?;
        }
        Ok(())
    }

    /// Whether the log file exists.
    pub async fn is_table_file_exist(&self) -> bool {
        let Some(path) = self.table_file.as_deref() else {
            return false;
        };
        tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Deletes the log file for a fresh session. A missing file is fine.
    pub async fn remove_table_file(&self) -> Result<(), TransferError> {
        let Some(path) = self.table_file.as_deref() else {
            return Ok(());
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "removed completion log");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(TransferError::Persistence {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Replays the log into the table. Later lines overwrite earlier ones.
    ///
    /// A final line without its newline is a torn append from a crash. If
    /// it still parses it is replayed and terminated, otherwise it is
    /// skipped and cut from the file so later appends start on a clean
    /// line. Records written under another partition size drop any earlier
    /// entry for their path so that file restarts from scratch.
    /// Returns the number of tracked nodes afterwards.
    pub async fn load_table(&self) -> Result<usize, TransferError> {
        let Some(path) = self.table_file.as_deref() else {
            return Ok(0);
        };
        let persistence = |source| TransferError::Persistence {
            path: path.to_path_buf(),
            source,
        };
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(persistence(source)),
        };

        let keep = content
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        let (body, tail) = content.split_at(keep);
        let body = std::str::from_utf8(body)
            .map_err(|e| persistence(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let mut table = self.table.lock().await;
        let mut replayed = 0;
        let mut line_no = 0;
        for line in body.lines() {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record: N::Record =
                serde_json::from_str(line).map_err(|source| TransferError::CorruptLog {
                    path: path.to_path_buf(),
                    line: line_no,
                    source,
                })?;
            if self.replay_record(&mut table, record, line_no)? {
                replayed += 1;
            }
        }

        if !tail.is_empty() {
            line_no += 1;
            match serde_json::from_slice::<N::Record>(tail) {
                Ok(record) => {
                    if self.replay_record(&mut table, record, line_no)? {
                        replayed += 1;
                    }
                    self.append("\n").await?;
                    tracing::warn!(path = %path.display(), line = line_no, "terminated unterminated final line");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), line = line_no, error = %e, "dropping torn final line");
                    self.truncate_log(path, keep as u64).await?;
                }
            }
        }

        tracing::info!(path = %path.display(), lines = replayed, nodes = table.len(), "replayed completion log");
        Ok(table.len())
    }

    /// Inserts a replayed record. Incompatible records evict their path
    /// and return `Ok(false)`.
    fn replay_record(
        &self,
        table: &mut HashMap<PathBuf, Arc<N>>,
        record: N::Record,
        line: usize,
    ) -> Result<bool, TransferError> {
        match N::from_record(record, self.partition_size) {
            Ok(node) => {
                table.insert(node.path().to_path_buf(), Arc::new(node));
                Ok(true)
            }
            Err(
                TransferError::PartitionSizeMismatch { path, .. }
                | TransferError::BitmaskOverflow { path, .. },
            ) => {
                tracing::warn!(line, path = %path.display(), "discarding record with incompatible partitioning");
                table.remove(&path);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn truncate_log(&self, path: &Path, len: u64) -> Result<(), TransferError> {
        let persistence = |source| TransferError::Persistence {
            path: path.to_path_buf(),
            source,
        };
        let _guard = self.writer.lock().await;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(persistence)?;
        file.set_len(len).await.map_err(persistence)?;
        if self.sync_on_flush {
            file.sync_data().await.map_err(persistence)?;
        }
        Ok(())
    }
}
