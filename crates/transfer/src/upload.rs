use partsync_protocol::{PartitionBitmask, UploadNodeRecord, completed_size, number_of_partitions};
use tokio::sync::Mutex;

use crate::TransferError;
use crate::node::{FileIdentity, FileNode};

/// Upload state for one file split into partitions.
///
/// Many partition tasks share one node behind an `Arc`. Every mutation
/// takes the node's lock, so concurrent partition completions serialize
/// and the one-shot guards linearize.
#[derive(Debug)]
pub struct UploadFileNode {
    identity: FileIdentity,
    partition_size: u64,
    state: Mutex<UploadState>,
}

#[derive(Debug)]
struct UploadState {
    bitmask: PartitionBitmask,
    /// Changed since creation or replay; only dirty nodes are logged.
    write_change: bool,
    failed: bool,
    upload_id: Option<String>,
    hash: Option<String>,
    race_flag: bool,
    complete: bool,
}

impl UploadFileNode {
    /// Partition size the bitmask was computed with.
    pub fn partition_size(&self) -> u64 {
        self.partition_size
    }

    /// Number of partitions covering the file.
    pub fn partition_count(&self) -> u64 {
        number_of_partitions(self.identity.size, self.partition_size)
    }

    /// Current completion bitmask.
    pub async fn bitmask(&self) -> PartitionBitmask {
        self.state.lock().await.bitmask.clone()
    }

    /// Whether partition `id` has been transferred.
    pub async fn is_partition_complete(&self, id: u64) -> bool {
        !self.state.lock().await.bitmask.is_bit_set(id)
    }

    /// Bytes covered by completed partitions.
    pub async fn get_completed_size(&self) -> u64 {
        let s = self.state.lock().await;
        completed_size(&s.bitmask, self.identity.size, self.partition_size)
    }

    /// Marks partition `id` transferred. Repeated calls are harmless.
    pub async fn set_partition_complete(&self, id: u64) {
        let mut s = self.state.lock().await;
        s.bitmask.clear(id);
        s.write_change = true;
        tracing::trace!(path = %self.identity.path.display(), partition = id, "partition complete");
    }

    /// Records the multipart upload id handed out by the remote store.
    pub async fn set_upload_id(&self, upload_id: impl Into<String>) {
        let mut s = self.state.lock().await;
        s.upload_id = Some(upload_id.into());
        s.write_change = true;
    }

    pub async fn upload_id(&self) -> Option<String> {
        self.state.lock().await.upload_id.clone()
    }

    /// Records the whole-file content hash. An empty hash counts as unset.
    pub async fn set_file_hash(&self, hash: impl Into<String>) {
        let hash = hash.into();
        let mut s = self.state.lock().await;
        s.hash = Some(hash).filter(|h| !h.is_empty());
        s.write_change = true;
    }

    pub async fn file_hash(&self) -> Option<String> {
        self.state.lock().await.hash.clone()
    }

    /// Marks the multipart upload finalized.
    ///
    /// Fails with [`TransferError::NotReady`] while partitions are
    /// outstanding or the hash is missing.
    pub async fn set_complete(&self) -> Result<(), TransferError> {
        let mut s = self.state.lock().await;
        if !s.bitmask.is_zero() || s.hash.is_none() {
            return Err(TransferError::NotReady(self.identity.path.clone()));
        }
        s.complete = true;
        s.write_change = true;
        tracing::debug!(path = %self.identity.path.display(), "upload marked complete");
        Ok(())
    }

    pub async fn is_complete(&self) -> bool {
        self.state.lock().await.complete
    }

    /// Claims the right to finalize the upload.
    ///
    /// Returns `true` for exactly one caller: the first to observe every
    /// partition done, the hash set, and the upload not yet complete or
    /// claimed. All other callers, before or after, get `false`.
    pub async fn set_race_flag_once(&self) -> bool {
        let mut s = self.state.lock().await;
        let should_finalize =
            s.bitmask.is_zero() && s.hash.is_some() && !s.complete && !s.race_flag;
        if should_finalize {
            s.race_flag = true;
            tracing::debug!(path = %self.identity.path.display(), "finalize claimed");
        }
        should_finalize
    }

    /// Releases a finalize claim so a later observer may retry.
    ///
    /// The claim is never released implicitly; an executor whose finalize
    /// call failed decides whether to retry by calling this.
    pub async fn clear_race_flag(&self) {
        let mut s = self.state.lock().await;
        if s.race_flag && !s.complete {
            s.race_flag = false;
            tracing::debug!(path = %self.identity.path.display(), "finalize claim released");
        }
    }

    /// Claims the right to report this file as failed.
    ///
    /// Returns `true` exactly once per node.
    pub async fn set_failed_once(&self) -> bool {
        let mut s = self.state.lock().await;
        if s.failed {
            return false;
        }
        s.failed = true;
        tracing::debug!(path = %self.identity.path.display(), "file failed");
        true
    }

    pub async fn is_failed(&self) -> bool {
        self.state.lock().await.failed
    }
}

impl FileNode for UploadFileNode {
    type Record = UploadNodeRecord;

    fn new(identity: FileIdentity, partition_size: u64) -> Self {
        let partitions = number_of_partitions(identity.size, partition_size);
        Self {
            identity,
            partition_size,
            state: Mutex::new(UploadState {
                bitmask: PartitionBitmask::all_set(partitions),
                write_change: false,
                failed: false,
                upload_id: None,
                hash: None,
                race_flag: false,
                complete: false,
            }),
        }
    }

    fn from_record(record: UploadNodeRecord, partition_size: u64) -> Result<Self, TransferError> {
        match record.partition_size {
            Some(found) if found != partition_size => {
                return Err(TransferError::PartitionSizeMismatch {
                    path: record.file_path,
                    expected: partition_size,
                    found,
                });
            }
            _ => {}
        }

        let partitions = number_of_partitions(record.size, partition_size);
        let bits = record.bitmask.bit_len();
        if bits > partitions {
            return Err(TransferError::BitmaskOverflow {
                path: record.file_path,
                bits,
                partitions,
            });
        }

        let hash = Some(record.hash).filter(|s| !s.is_empty());
        // A record claiming completion without a hash or with partitions
        // outstanding replays as unfinished.
        let complete = record.complete && hash.is_some() && record.bitmask.is_zero();
        Ok(Self {
            identity: FileIdentity {
                path: record.file_path,
                size: record.size,
                mtime: record.ftime,
            },
            partition_size,
            state: Mutex::new(UploadState {
                bitmask: record.bitmask,
                write_change: false,
                failed: false,
                upload_id: Some(record.upload_id).filter(|s| !s.is_empty()),
                hash,
                race_flag: false,
                complete,
            }),
        })
    }

    fn identity(&self) -> &FileIdentity {
        &self.identity
    }

    async fn to_record(&self) -> UploadNodeRecord {
        let s = self.state.lock().await;
        UploadNodeRecord {
            size: self.identity.size,
            ftime: self.identity.mtime,
            bitmask: s.bitmask.clone(),
            upload_id: s.upload_id.clone().unwrap_or_default(),
            hash: s.hash.clone().unwrap_or_default(),
            complete: s.complete,
            file_path: self.identity.path.clone(),
            partition_size: Some(self.partition_size),
        }
    }

    async fn is_dirty(&self) -> bool {
        self.state.lock().await.write_change
    }

    async fn is_sync(&self) -> bool {
        // Cheap flag first; the disk check only runs for completed nodes.
        self.is_complete().await && self.is_match().await
    }

    async fn completed_size(&self) -> u64 {
        self.get_completed_size().await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;

    const PARTITION: u64 = 500_000_000;

    fn identity(size: u64) -> FileIdentity {
        FileIdentity {
            path: PathBuf::from("/data/a.bin"),
            size,
            mtime: 1_718_000_000.5,
        }
    }

    async fn finished_node() -> UploadFileNode {
        let node = UploadFileNode::new(identity(1_200_000_000), PARTITION);
        for id in 0..3 {
            node.set_partition_complete(id).await;
        }
        node.set_file_hash("deadbeef").await;
        node
    }

    #[tokio::test]
    async fn new_node_has_all_partitions_outstanding() {
        let node = UploadFileNode::new(identity(1_200_000_000), PARTITION);
        assert_eq!(node.partition_count(), 3);
        assert_eq!(node.bitmask().await, PartitionBitmask::all_set(3));
        assert_eq!(node.get_completed_size().await, 0);
        assert!(!node.is_dirty().await);
        for id in 0..3 {
            assert!(!node.is_partition_complete(id).await);
        }
    }

    #[tokio::test]
    async fn three_partition_scenario() {
        let total = 1_200_000_000;
        let node = UploadFileNode::new(identity(total), PARTITION);

        node.set_partition_complete(0).await;
        node.set_partition_complete(1).await;
        assert_eq!(node.get_completed_size().await, 1_000_000_000);
        assert!(node.is_dirty().await);

        node.set_partition_complete(2).await;
        assert_eq!(node.get_completed_size().await, total);
        assert!(node.bitmask().await.is_zero());
    }

    #[tokio::test]
    async fn set_partition_complete_is_idempotent() {
        let a = UploadFileNode::new(identity(1_200_000_000), PARTITION);
        let b = UploadFileNode::new(identity(1_200_000_000), PARTITION);
        a.set_partition_complete(1).await;
        b.set_partition_complete(1).await;
        b.set_partition_complete(1).await;
        assert_eq!(a.bitmask().await, b.bitmask().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_partition_completion() {
        let size = 64 * 10;
        let node = Arc::new(UploadFileNode::new(identity(size), 10));
        assert_eq!(node.partition_count(), 64);

        let mut tasks = tokio::task::JoinSet::new();
        for id in 0..64 {
            let n = Arc::clone(&node);
            tasks.spawn(async move { n.set_partition_complete(id).await });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }

        assert!(node.bitmask().await.is_zero());
        assert_eq!(node.get_completed_size().await, size);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn race_flag_exactly_once_under_contention() {
        let node = Arc::new(finished_node().await);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let n = Arc::clone(&node);
            tasks.spawn(async move { n.set_race_flag_once().await });
        }
        let mut winners = 0;
        while let Some(res) = tasks.join_next().await {
            if res.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(!node.set_race_flag_once().await);
    }

    #[tokio::test]
    async fn race_flag_requires_all_partitions_and_hash() {
        let node = UploadFileNode::new(identity(1_200_000_000), PARTITION);
        node.set_file_hash("deadbeef").await;
        node.set_partition_complete(0).await;
        assert!(!node.set_race_flag_once().await);

        let node = UploadFileNode::new(identity(1_200_000_000), PARTITION);
        for id in 0..3 {
            node.set_partition_complete(id).await;
        }
        assert!(!node.set_race_flag_once().await);
        node.set_file_hash("deadbeef").await;
        assert!(node.set_race_flag_once().await);
    }

    #[tokio::test]
    async fn empty_hash_does_not_satisfy_completion() {
        let node = UploadFileNode::new(identity(1_200_000_000), PARTITION);
        for id in 0..3 {
            node.set_partition_complete(id).await;
        }
        node.set_file_hash("").await;

        assert_eq!(node.file_hash().await, None);
        assert!(node.is_dirty().await);
        assert!(!node.set_race_flag_once().await);
        assert!(matches!(
            node.set_complete().await,
            Err(TransferError::NotReady(_))
        ));

        node.set_file_hash("deadbeef").await;
        assert!(node.set_race_flag_once().await);
        node.set_complete().await.unwrap();
        let back = UploadFileNode::from_record(node.to_record().await, PARTITION).unwrap();
        assert!(back.is_complete().await);
        assert_eq!(back.file_hash().await.as_deref(), Some("deadbeef"));
    }

    #[tokio::test]
    async fn replayed_completion_without_hash_is_unfinished() {
        let mut record = UploadFileNode::new(identity(10), PARTITION).to_record().await;
        record.bitmask = PartitionBitmask::zero();
        record.complete = true;

        let back = UploadFileNode::from_record(record, PARTITION).unwrap();
        assert!(!back.is_complete().await);
        assert_eq!(back.file_hash().await, None);
    }

    #[tokio::test]
    async fn race_flag_never_fires_after_complete() {
        let node = finished_node().await;
        node.set_complete().await.unwrap();
        assert!(!node.set_race_flag_once().await);
    }

    #[tokio::test]
    async fn race_flag_stays_claimed_until_released() {
        let node = finished_node().await;
        assert!(node.set_race_flag_once().await);
        assert!(!node.set_race_flag_once().await);

        node.clear_race_flag().await;
        assert!(node.set_race_flag_once().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_once_under_contention() {
        let node = Arc::new(UploadFileNode::new(identity(10), PARTITION));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let n = Arc::clone(&node);
            tasks.spawn(async move { n.set_failed_once().await });
        }
        let mut reported = 0;
        while let Some(res) = tasks.join_next().await {
            if res.unwrap() {
                reported += 1;
            }
        }
        assert_eq!(reported, 1);
        assert!(node.is_failed().await);
    }

    #[tokio::test]
    async fn set_complete_rejects_unfinished_node() {
        let node = UploadFileNode::new(identity(1_200_000_000), PARTITION);
        assert!(matches!(
            node.set_complete().await,
            Err(TransferError::NotReady(_))
        ));

        for id in 0..3 {
            node.set_partition_complete(id).await;
        }
        assert!(node.set_complete().await.is_err());

        node.set_file_hash("deadbeef").await;
        node.set_complete().await.unwrap();
        assert!(node.is_complete().await);
    }

    #[tokio::test]
    async fn serialize_roundtrip_preserves_persisted_fields() {
        let node = UploadFileNode::new(identity(1_200_000_000), PARTITION);
        node.set_partition_complete(1).await;
        node.set_upload_id("mpu-42").await;
        node.set_file_hash("deadbeef").await;

        let line = node.serialize().await.unwrap();
        let back = UploadFileNode::deserialize(&line, PARTITION).unwrap();

        assert_eq!(back.identity(), node.identity());
        assert_eq!(back.bitmask().await, node.bitmask().await);
        assert_eq!(back.upload_id().await.as_deref(), Some("mpu-42"));
        assert_eq!(back.file_hash().await.as_deref(), Some("deadbeef"));
        assert!(!back.is_complete().await);
        assert_eq!(back.to_record().await, node.to_record().await);
    }

    #[tokio::test]
    async fn replayed_node_starts_clean() {
        let node = finished_node().await;
        node.set_complete().await.unwrap();
        assert!(node.set_failed_once().await);

        let back = UploadFileNode::from_record(node.to_record().await, PARTITION).unwrap();
        assert!(back.is_complete().await);
        assert!(!back.is_dirty().await);
        assert!(!back.is_failed().await);
    }

    #[tokio::test]
    async fn empty_strings_replay_as_unset() {
        let node = UploadFileNode::new(identity(10), PARTITION);
        let back = UploadFileNode::from_record(node.to_record().await, PARTITION).unwrap();
        assert_eq!(back.upload_id().await, None);
        assert_eq!(back.file_hash().await, None);
    }

    #[tokio::test]
    async fn from_record_rejects_other_partition_size() {
        let node = UploadFileNode::new(identity(1_200_000_000), PARTITION);
        let record = node.to_record().await;

        let err = UploadFileNode::from_record(record, 100_000_000).unwrap_err();
        assert!(matches!(
            err,
            TransferError::PartitionSizeMismatch {
                expected: 100_000_000,
                found: PARTITION,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn from_record_rejects_too_wide_bitmask() {
        let mut record = UploadFileNode::new(identity(1_200_000_000), PARTITION)
            .to_record()
            .await;
        record.partition_size = None;
        record.bitmask = PartitionBitmask::all_set(10);

        let err = UploadFileNode::from_record(record, PARTITION).unwrap_err();
        assert!(matches!(
            err,
            TransferError::BitmaskOverflow {
                bits: 10,
                partitions: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn zero_byte_file_has_no_partitions() {
        let node = UploadFileNode::new(identity(0), PARTITION);
        assert_eq!(node.partition_count(), 0);
        assert!(node.bitmask().await.is_zero());
        assert!(!node.set_race_flag_once().await);
        node.set_file_hash("e3b0c442").await;
        assert!(node.set_race_flag_once().await);
    }
}
