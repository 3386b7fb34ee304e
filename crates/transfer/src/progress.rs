use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use partsync_protocol::TransferProgress;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default minimum interval between debounced callbacks.
pub(crate) const DEFAULT_UPDATE_RATE: Duration = Duration::from_millis(500);

/// Callback invoked with aggregate progress.
pub type ProgressCallback = Box<dyn Fn(TransferProgress) + Send + Sync>;

/// Job-wide byte and file counters shared by every partition task.
///
/// Counter updates are serialized by an async lock so each bytes/count
/// pair lands together. The callback fires at most once per update rate
/// while work is in flight; call [`update_progress`](Self::update_progress)
/// once at drain time for an exact final report.
pub struct AsyncTransferProgress {
    completed_bytes: AtomicI64,
    failed_bytes: AtomicI64,
    total_bytes: AtomicI64,
    completed_count: AtomicI64,
    failed_count: AtomicI64,
    total_count: AtomicI64,
    callback: Option<ProgressCallback>,
    update_rate: Duration,
    /// Serializes counter updates and holds the earliest instant the next
    /// debounced callback may fire.
    lock: Mutex<Instant>,
}

impl AsyncTransferProgress {
    /// Creates progress counters without a callback.
    pub fn new(initial: TransferProgress) -> Self {
        Self::build(initial, None, DEFAULT_UPDATE_RATE)
    }

    /// Creates progress counters reporting to `callback` at most once per
    /// `update_rate`.
    pub fn with_callback(
        initial: TransferProgress,
        callback: ProgressCallback,
        update_rate: Duration,
    ) -> Self {
        Self::build(initial, Some(callback), update_rate)
    }

    fn build(
        initial: TransferProgress,
        callback: Option<ProgressCallback>,
        update_rate: Duration,
    ) -> Self {
        Self {
            completed_bytes: AtomicI64::new(initial.completed_bytes),
            failed_bytes: AtomicI64::new(initial.failed_bytes),
            total_bytes: AtomicI64::new(initial.total_bytes),
            completed_count: AtomicI64::new(initial.completed_count),
            failed_count: AtomicI64::new(initial.failed_count),
            total_count: AtomicI64::new(initial.total_count),
            callback,
            update_rate,
            lock: Mutex::new(Instant::now() + update_rate),
        }
    }

    pub fn update_rate(&self) -> Duration {
        self.update_rate
    }

    /// Adds completed bytes and files. Negative values undo.
    pub async fn advance(&self, bytes: i64, count: i64) {
        {
            let _guard = self.lock.lock().await;
            self.completed_bytes.fetch_add(bytes, Ordering::Relaxed);
            self.completed_count.fetch_add(count, Ordering::Relaxed);
        }
        self.debounced_update_progress();
    }

    /// Adds failed bytes and files. Negative values undo.
    pub async fn fail(&self, bytes: i64, count: i64) {
        {
            let _guard = self.lock.lock().await;
            self.failed_bytes.fetch_add(bytes, Ordering::Relaxed);
            self.failed_count.fetch_add(count, Ordering::Relaxed);
        }
        self.debounced_update_progress();
    }

    /// Fires the callback if the update rate has elapsed and no other
    /// update holds the lock; otherwise does nothing.
    ///
    /// A skipped report is picked up by a later call or by the final
    /// [`update_progress`](Self::update_progress).
    pub fn debounced_update_progress(&self) {
        let Some(callback) = &self.callback else {
            return;
        };
        let now = Instant::now();
        let Ok(mut next_update) = self.lock.try_lock() else {
            return;
        };
        if now < *next_update {
            return;
        }
        *next_update = now + self.update_rate;
        callback(self.read_progress());
    }

    /// Fires the callback unconditionally.
    pub fn update_progress(&self) {
        if let Some(callback) = &self.callback {
            callback(self.read_progress());
        }
    }

    /// Best-effort snapshot of all counters without taking the lock.
    pub fn read_progress(&self) -> TransferProgress {
        TransferProgress {
            completed_bytes: self.completed_bytes.load(Ordering::Relaxed),
            failed_bytes: self.failed_bytes.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            completed_count: self.completed_count.load(Ordering::Relaxed),
            failed_count: self.failed_count.load(Ordering::Relaxed),
            total_count: self.total_count.load(Ordering::Relaxed),
        }
    }
}
