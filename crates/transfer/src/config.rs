//! Transfer tracking configuration.
//!
//! Read from a camelCase JSON file, then optionally overridden from the
//! environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::progress::DEFAULT_UPDATE_RATE;
use crate::{DEFAULT_PARTITION_SIZE, TransferError};

/// Overrides the progress callback interval, in seconds.
pub const ENV_PROGRESS_UPDATE_FREQUENCY: &str = "PARTSYNC_PROGRESS_UPDATE_FREQUENCY";

/// Overrides the completion log location.
pub const ENV_TABLE_FILE: &str = "PARTSYNC_TABLE_FILE";

/// Settings shared by a completion table and its progress counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferConfig {
    /// Bytes per partition. Must stay fixed for a log's lifetime.
    pub partition_size: u64,
    /// Minimum seconds between debounced progress callbacks.
    pub progress_update_rate: f64,
    /// Completion log path; `None` disables persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_file: Option<PathBuf>,
    /// `fsync` after every log append.
    pub sync_on_flush: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            partition_size: DEFAULT_PARTITION_SIZE,
            progress_update_rate: DEFAULT_UPDATE_RATE.as_secs_f64(),
            table_file: None,
            sync_on_flush: true,
        }
    }
}

impl TransferConfig {
    /// Loads configuration from a JSON file.
    ///
    /// A missing file yields defaults. Unparseable content or out-of-range
    /// values fall back to defaults with a warning.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = match serde_json::from_str::<TransferConfig>(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse transfer config, using defaults"
                );
                Self::default()
            }
        };
        Ok(config.validated())
    }

    /// Saves configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), TransferError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides using `lookup` in place of the environment.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_PROGRESS_UPDATE_FREQUENCY) {
            match raw.trim().parse::<f64>() {
                Ok(secs) if Duration::try_from_secs_f64(secs).is_ok() => {
                    self.progress_update_rate = secs
                }
                _ => tracing::warn!(
                    value = %raw,
                    "ignoring invalid {ENV_PROGRESS_UPDATE_FREQUENCY}"
                ),
            }
        }
        if let Some(raw) = lookup(ENV_TABLE_FILE) {
            if !raw.is_empty() {
                self.table_file = Some(PathBuf::from(raw));
            }
        }
        self
    }

    /// Progress callback interval as a [`Duration`].
    ///
    /// A rate that is negative or too large for a `Duration` falls back to
    /// the default.
    pub fn update_rate(&self) -> Duration {
        Duration::try_from_secs_f64(self.progress_update_rate).unwrap_or(DEFAULT_UPDATE_RATE)
    }

    fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.partition_size == 0 {
            tracing::warn!("partition size must be > 0, using default");
            self.partition_size = defaults.partition_size;
        }
        if Duration::try_from_secs_f64(self.progress_update_rate).is_err() {
            tracing::warn!(
                rate = self.progress_update_rate,
                "progress update rate out of range, using default"
            );
            self.progress_update_rate = defaults.progress_update_rate;
        }
        self
    }
}
