//! On-disk and callback types shared by the partsync crates.
//!
//! - [`bitmask`]: packed partition completion state and its arithmetic.
//! - [`record`]: one line of the append-only completion log.
//! - [`progress`]: aggregate counters handed to progress callbacks.

pub mod bitmask;
pub mod progress;
pub mod record;

pub use bitmask::{
    ParseBitmaskError, PartitionBitmask, completed_size, number_of_partitions, partition_range,
};
pub use progress::TransferProgress;
pub use record::UploadNodeRecord;
