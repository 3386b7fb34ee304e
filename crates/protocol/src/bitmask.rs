//! Partition completion bitmask.
//!
//! A file is split into fixed-size partitions and every partition owns one
//! bit. A set bit means the partition is still outstanding, a cleared bit
//! means it has been transferred. An all-zero mask means the whole file is
//! done at partition granularity.
//!
//! The mask is an unbounded integer backed by [`BigUint`]: a 1 TB file at
//! the default partition size already needs 2000 bits. On disk it is
//! written as a bare decimal JSON integer.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use num_bigint::{BigUint, ParseBigIntError};
use num_traits::{One, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;

/// Error returned when a decimal bitmask string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseBitmaskError {
    #[error("empty bitmask")]
    Empty,

    #[error("invalid digit {0:?} in bitmask")]
    InvalidDigit(char),

    #[error("invalid bitmask: {0}")]
    Invalid(#[from] ParseBigIntError),
}

/// Partition completion bitmask.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PartitionBitmask {
    bits: BigUint,
}

impl PartitionBitmask {
    /// The all-complete mask.
    pub fn zero() -> Self {
        Self::default()
    }

    /// A mask with the low `partitions` bits set (nothing transferred yet).
    pub fn all_set(partitions: u64) -> Self {
        Self {
            bits: (BigUint::one() << partitions) - 1u32,
        }
    }

    /// Whether every partition is complete.
    pub fn is_zero(&self) -> bool {
        self.bits.is_zero()
    }

    /// Whether partition `id` is still outstanding.
    pub fn is_bit_set(&self, id: u64) -> bool {
        self.bits.bit(id)
    }

    /// Returns the mask with partition `id` marked complete.
    pub fn clear_bit(mut self, id: u64) -> Self {
        self.clear(id);
        self
    }

    /// Marks partition `id` complete in place. Clearing an already clear
    /// bit is a no-op.
    pub fn clear(&mut self, id: u64) {
        if self.bits.bit(id) {
            self.bits.set_bit(id, false);
        }
    }

    /// Number of outstanding partitions.
    pub fn count_set(&self) -> u64 {
        self.bits.count_ones()
    }

    /// Position of the highest set bit plus one (0 for the zero mask).
    pub fn bit_len(&self) -> u64 {
        self.bits.bits()
    }

    /// Iterates outstanding partition ids in ascending order.
    pub fn incomplete_partitions(&self) -> impl Iterator<Item = u64> + '_ {
        self.bits
            .iter_u64_digits()
            .enumerate()
            .flat_map(|(i, word)| {
                (0..u64::BITS as u64)
                    .filter(move |bit| word & (1u64 << bit) != 0)
                    .map(move |bit| i as u64 * u64::BITS as u64 + bit)
            })
    }
}

impl From<u64> for PartitionBitmask {
    fn from(value: u64) -> Self {
        Self {
            bits: BigUint::from(value),
        }
    }
}

impl fmt::Display for PartitionBitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.bits, f)
    }
}

impl FromStr for PartitionBitmask {
    type Err = ParseBitmaskError;

    /// Plain decimal digits only; signs and separators are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseBitmaskError::Empty);
        }
        if let Some(bad) = s.chars().find(|c| !c.is_ascii_digit()) {
            return Err(ParseBitmaskError::InvalidDigit(bad));
        }
        Ok(Self { bits: s.parse()? })
    }
}

impl Serialize for PartitionBitmask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Written as a bare integer regardless of width.
        let raw = RawValue::from_string(self.to_string()).map_err(serde::ser::Error::custom)?;
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PartitionBitmask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        raw.get().trim().parse().map_err(serde::de::Error::custom)
    }
}

/// Number of partitions needed to cover `total_size` bytes.
///
/// # Panics
///
/// Panics if `partition_size` is zero.
pub fn number_of_partitions(total_size: u64, partition_size: u64) -> u64 {
    total_size.div_ceil(partition_size)
}

/// Byte range covered by partition `id`. The final partition may be short.
pub fn partition_range(id: u64, total_size: u64, partition_size: u64) -> Range<u64> {
    let start = id.saturating_mul(partition_size).min(total_size);
    let end = start.saturating_add(partition_size).min(total_size);
    start..end
}

/// Bytes already transferred according to `mask`.
///
/// Bits beyond the file's partition count are ignored.
pub fn completed_size(mask: &PartitionBitmask, total_size: u64, partition_size: u64) -> u64 {
    let partitions = number_of_partitions(total_size, partition_size);
    let outstanding: u64 = mask
        .incomplete_partitions()
        .take_while(|&id| id < partitions)
        .map(|id| {
            let range = partition_range(id, total_size, partition_size);
            range.end - range.start
        })
        .sum();
    total_size.saturating_sub(outstanding)
}
