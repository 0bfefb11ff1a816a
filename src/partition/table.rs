//! Partition table over the 32-bit address space
//!
//! The address space is cut into `P` contiguous partitions of
//! `span = floor(2^32 / P)` addresses each. Partition `i` covers
//! `[i * span, (i + 1) * span - 1]`; the last partition runs to `2^32 - 1` and
//! absorbs the remainder of the division. An address sitting exactly on
//! `i * span` belongs to partition `i`.
//!
//! Lookup is plain arithmetic, so the table stores only `P` and `span`.

use thiserror::Error;

use crate::encoding::CodecError;
use crate::{ADDRESS_SPACE, Address};

/// One contiguous partition of the address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionRange {
    /// Partition index
    pub index: u32,
    /// First address (inclusive)
    pub lower: Address,
    /// Last address (inclusive)
    pub upper: Address,
}

impl PartitionRange {
    /// Whether `addr` falls in this partition
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.lower && addr <= self.upper
    }

    /// Number of addresses in the partition
    pub fn size(&self) -> u64 {
        self.upper as u64 - self.lower as u64 + 1
    }
}

/// Partition table with contiguous, exhaustive partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTable {
    num_partitions: u32,
    span: u64,
}

impl PartitionTable {
    /// Build the table for `num_partitions` partitions
    pub fn new(num_partitions: u32) -> Result<Self, PartitionError> {
        if num_partitions == 0 {
            return Err(PartitionError::ZeroPartitions);
        }
        Ok(Self {
            num_partitions,
            span: ADDRESS_SPACE / num_partitions as u64,
        })
    }

    /// Number of partitions
    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    /// Addresses per partition, not counting the remainder held by the last one
    pub fn span(&self) -> u64 {
        self.span
    }

    /// Index of the partition containing `addr`
    pub fn partition_of(&self, addr: Address) -> u32 {
        let index = addr as u64 / self.span;
        index.min(self.num_partitions as u64 - 1) as u32
    }

    /// Bounds of partition `index`, if it exists
    pub fn bounds(&self, index: u32) -> Option<PartitionRange> {
        (index < self.num_partitions).then(|| self.range_for(index))
    }

    /// Bounds of the partition containing `addr`
    pub fn partition_containing(&self, addr: Address) -> PartitionRange {
        self.range_for(self.partition_of(addr))
    }

    fn range_for(&self, index: u32) -> PartitionRange {
        let lower = index as u64 * self.span;
        let upper = if index == self.num_partitions - 1 {
            ADDRESS_SPACE - 1
        } else {
            lower + self.span - 1
        };
        PartitionRange {
            index,
            lower: lower as Address,
            upper: upper as Address,
        }
    }

    /// Iterate over every partition in address order
    pub fn iter(&self) -> impl Iterator<Item = PartitionRange> + '_ {
        (0..self.num_partitions).filter_map(move |i| self.bounds(i))
    }
}

/// Errors that can occur while partitioning or spanning keys
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    /// A partition table needs at least one partition
    #[error("number of partitions must be at least 1")]
    ZeroPartitions,
    /// Only range and spanning keys can be spanned
    #[error("cannot span a point key")]
    NotARange,
    /// The key could not be decoded
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_partitions_rejected() {
        assert_eq!(PartitionTable::new(0), Err(PartitionError::ZeroPartitions));
    }

    #[test]
    fn test_single_partition_covers_everything() {
        let table = PartitionTable::new(1).unwrap();
        let only = table.bounds(0).unwrap();
        assert_eq!(only.lower, 0);
        assert_eq!(only.upper, Address::MAX);
        assert_eq!(only.size(), ADDRESS_SPACE);
        assert_eq!(table.partition_of(0), 0);
        assert_eq!(table.partition_of(Address::MAX), 0);
        assert_eq!(table.bounds(1), None);
    }

    #[test]
    fn test_four_partitions_bounds() {
        let table = PartitionTable::new(4).unwrap();
        let bounds: Vec<(Address, Address)> = table.iter().map(|p| (p.lower, p.upper)).collect();
        assert_eq!(
            bounds,
            vec![
                (0x00000000, 0x3fffffff),
                (0x40000000, 0x7fffffff),
                (0x80000000, 0xbfffffff),
                (0xc0000000, 0xffffffff),
            ]
        );
    }

    #[test]
    fn test_boundary_addresses_belong_to_upper_partition() {
        let table = PartitionTable::new(4).unwrap();
        assert_eq!(table.partition_of(0x3fffffff), 0);
        assert_eq!(table.partition_of(0x40000000), 1);
        assert_eq!(table.partition_of(0x7fffffff), 1);
        assert_eq!(table.partition_of(0x80000000), 2);
        assert_eq!(table.partition_of(0xbfffffff), 2);
        assert_eq!(table.partition_of(0xc0000000), 3);
        assert_eq!(table.partition_of(0xffffffff), 3);
    }

    #[test]
    fn test_remainder_goes_to_last_partition() {
        // 2^32 / 3 = 1431655765 remainder 1
        let table = PartitionTable::new(3).unwrap();
        assert_eq!(table.span(), 1_431_655_765);
        let last = table.bounds(2).unwrap();
        assert_eq!(last.lower, 2 * 1_431_655_765);
        assert_eq!(last.upper, Address::MAX);
        assert_eq!(last.size(), 1_431_655_766);
        assert_eq!(table.partition_of(Address::MAX), 2);
        assert_eq!(table.partition_of(last.lower - 1), 1);
    }

    #[test]
    fn test_huge_partition_count() {
        let table = PartitionTable::new(Address::MAX).unwrap();
        assert_eq!(table.span(), 1);
        let last = table.bounds(Address::MAX - 1).unwrap();
        assert_eq!(last.lower, Address::MAX - 1);
        assert_eq!(last.upper, Address::MAX);
        assert_eq!(table.partition_of(Address::MAX), Address::MAX - 1);
        assert_eq!(table.partition_of(Address::MAX - 2), Address::MAX - 2);
    }

    #[test]
    fn test_partitions_are_contiguous_and_exhaustive() {
        for p in [1u32, 2, 3, 5, 7, 16, 100, 1023] {
            let table = PartitionTable::new(p).unwrap();
            let mut expected_lower = 0u64;
            let mut total = 0u64;
            for part in table.iter() {
                assert_eq!(part.lower as u64, expected_lower, "gap before partition {}", part.index);
                assert!(part.lower <= part.upper);
                assert_eq!(table.partition_of(part.lower), part.index);
                assert_eq!(table.partition_of(part.upper), part.index);
                assert_eq!(table.partition_containing(part.lower), part);
                expected_lower = part.upper as u64 + 1;
                total += part.size();
            }
            assert_eq!(expected_lower, ADDRESS_SPACE);
            assert_eq!(total, ADDRESS_SPACE);
        }
    }
}
