//! Partition module for SpanJoin
//!
//! This module provides the partition table that cuts the address space into
//! contiguous partitions, and the range partitioner that routes keys to them.

pub mod spanning;
pub mod table;

// Re-export key types
pub use spanning::{RangePartitioner, RoutedRecord, SpanFragments, SPANNING_COUNTER_GROUP};
pub use table::{PartitionError, PartitionRange, PartitionTable};
