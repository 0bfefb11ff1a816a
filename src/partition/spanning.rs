//! Range partitioner
//!
//! Routes keys to partitions and spans ranges that cross partition boundaries
//! into one clipped fragment per overlapped partition. Every fragment keeps
//! the original range as its real bounds, so the range can be reported
//! unclipped after the join.

use smallvec::SmallVec;

use crate::collector::CounterSink;
use crate::encoding::{DecodedKey, KeyCodec, RangeKey, SpanningKey};
use crate::observability::log_debug;
use crate::partition::{PartitionError, PartitionTable};
use crate::{Address, JoinConfig};

/// Counter group used while spanning keys
pub const SPANNING_COUNTER_GROUP: &str = "spanning";

/// Fragments produced by spanning one range. Most ranges touch few partitions.
pub type SpanFragments = SmallVec<[SpanningKey; 4]>;

/// A key assigned to a partition, encoded and ready for sorting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedRecord<V> {
    /// Partition the key belongs to
    pub partition: u32,
    /// Encoded key
    pub key: String,
    /// Value carried with the key
    pub value: V,
}

/// Assigns keys to partitions and spans ranges across them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePartitioner {
    table: PartitionTable,
    codec: KeyCodec,
}

impl RangePartitioner {
    /// Create a partitioner with `num_partitions` partitions
    pub fn new(codec: KeyCodec, num_partitions: u32) -> Result<Self, PartitionError> {
        Ok(Self {
            table: PartitionTable::new(num_partitions)?,
            codec,
        })
    }

    /// Create a partitioner from a join configuration
    pub fn from_config(config: &JoinConfig) -> Result<Self, crate::Error> {
        config.validate()?;
        let codec = KeyCodec::from_config(config)?;
        Ok(Self::new(codec, config.num_partitions)?)
    }

    /// The partition table
    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    /// The codec used to decode and encode keys
    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Index of the partition containing `addr`
    pub fn partition_of(&self, addr: Address) -> u32 {
        self.table.partition_of(addr)
    }

    /// Decode `raw` and return its partition
    pub fn get_partition(&self, raw: &[u8]) -> Result<u32, PartitionError> {
        let key = self.codec.decode(raw)?;
        Ok(self.partition_for(&key))
    }

    /// Partition of an already decoded key.
    ///
    /// Only the point address or the (clipped) begin is consulted. A spanned
    /// fragment always ends inside the partition it begins in; an unspanned
    /// range that crosses partitions is routed by its begin alone.
    pub fn partition_for(&self, key: &DecodedKey) -> u32 {
        let partition = self.table.partition_of(key.partition_address());
        if let DecodedKey::Spanning(span) = key {
            debug_assert_eq!(
                self.table.partition_of(span.clipped_end),
                partition,
                "spanning key {:08x}:{:08x} crosses a partition boundary",
                span.clipped_begin,
                span.clipped_end,
            );
        }
        partition
    }

    /// Cut `range` into one fragment per partition it overlaps
    pub fn span_key(&self, range: RangeKey) -> SpanFragments {
        let mut fragments = SpanFragments::new();
        let end = range.end as u64;
        let mut cursor = range.begin as u64;
        while cursor <= end {
            let partition = self.table.partition_containing(cursor as Address);
            let clipped_end = end.min(partition.upper as u64);
            fragments.push(SpanningKey {
                clipped_begin: cursor as Address,
                clipped_end: clipped_end as Address,
                real_begin: range.begin,
                real_end: range.end,
            });
            cursor = clipped_end + 1;
        }
        fragments
    }

    /// Span a decoded key. Spanning keys are re-spanned from their real range.
    pub fn span_decoded(&self, key: &DecodedKey) -> Result<SpanFragments, PartitionError> {
        match key.real_range() {
            Some(range) => Ok(self.span_key(range)),
            None => Err(PartitionError::NotARange),
        }
    }

    /// Route one input record. Point keys pass through with their partition;
    /// range and spanning keys are spanned and each fragment is emitted.
    /// Returns the number of records emitted.
    pub fn route<V: Clone>(
        &self,
        key: &DecodedKey,
        value: V,
        counters: &dyn CounterSink,
        mut emit: impl FnMut(RoutedRecord<V>),
    ) -> usize {
        let range = match key {
            DecodedKey::Point(addr) => {
                emit(RoutedRecord {
                    partition: self.table.partition_of(*addr),
                    key: self.codec.encode_point(*addr),
                    value,
                });
                return 1;
            }
            DecodedKey::Range(range) => *range,
            DecodedKey::Spanning(span) => span.real(),
        };

        let fragments = self.span_key(range);
        log_debug!(
            component = "partitioner",
            event = "range_spanned",
            begin = range.begin,
            end = range.end,
            fragments = fragments.len(),
        );
        counters.incr(SPANNING_COUNTER_GROUP, "SPANNED KEYS", 1);

        let count = fragments.len();
        let mut value = Some(value);
        for (i, fragment) in fragments.into_iter().enumerate() {
            let partition = self.table.partition_of(fragment.clipped_begin);
            counters.incr(SPANNING_COUNTER_GROUP, &format!("Partition {}", partition), 1);
            // The last fragment takes the value, the others get clones
            let value = if i + 1 == count {
                value.take()
            } else {
                value.clone()
            };
            if let Some(value) = value {
                emit(RoutedRecord {
                    partition,
                    key: self.codec.encode_spanning(fragment),
                    value,
                });
            }
        }
        counters.incr(SPANNING_COUNTER_GROUP, "OUTPUT KEYS", count as u64);
        count
    }
}
