//! SpanJoin: partitioned range containment join
//!
//! This crate joins a large set of address ranges against a stream of point
//! addresses. The address space is cut into contiguous partitions, ranges that
//! cross partition boundaries are spanned into per-partition fragments, and
//! each partition is then joined with a single sorted sweep that keeps only a
//! small window of still-relevant ranges in memory.

#![warn(missing_docs)]

pub(crate) mod observability;

/// Sortable text encoding of point, range and spanning keys
pub mod encoding;

/// Partition table and range spanning
pub mod partition;

/// Per-partition sweep join
pub mod sweep;

/// Counter sinks and join result sinks
pub mod collector;

/// In-process stand-in for the external sort and group stage
pub mod pipeline;

/// Property tests for the codec, partitioner and sweep
#[cfg(test)]
mod join_property_tests;

// Re-exports
pub use collector::{Counters, CounterSink, JoinResult, JoinSink, NoopCounters, OwnedJoinResult};
pub use config::{ConfigSource, JoinConfig};
pub use encoding::{CodecError, DecodedKey, KeyCodec, RangeKey, SpanningKey};
pub use error::Error;
pub use partition::{PartitionError, PartitionRange, PartitionTable, RangePartitioner};
pub use pipeline::{LocalJoin, brute_force_join};
pub use sweep::{ActiveRange, ActiveRangeWindow, SweepError, SweepJoin, SweepStats};

/// A 32-bit unsigned address
pub type Address = u32;

/// Number of distinct addresses, `2^32`
pub const ADDRESS_SPACE: u64 = 1 << 32;

/// Error types for SpanJoin operations
pub mod error {
    use thiserror::Error as ThisError;

    use crate::encoding::CodecError;
    use crate::partition::PartitionError;
    use crate::sweep::SweepError;

    /// Error types that can occur in SpanJoin operations
    #[derive(Debug, ThisError)]
    pub enum Error {
        /// An I/O error occurred
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),
        /// A key could not be encoded or decoded
        #[error(transparent)]
        Codec(#[from] CodecError),
        /// A key could not be partitioned or spanned
        #[error(transparent)]
        Partition(#[from] PartitionError),
        /// A sweep rejected a record
        #[error(transparent)]
        Sweep(#[from] SweepError),
        /// Configuration error
        #[error("Configuration error: {0}")]
        Config(String),
    }
}

/// Configuration options for SpanJoin
pub mod config {
    use std::collections::HashMap;

    use ahash::AHashMap;

    use crate::encoding::{DEFAULT_POINT_SUFFIX, DEFAULT_RANGE_SEPARATOR};
    use crate::error::Error;
    use crate::sweep::{DEFAULT_GROW_INCREMENT, DEFAULT_WINDOW_CAPACITY};

    /// Lookup key for the number of partitions
    pub const PARTITIONS_KEY: &str = "spanjoin.partitions";
    /// Lookup key for the range separator character
    pub const RANGE_SEPARATOR_KEY: &str = "spanjoin.range.separator.char";
    /// Lookup key for the point suffix character
    pub const POINT_SUFFIX_KEY: &str = "spanjoin.point.suffix.char";
    /// Lookup key enabling hostname resolution in lenient key parsing
    pub const RESOLVE_HOSTNAMES_KEY: &str = "spanjoin.resolve.hostnames";
    /// Lookup key for the baseline window capacity
    pub const WINDOW_CAPACITY_KEY: &str = "spanjoin.window.capacity";
    /// Lookup key for the window growth increment
    pub const WINDOW_GROW_KEY: &str = "spanjoin.window.grow";
    /// Lookup key controlling rejection of out-of-order keys
    pub const REJECT_OUT_OF_ORDER_KEY: &str = "spanjoin.reject.out.of.order";

    /// A read-only source of configuration values
    pub trait ConfigSource {
        /// Look up the raw value stored under `key`
        fn get(&self, key: &str) -> Option<String>;

        /// Look up `key`, falling back to `default` when it is absent
        fn get_or(&self, key: &str, default: &str) -> String {
            self.get(key).unwrap_or_else(|| default.to_string())
        }
    }

    impl ConfigSource for HashMap<String, String> {
        fn get(&self, key: &str) -> Option<String> {
            HashMap::get(self, key).cloned()
        }
    }

    impl ConfigSource for AHashMap<String, String> {
        fn get(&self, key: &str) -> Option<String> {
            let map: &HashMap<String, String, ahash::RandomState> = self;
            map.get(key).cloned()
        }
    }

    /// Configuration for a partitioned join
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct JoinConfig {
        /// Number of contiguous partitions the address space is cut into
        pub num_partitions: u32,
        /// Joins the fields of range and spanning keys
        pub range_separator: char,
        /// Appended to point keys so they sort after ranges starting at the same address
        pub point_suffix: char,
        /// Resolve hostnames when a key field is neither hex nor dotted
        pub resolve_hostnames: bool,
        /// Baseline capacity of the active range window
        pub window_capacity: usize,
        /// Number of slots added whenever the window fills up
        pub window_grow_increment: usize,
        /// Skip keys that arrive out of sort order instead of joining them
        pub reject_out_of_order: bool,
    }

    impl Default for JoinConfig {
        fn default() -> Self {
            Self {
                num_partitions: 1,
                range_separator: DEFAULT_RANGE_SEPARATOR,
                point_suffix: DEFAULT_POINT_SUFFIX,
                resolve_hostnames: false,
                window_capacity: DEFAULT_WINDOW_CAPACITY,
                window_grow_increment: DEFAULT_GROW_INCREMENT,
                reject_out_of_order: true,
            }
        }
    }

    impl JoinConfig {
        /// Build a configuration from a lookup source, using defaults for absent keys
        pub fn from_source(source: &dyn ConfigSource) -> Result<Self, Error> {
            let defaults = Self::default();
            let config = Self {
                num_partitions: parse_value(source, PARTITIONS_KEY, defaults.num_partitions)?,
                range_separator: parse_char(source, RANGE_SEPARATOR_KEY, defaults.range_separator)?,
                point_suffix: parse_char(source, POINT_SUFFIX_KEY, defaults.point_suffix)?,
                resolve_hostnames: parse_value(
                    source,
                    RESOLVE_HOSTNAMES_KEY,
                    defaults.resolve_hostnames,
                )?,
                window_capacity: parse_value(source, WINDOW_CAPACITY_KEY, defaults.window_capacity)?,
                window_grow_increment: parse_value(
                    source,
                    WINDOW_GROW_KEY,
                    defaults.window_grow_increment,
                )?,
                reject_out_of_order: parse_value(
                    source,
                    REJECT_OUT_OF_ORDER_KEY,
                    defaults.reject_out_of_order,
                )?,
            };
            config.validate()?;
            Ok(config)
        }

        /// Check the separator constraints and the sizing values
        pub fn validate(&self) -> Result<(), Error> {
            crate::encoding::validate_separators(self.range_separator, self.point_suffix)?;
            if self.num_partitions == 0 {
                return Err(Error::Config("number of partitions must be at least 1".to_string()));
            }
            if self.window_grow_increment == 0 {
                return Err(Error::Config("window growth increment must be at least 1".to_string()));
            }
            Ok(())
        }
    }

    fn parse_value<T: std::str::FromStr>(
        source: &dyn ConfigSource,
        key: &str,
        default: T,
    ) -> Result<T, Error> {
        match source.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value [{}] for {}", raw, key))),
        }
    }

    fn parse_char(source: &dyn ConfigSource, key: &str, default: char) -> Result<char, Error> {
        match source.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .chars()
                .next()
                .ok_or_else(|| Error::Config(format!("{} must not be empty", key))),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_defaults_are_valid() {
            let config = JoinConfig::default();
            assert_eq!(config.range_separator, ':');
            assert_eq!(config.point_suffix, ';');
            config.validate().unwrap();
        }

        #[test]
        fn test_from_source_overrides() {
            let mut source = HashMap::new();
            source.insert(PARTITIONS_KEY.to_string(), "8".to_string());
            source.insert(RANGE_SEPARATOR_KEY.to_string(), "^".to_string());
            source.insert(POINT_SUFFIX_KEY.to_string(), "_".to_string());
            source.insert(REJECT_OUT_OF_ORDER_KEY.to_string(), "false".to_string());

            let config = JoinConfig::from_source(&source).unwrap();
            assert_eq!(config.num_partitions, 8);
            assert_eq!(config.range_separator, '^');
            assert_eq!(config.point_suffix, '_');
            assert!(!config.reject_out_of_order);
            assert_eq!(config.window_capacity, 1000);
        }

        #[test]
        fn test_from_source_rejects_misordered_separators() {
            let mut source = AHashMap::new();
            source.insert(RANGE_SEPARATOR_KEY.to_string(), ";".to_string());
            source.insert(POINT_SUFFIX_KEY.to_string(), ":".to_string());

            let err = JoinConfig::from_source(&source).unwrap_err();
            assert!(matches!(err, Error::Codec(_)), "unexpected error {:?}", err);
        }

        #[test]
        fn test_from_source_rejects_bad_numbers() {
            let mut source = HashMap::new();
            source.insert(PARTITIONS_KEY.to_string(), "many".to_string());
            assert!(matches!(JoinConfig::from_source(&source), Err(Error::Config(_))));

            source.insert(PARTITIONS_KEY.to_string(), "0".to_string());
            assert!(matches!(JoinConfig::from_source(&source), Err(Error::Config(_))));
        }

        #[test]
        fn test_get_or_falls_back() {
            let source: HashMap<String, String> = HashMap::new();
            assert_eq!(source.get_or("missing", "dflt"), "dflt");
        }
    }
}
