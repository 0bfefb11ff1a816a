//! Local pipeline runner
//!
//! Stands in for the external sort and group stage: decodes input records,
//! spans and routes them with the range partitioner, sorts each partition's
//! records by key bytes and runs one sweep per partition. Partitions share
//! nothing but the counter sink, so with the `parallel` feature they are swept
//! on the rayon pool.

use std::collections::BTreeMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::collector::{CounterSink, OwnedJoinResult};
use crate::encoding::{CodecError, DecodedKey, KeyCodec, RangeKey, parse_address};
use crate::observability::{log_debug, log_info};
use crate::partition::RangePartitioner;
use crate::sweep::{SweepJoin, SweepStats};
use crate::{Address, Error, JoinConfig};

/// Counter group used while loading input
pub const PIPELINE_COUNTER_GROUP: &str = "pipeline";

/// Shortest and longest first field of an access-log line (`1.1.1.1`,
/// `255.255.255.255`)
const LOG_ADDRESS_MIN_LEN: usize = 7;
const LOG_ADDRESS_MAX_LEN: usize = 15;

/// Split an access-log line into its leading address and the rest of the line.
///
/// Returns `None` if the first space-separated field is not 7 to 15
/// characters long or does not parse as an address.
pub fn point_from_log_line(line: &str, resolve_hostnames: bool) -> Option<(Address, &str)> {
    let space = line.find(' ')?;
    if !(LOG_ADDRESS_MIN_LEN..=LOG_ADDRESS_MAX_LEN).contains(&space) {
        return None;
    }
    let addr = parse_address(&line[..space], resolve_hostnames).ok()??;
    Some((addr, &line[space + 1..]))
}

/// Parse `key<TAB>value` lines into decoded records.
///
/// Lines whose key does not decode are skipped and counted under
/// `INVALID KEYS` (or `BOUNDS ERRORS`). With `allow_log_lines`, such lines are
/// first retried as access-log lines. Blank lines are ignored.
pub fn load_records(
    text: &str,
    codec: &KeyCodec,
    counters: &dyn CounterSink,
    allow_log_lines: bool,
) -> Vec<(DecodedKey, String)> {
    let mut records = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let (raw_key, value) = line.split_once('\t').unwrap_or((line, ""));

        let err = match codec.decode(raw_key.as_bytes()) {
            Ok(key) => {
                records.push((key, value.to_string()));
                continue;
            }
            Err(err) => err,
        };

        if allow_log_lines {
            counters.incr(PIPELINE_COUNTER_GROUP, "LOG LINES", 1);
            let resolve = codec.resolves_hostnames();
            if let Some((addr, rest)) = point_from_log_line(line, resolve) {
                records.push((DecodedKey::Point(addr), rest.to_string()));
                continue;
            }
            counters.incr(PIPELINE_COUNTER_GROUP, "BAD LOG LINES", 1);
        }

        let name = match err {
            CodecError::Bounds { .. } => "BOUNDS ERRORS",
            _ => "INVALID KEYS",
        };
        counters.incr(PIPELINE_COUNTER_GROUP, name, 1);
        log_debug!(
            component = "pipeline",
            event = "record_skipped",
            error = %err,
        );
    }
    records
}

/// Every `(range, point)` pair where the range contains the point.
///
/// Checks every point against every range; the result is sorted.
pub fn brute_force_join<V: Clone + Ord>(
    ranges: &[(RangeKey, V)],
    points: &[(Address, V)],
) -> Vec<OwnedJoinResult<V>> {
    let mut results = Vec::new();
    for (point, point_value) in points {
        for (range, range_value) in ranges {
            if range.contains(*point) {
                results.push(OwnedJoinResult {
                    point: *point,
                    point_value: point_value.clone(),
                    range_value: range_value.clone(),
                    range_begin: range.begin,
                    range_end: range.end,
                });
            }
        }
    }
    results.sort();
    results
}

/// Records of one partition, sorted by encoded key
pub type PartitionRecords<V> = Vec<(String, V)>;

/// In-process partitioned join
#[derive(Debug, Clone)]
pub struct LocalJoin {
    config: JoinConfig,
    partitioner: RangePartitioner,
}

impl LocalJoin {
    /// Create a runner, validating the configuration
    pub fn new(config: JoinConfig) -> Result<Self, Error> {
        let partitioner = RangePartitioner::from_config(&config)?;
        Ok(Self { config, partitioner })
    }

    /// The configuration this runner was built with
    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// The partitioner used to route records
    pub fn partitioner(&self) -> &RangePartitioner {
        &self.partitioner
    }

    /// The key codec
    pub fn codec(&self) -> &KeyCodec {
        self.partitioner.codec()
    }

    /// Route records to partitions and sort each partition by key bytes.
    ///
    /// Only partitions that receive at least one record are returned, in
    /// ascending partition order. The sort is stable, so equal keys stay
    /// adjacent in input order.
    pub fn partition_records<I, V>(&self, records: I, counters: &dyn CounterSink) -> Vec<(u32, PartitionRecords<V>)>
    where
        I: IntoIterator<Item = (DecodedKey, V)>,
        V: Clone,
    {
        let mut partitions: BTreeMap<u32, PartitionRecords<V>> = BTreeMap::new();

        for (key, value) in records {
            self.partitioner.route(&key, value, counters, |record| {
                partitions
                    .entry(record.partition)
                    .or_default()
                    .push((record.key, record.value));
            });
        }
        partitions
            .into_iter()
            .map(|(index, mut records)| {
                records.sort_by(|a, b| a.0.cmp(&b.0));
                (index, records)
            })
            .collect()
    }

    /// Decode raw records and join them. Undecodable keys are counted and skipped.
    pub fn run<I, K, V>(&self, records: I, counters: &dyn CounterSink) -> Vec<OwnedJoinResult<V>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: Clone + Send,
    {
        let codec = *self.codec();
        let decoded = records.into_iter().filter_map(|(raw, value)| match codec.decode(raw.as_ref()) {
            Ok(key) => Some((key, value)),
            Err(err) => {
                counters.incr(PIPELINE_COUNTER_GROUP, "INVALID KEYS", 1);
                log_debug!(
                    component = "pipeline",
                    event = "record_skipped",
                    error = %err,
                );
                None
            }
        });
        self.run_decoded(decoded, counters)
    }

    /// Join already decoded records.
    ///
    /// Results come back in partition order, which is ascending point order.
    pub fn run_decoded<I, V>(&self, records: I, counters: &dyn CounterSink) -> Vec<OwnedJoinResult<V>>
    where
        I: IntoIterator<Item = (DecodedKey, V)>,
        V: Clone + Send,
    {
        let partitions = self.partition_records(records, counters);
        log_info!(
            component = "pipeline",
            event = "partitions_built",
            partitions = partitions.len(),
            records = partitions.iter().map(|(_, records)| records.len()).sum::<usize>(),
        );

        let per_partition = self.sweep_partitions(partitions, counters);

        let mut total = SweepStats::default();
        let mut results = Vec::with_capacity(per_partition.iter().map(|(_, r)| r.len()).sum());
        for (stats, partition_results) in per_partition {
            total.merge(&stats);
            results.extend(partition_results);
        }
        log_info!(
            component = "pipeline",
            event = "join_finished",
            keys = total.keys,
            matches = total.matches,
            bad_keys = total.bad_keys,
            out_of_order = total.out_of_order,
            peak_window = total.peak_window,
        );
        results
    }

    /// Join decoded records by checking every point against every range
    pub fn brute_force<I, V>(&self, records: I) -> Vec<OwnedJoinResult<V>>
    where
        I: IntoIterator<Item = (DecodedKey, V)>,
        V: Clone + Ord,
    {
        let mut ranges = Vec::new();
        let mut points = Vec::new();
        for (key, value) in records {
            match key.real_range() {
                Some(range) => ranges.push((range, value)),
                None => points.push((key.partition_address(), value)),
            }
        }
        brute_force_join(&ranges, &points)
    }

    fn sweep<V>(&self) -> SweepJoin<V> {
        SweepJoin::new(*self.codec())
            .with_window(self.config.window_capacity, self.config.window_grow_increment)
            .reject_out_of_order(self.config.reject_out_of_order)
    }

    fn sweep_one<V: Clone>(
        &self,
        index: u32,
        records: PartitionRecords<V>,
        counters: &dyn CounterSink,
    ) -> (SweepStats, Vec<OwnedJoinResult<V>>) {
        let mut results = Vec::new();
        let stats = self.sweep().run(records, counters, &mut results);
        log_debug!(
            component = "pipeline",
            event = "partition_swept",
            partition = index,
            matches = stats.matches,
        );
        (stats, results)
    }

    #[cfg(not(feature = "parallel"))]
    fn sweep_partitions<V: Clone + Send>(
        &self,
        partitions: Vec<(u32, PartitionRecords<V>)>,
        counters: &dyn CounterSink,
    ) -> Vec<(SweepStats, Vec<OwnedJoinResult<V>>)> {
        partitions
            .into_iter()
            .map(|(index, records)| self.sweep_one(index, records, counters))
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn sweep_partitions<V: Clone + Send>(
        &self,
        partitions: Vec<(u32, PartitionRecords<V>)>,
        counters: &dyn CounterSink,
    ) -> Vec<(SweepStats, Vec<OwnedJoinResult<V>>)> {
        partitions
            .into_par_iter()
            .map(|(index, records)| self.sweep_one(index, records, counters))
            .collect()
    }
}
