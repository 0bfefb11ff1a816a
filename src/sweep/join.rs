//! Sorted sweep over one partition's keys
//!
//! Range keys are appended to the active window; each point key first evicts
//! every range that ends before it and then matches all survivors. Records
//! must arrive sorted by encoded key with equal keys adjacent, which the
//! separator ordering turns into "ranges by begin, each point after the
//! ranges that begin at it".

use smallvec::SmallVec;
use thiserror::Error;

use crate::collector::{CounterSink, JoinResult, JoinSink};
use crate::encoding::{DecodedKey, KeyCodec, RangeKey};
use crate::observability::{log_debug, log_warn};
use crate::sweep::window::{ActiveRangeWindow, DEFAULT_GROW_INCREMENT, DEFAULT_WINDOW_CAPACITY};
use crate::{Address, JoinConfig};

/// Counter group used by the sweep
pub const SWEEP_COUNTER_GROUP: &str = "sweep";

/// Errors a sweep reports for a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SweepError {
    /// A key arrived before a key it should follow
    #[error("key at {current:08x} arrived after key at {previous:08x}")]
    OutOfOrder {
        /// Address of the key already seen
        previous: Address,
        /// Address of the offending key
        current: Address,
    },
}

/// Per-sweep tallies, flushed to a counter sink when the sweep ends
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Distinct keys seen, including bad ones
    pub keys: u64,
    /// Keys that failed to decode
    pub bad_keys: u64,
    /// Keys that violated sort order
    pub out_of_order: u64,
    /// Range and spanning keys
    pub range_keys: u64,
    /// Values attached to range keys
    pub range_values: u64,
    /// Point keys
    pub point_keys: u64,
    /// Values attached to point keys
    pub point_values: u64,
    /// Join results emitted
    pub matches: u64,
    /// Point keys that found the window empty
    pub empty_window: u64,
    /// Times the window grew
    pub window_resizes: u64,
    /// Largest window size reached
    pub peak_window: u64,
}

impl SweepStats {
    /// Add these tallies to `counters` under the sweep group
    pub fn report(&self, counters: &dyn CounterSink) {
        let tallies = [
            ("TOTAL KEYS", self.keys),
            ("BAD KEYS", self.bad_keys),
            ("OUT OF ORDER KEYS", self.out_of_order),
            ("RANGE KEYS", self.range_keys),
            ("RANGE VALUES", self.range_values),
            ("POINT KEYS", self.point_keys),
            ("POINT VALUES", self.point_values),
            ("MATCHES", self.matches),
            ("EMPTY WINDOW", self.empty_window),
            ("WINDOW RESIZE", self.window_resizes),
        ];
        for (name, value) in tallies {
            if value > 0 {
                counters.incr(SWEEP_COUNTER_GROUP, name, value);
            }
        }
    }

    /// Combine the tallies of two sweeps
    pub fn merge(&mut self, other: &SweepStats) {
        self.keys += other.keys;
        self.bad_keys += other.bad_keys;
        self.out_of_order += other.out_of_order;
        self.range_keys += other.range_keys;
        self.range_values += other.range_values;
        self.point_keys += other.point_keys;
        self.point_values += other.point_values;
        self.matches += other.matches;
        self.empty_window += other.empty_window;
        self.window_resizes += other.window_resizes;
        self.peak_window = self.peak_window.max(other.peak_window);
    }
}

/// Values sharing one key
type ValueGroup<V> = SmallVec<[V; 4]>;

/// Join state for one partition
#[derive(Debug, Clone)]
pub struct SweepJoin<V> {
    codec: KeyCodec,
    window: ActiveRangeWindow<V>,
    reject_out_of_order: bool,
    last_range_begin: Option<Address>,
    last_point: Option<Address>,
    stats: SweepStats,
}

impl<V> SweepJoin<V> {
    /// Create a sweep with the default window sizing
    pub fn new(codec: KeyCodec) -> Self {
        Self {
            codec,
            window: ActiveRangeWindow::new(DEFAULT_WINDOW_CAPACITY, DEFAULT_GROW_INCREMENT),
            reject_out_of_order: true,
            last_range_begin: None,
            last_point: None,
            stats: SweepStats::default(),
        }
    }

    /// Create a sweep from a join configuration
    pub fn from_config(config: &JoinConfig) -> Result<Self, crate::Error> {
        config.validate()?;
        let codec = KeyCodec::from_config(config)?;
        Ok(Self::new(codec)
            .with_window(config.window_capacity, config.window_grow_increment)
            .reject_out_of_order(config.reject_out_of_order))
    }

    /// Replace the window with one of the given baseline and growth increment
    pub fn with_window(mut self, baseline: usize, grow_by: usize) -> Self {
        self.window = ActiveRangeWindow::new(baseline, grow_by);
        self
    }

    /// Whether out-of-order keys are skipped (`true`) or processed as-is
    pub fn reject_out_of_order(mut self, reject: bool) -> Self {
        self.reject_out_of_order = reject;
        self
    }

    /// The codec used to decode raw keys
    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// The active range window
    pub fn window(&self) -> &ActiveRangeWindow<V> {
        &self.window
    }

    /// Tallies so far
    pub fn stats(&self) -> &SweepStats {
        &self.stats
    }

    /// Forget all state so the partition can be swept again from the start
    pub fn reset(&mut self) {
        self.window.clear();
        self.last_range_begin = None;
        self.last_point = None;
        self.stats = SweepStats::default();
    }

    /// Process one decoded key and its values
    ///
    /// Returns the number of join results emitted. Range values are cloned
    /// into the window.
    pub fn process_key<S>(
        &mut self,
        key: &DecodedKey,
        values: &[V],
        sink: &mut S,
    ) -> Result<usize, SweepError>
    where
        V: Clone,
        S: JoinSink<V> + ?Sized,
    {
        self.stats.keys += 1;
        self.check_order(key)?;
        match key.real_range() {
            Some(range) => {
                self.activate(range, values.iter().cloned());
                Ok(0)
            }
            None => Ok(self.probe(key.partition_address(), values, sink)),
        }
    }

    /// Decode `raw` and process it with its values.
    ///
    /// Decode failures and order violations are counted and logged, and the
    /// record is skipped. Returns the number of join results emitted.
    pub fn process_group<S>(&mut self, raw: &[u8], values: &[V], sink: &mut S) -> usize
    where
        V: Clone,
        S: JoinSink<V> + ?Sized,
    {
        match self.codec.decode(raw) {
            Ok(key) => self.process_key(&key, values, sink).unwrap_or(0),
            Err(err) => {
                self.stats.keys += 1;
                self.reject(&err);
                0
            }
        }
    }

    /// Sweep a whole partition.
    ///
    /// `records` must be sorted by key bytes; adjacent records with equal
    /// keys form one group. Tallies are added to `counters` at the end.
    pub fn run<I, K, S>(mut self, records: I, counters: &dyn CounterSink, sink: &mut S) -> SweepStats
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        S: JoinSink<V> + ?Sized,
    {
        let mut current: Option<K> = None;
        let mut values: ValueGroup<V> = SmallVec::new();

        for (key, value) in records {
            let same = match &current {
                Some(current) => {
                    let current: &[u8] = current.as_ref();
                    let next: &[u8] = key.as_ref();
                    current == next
                }
                None => false,
            };
            if !same {
                if let Some(previous) = current.take() {
                    self.consume_group(previous.as_ref(), std::mem::take(&mut values), sink);
                }
                current = Some(key);
            }
            values.push(value);
        }
        if let Some(last) = current {
            self.consume_group(last.as_ref(), values, sink);
        }

        self.stats.peak_window = self.window.peak_len() as u64;
        log_debug!(
            component = "sweep",
            event = "sweep_finished",
            keys = self.stats.keys,
            matches = self.stats.matches,
            bad_keys = self.stats.bad_keys,
            peak_window = self.stats.peak_window,
        );
        self.stats.report(counters);
        self.stats
    }

    /// Like `process_group`, but moves owned range values into the window
    fn consume_group<S>(&mut self, raw: &[u8], values: ValueGroup<V>, sink: &mut S)
    where
        S: JoinSink<V> + ?Sized,
    {
        self.stats.keys += 1;
        let key = match self.codec.decode(raw) {
            Ok(key) => key,
            Err(err) => {
                self.reject(&err);
                return;
            }
        };
        if self.check_order(&key).is_err() {
            return;
        }
        match key.real_range() {
            Some(range) => self.activate(range, values),
            None => {
                self.probe(key.partition_address(), &values, sink);
            }
        }
    }

    fn reject(&mut self, err: &crate::encoding::CodecError) {
        self.stats.bad_keys += 1;
        log_debug!(
            component = "sweep",
            event = "bad_key",
            error = %err,
        );
    }

    /// Check `key` against the keys seen so far and record its position
    fn check_order(&mut self, key: &DecodedKey) -> Result<(), SweepError> {
        let current = key.partition_address();
        let violation = if key.is_point() {
            self.last_point.filter(|&previous| current < previous)
        } else {
            self.last_range_begin
                .filter(|&previous| current < previous)
                .or_else(|| self.last_point.filter(|&previous| current <= previous))
        };

        if let Some(previous) = violation {
            self.stats.out_of_order += 1;
            log_warn!(
                component = "sweep",
                event = "out_of_order_key",
                previous = previous,
                current = current,
                skipped = self.reject_out_of_order,
            );
            if self.reject_out_of_order {
                return Err(SweepError::OutOfOrder { previous, current });
            }
        }

        if key.is_point() {
            self.last_point = Some(current);
        } else {
            self.last_range_begin = Some(current);
        }
        Ok(())
    }

    /// Append `range` once per value
    fn activate(&mut self, range: RangeKey, values: impl IntoIterator<Item = V>) {
        self.stats.range_keys += 1;
        for value in values {
            self.stats.range_values += 1;
            if self.window.activate(range.begin, range.end, value) {
                self.stats.window_resizes += 1;
                log_debug!(
                    component = "sweep",
                    event = "window_grown",
                    capacity = self.window.capacity(),
                );
            }
        }
    }

    /// Evict expired ranges, then match `point` against the survivors
    fn probe<S>(&mut self, point: Address, values: &[V], sink: &mut S) -> usize
    where
        S: JoinSink<V> + ?Sized,
    {
        self.stats.point_keys += 1;
        self.stats.point_values += values.len() as u64;

        self.window.evict(point);
        if self.window.is_empty() {
            self.stats.empty_window += 1;
            return 0;
        }

        let mut emitted = 0;
        for point_value in values {
            for range in self.window.iter() {
                sink.emit(JoinResult {
                    point,
                    point_value,
                    range_value: &range.value,
                    range_begin: range.begin,
                    range_end: range.end,
                });
                emitted += 1;
            }
        }
        self.stats.matches += emitted as u64;
        emitted
    }
}
