//! Counter sinks and join result sinks
//!
//! The join core reports progress through two narrow interfaces: a monotonic
//! counter sink and a result sink. Neither assumes anything about where the
//! numbers or rows end up.

use std::fmt;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::Address;
use crate::encoding::{format_dotted, format_hex};

/// A monotonic counter sink
pub trait CounterSink: Send + Sync {
    /// Add `n` to the counter `name` in `group`
    fn incr(&self, group: &str, name: &str, n: u64);
}

/// Discards every increment
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCounters;

impl CounterSink for NoopCounters {
    fn incr(&self, _group: &str, _name: &str, _n: u64) {}
}

/// Thread-safe in-memory counters
#[derive(Debug, Default)]
pub struct Counters {
    values: Mutex<AHashMap<(String, String), u64>>,
}

impl Counters {
    /// Create an empty counter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, zero if never incremented
    pub fn get(&self, group: &str, name: &str) -> u64 {
        self.values
            .lock()
            .get(&(group.to_string(), name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// All counters, sorted by group then name
    pub fn snapshot(&self) -> Vec<(String, String, u64)> {
        let mut all: Vec<(String, String, u64)> = self
            .values
            .lock()
            .iter()
            .map(|((group, name), value)| (group.clone(), name.clone(), *value))
            .collect();
        all.sort();
        all
    }
}

impl CounterSink for Counters {
    fn incr(&self, group: &str, name: &str, n: u64) {
        let mut values = self.values.lock();
        match values.get_mut(&(group.to_string(), name.to_string())) {
            Some(value) => *value += n,
            None => {
                values.insert((group.to_string(), name.to_string()), n);
            }
        }
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut current_group: Option<String> = None;
        for (group, name, value) in self.snapshot() {
            if current_group.as_deref() != Some(group.as_str()) {
                writeln!(f, "{}", group)?;
                current_group = Some(group);
            }
            writeln!(f, "  {:<24} {}", name, value)?;
        }
        Ok(())
    }
}

/// One match of a point against an active range
#[derive(Debug, PartialEq, Eq)]
pub struct JoinResult<'a, V> {
    /// The point address
    pub point: Address,
    /// The value carried by the point
    pub point_value: &'a V,
    /// The value carried by the matching range
    pub range_value: &'a V,
    /// First address of the matching range, unclipped
    pub range_begin: Address,
    /// Last address of the matching range, unclipped
    pub range_end: Address,
}

// Manual impls: the derives would require `V: Copy`
impl<V> Clone for JoinResult<'_, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for JoinResult<'_, V> {}

impl<V: Clone> JoinResult<'_, V> {
    /// Copy the borrowed values into an owned result
    pub fn to_owned_result(&self) -> OwnedJoinResult<V> {
        OwnedJoinResult {
            point: self.point,
            point_value: self.point_value.clone(),
            range_value: self.range_value.clone(),
            range_begin: self.range_begin,
            range_end: self.range_end,
        }
    }
}

/// An owned join result
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OwnedJoinResult<V> {
    /// The point address
    pub point: Address,
    /// The value carried by the point
    pub point_value: V,
    /// The value carried by the matching range
    pub range_value: V,
    /// First address of the matching range, unclipped
    pub range_begin: Address,
    /// Last address of the matching range, unclipped
    pub range_end: Address,
}

impl<V: fmt::Display> OwnedJoinResult<V> {
    /// Render as `point \t value \t rangeValue \t begin \t end`, with
    /// addresses as hex or as dotted quads
    pub fn to_tsv(&self, dotted: bool) -> String {
        let render = |addr: Address| {
            if dotted {
                format_dotted(addr)
            } else {
                format_hex(addr)
            }
        };
        format!(
            "{}\t{}\t{}\t{}\t{}",
            render(self.point),
            self.point_value,
            self.range_value,
            render(self.range_begin),
            render(self.range_end)
        )
    }
}

/// Receives join results
pub trait JoinSink<V> {
    /// Accept one result
    fn emit(&mut self, result: JoinResult<'_, V>);
}

impl<V, F> JoinSink<V> for F
where
    F: FnMut(JoinResult<'_, V>),
{
    fn emit(&mut self, result: JoinResult<'_, V>) {
        self(result)
    }
}

impl<V: Clone> JoinSink<V> for Vec<OwnedJoinResult<V>> {
    fn emit(&mut self, result: JoinResult<'_, V>) {
        self.push(result.to_owned_result());
    }
}

/// Counts results without keeping them
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountingSink {
    /// Number of results seen
    pub count: u64,
}

impl<V> JoinSink<V> for CountingSink {
    fn emit(&mut self, _result: JoinResult<'_, V>) {
        self.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let counters = Counters::new();
        counters.incr("sweep", "BAD KEYS", 1);
        counters.incr("sweep", "BAD KEYS", 2);
        counters.incr("spanning", "OUTPUT KEYS", 5);

        assert_eq!(counters.get("sweep", "BAD KEYS"), 3);
        assert_eq!(counters.get("sweep", "MISSING"), 0);
        assert_eq!(
            counters.snapshot(),
            vec![
                ("spanning".to_string(), "OUTPUT KEYS".to_string(), 5),
                ("sweep".to_string(), "BAD KEYS".to_string(), 3),
            ]
        );

        let rendered = counters.to_string();
        assert!(rendered.starts_with("spanning\n"));
        assert!(rendered.contains("BAD KEYS"));
    }

    #[test]
    fn test_counters_are_shareable_across_threads() {
        let counters = std::sync::Arc::new(Counters::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.incr("sweep", "TOTAL KEYS", 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.get("sweep", "TOTAL KEYS"), 4000);
    }

    #[test]
    fn test_tsv_rendering() {
        let result = OwnedJoinResult {
            point: 0x0a000001,
            point_value: "GET /".to_string(),
            range_value: "corp".to_string(),
            range_begin: 0x0a000000,
            range_end: 0x0affffff,
        };
        assert_eq!(result.to_tsv(false), "0a000001\tGET /\tcorp\t0a000000\t0affffff");
        assert_eq!(result.to_tsv(true), "10.0.0.1\tGET /\tcorp\t10.0.0.0\t10.255.255.255");
    }

    #[test]
    fn test_sinks() {
        let point_value = "p".to_string();
        let range_value = "r".to_string();
        let result = JoinResult {
            point: 1,
            point_value: &point_value,
            range_value: &range_value,
            range_begin: 0,
            range_end: 2,
        };

        let mut owned: Vec<OwnedJoinResult<String>> = Vec::new();
        owned.emit(result);
        assert_eq!(owned[0].range_value, "r");

        let mut counting = CountingSink::default();
        JoinSink::<String>::emit(&mut counting, result);
        assert_eq!(counting.count, 1);

        let mut points = Vec::new();
        let mut closure = |r: JoinResult<'_, String>| points.push(r.point);
        closure.emit(result);
        assert_eq!(points, vec![1]);
    }
}
