use crate::collector::{Counters, NoopCounters, OwnedJoinResult};
use crate::encoding::{DecodedKey, KeyCodec, RangeKey, SpanningKey};
use crate::partition::{PartitionTable, RangePartitioner};
use crate::pipeline::{LocalJoin, brute_force_join};
use crate::sweep::SweepJoin;
use crate::{ADDRESS_SPACE, Address, JoinConfig};

use quickcheck::{QuickCheck, TestResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn sorted4(a: u32, b: u32, c: u32, d: u32) -> [u32; 4] {
    let mut v = [a, b, c, d];
    v.sort_unstable();
    v
}

fn ordered(a: u32, b: u32) -> RangeKey {
    RangeKey {
        begin: a.min(b),
        end: a.max(b),
    }
}

#[cfg(test)]
mod codec_properties {
    use super::*;

    fn roundtrip(codec: KeyCodec, key: DecodedKey) -> bool {
        let encoded = codec.encode(&key);
        codec.decode(encoded.as_bytes()) == Ok(key)
    }

    #[test]
    fn prop_roundtrip_every_shape() {
        fn prop(a: u32, b: u32, c: u32, d: u32) -> bool {
            let [w, x, y, z] = sorted4(a, b, c, d);
            let span = SpanningKey {
                clipped_begin: x,
                clipped_end: y,
                real_begin: w,
                real_end: z,
            };
            [KeyCodec::default(), KeyCodec::new('^', '_').unwrap()]
                .into_iter()
                .all(|codec| {
                    roundtrip(codec, DecodedKey::Point(a))
                        && roundtrip(codec, DecodedKey::Range(ordered(a, b)))
                        && roundtrip(codec, DecodedKey::Spanning(span))
                })
        }
        QuickCheck::new()
            .tests(1000)
            .quickcheck(prop as fn(u32, u32, u32, u32) -> bool);
    }

    #[test]
    fn prop_point_sorts_after_ranges_at_same_begin() {
        fn prop(a: u32, b: u32) -> TestResult {
            let codec = KeyCodec::default();
            let range = ordered(a, b);
            let point = codec.encode_point(range.begin);
            let later = range.begin.checked_add(1).map(|next| codec.encode_point(next));
            let encoded = codec.encode_range(range);
            if encoded >= point {
                return TestResult::failed();
            }
            TestResult::from_bool(later.is_none_or(|later| point < later))
        }
        QuickCheck::new()
            .tests(1000)
            .quickcheck(prop as fn(u32, u32) -> TestResult);
    }
}

#[cfg(test)]
mod partition_properties {
    use super::*;

    #[test]
    fn prop_partition_coverage() {
        fn prop(p: u16, addr: u32) -> bool {
            let table = match PartitionTable::new(p as u32 % 4096 + 1) {
                Ok(table) => table,
                Err(_) => return false,
            };
            let mut next = 0u64;
            for part in table.iter() {
                if part.lower as u64 != next || part.lower > part.upper {
                    return false;
                }
                next = part.upper as u64 + 1;
            }
            let owner = table.partition_containing(addr);
            next == ADDRESS_SPACE && owner.contains(addr) && owner.index == table.partition_of(addr)
        }
        QuickCheck::new()
            .tests(300)
            .quickcheck(prop as fn(u16, u32) -> bool);
    }

    #[test]
    fn prop_spanning_exhaustive() {
        fn prop(p: u8, a: u32, b: u32) -> bool {
            let partitioner = match RangePartitioner::new(KeyCodec::default(), p as u32 + 1) {
                Ok(partitioner) => partitioner,
                Err(_) => return false,
            };
            let range = ordered(a, b);
            let fragments = partitioner.span_key(range);

            let mut cursor = range.begin as u64;
            for fragment in &fragments {
                let partition = partitioner.partition_for(&DecodedKey::Spanning(*fragment));
                let Some(bounds) = partitioner.table().bounds(partition) else {
                    return false;
                };
                if fragment.clipped_begin as u64 != cursor
                    || fragment.real() != range
                    || !bounds.contains(fragment.clipped_begin)
                    || !bounds.contains(fragment.clipped_end)
                {
                    return false;
                }
                cursor = fragment.clipped_end as u64 + 1;
            }
            cursor == range.end as u64 + 1
        }
        QuickCheck::new()
            .tests(1000)
            .quickcheck(prop as fn(u8, u32, u32) -> bool);
    }

    #[test]
    fn prop_point_and_fragment_consistent() {
        fn prop(p: u8, a: u32, b: u32, c: u32) -> bool {
            let codec = KeyCodec::default();
            let Ok(partitioner) = RangePartitioner::new(codec, p as u32 + 1) else {
                return false;
            };
            let mut triple = [a, b, c];
            triple.sort_unstable();
            let [begin, addr, end] = triple;
            let range = RangeKey { begin, end };

            let Ok(point_partition) = partitioner.get_partition(codec.encode_point(addr).as_bytes()) else {
                return false;
            };
            partitioner
                .span_key(range)
                .iter()
                .filter(|f| f.clipped().contains(addr))
                .map(|f| partitioner.get_partition(codec.encode_spanning(*f).as_bytes()))
                .eq(std::iter::once(Ok(point_partition)))
        }
        QuickCheck::new()
            .tests(1000)
            .quickcheck(prop as fn(u8, u32, u32, u32) -> bool);
    }
}

#[cfg(test)]
mod sweep_reference_model {
    use super::*;

    /// Ranges sorted by begin and ascending points, all inside `[0, limit)`
    fn generate(rng: &mut StdRng, limit: u32) -> (Vec<(RangeKey, String)>, Vec<(Address, String)>) {
        let num_ranges = rng.gen_range(0..60);
        let num_points = rng.gen_range(0..80);
        let mut ranges: Vec<(RangeKey, String)> = (0..num_ranges)
            .map(|i| {
                let begin = rng.gen_range(0..limit);
                let len = if rng.gen_bool(0.1) {
                    rng.gen_range(0..limit)
                } else {
                    rng.gen_range(0..limit / 20 + 1)
                };
                let end = begin.saturating_add(len).min(limit - 1);
                (RangeKey { begin, end }, format!("r{}", i))
            })
            .collect();
        ranges.sort();
        let mut points: Vec<(Address, String)> = (0..num_points)
            .map(|i| (rng.gen_range(0..limit), format!("p{}", i)))
            .collect();
        points.sort();
        (ranges, points)
    }

    fn sweep(
        codec: KeyCodec,
        ranges: &[(RangeKey, String)],
        points: &[(Address, String)],
        window: usize,
    ) -> Vec<OwnedJoinResult<String>> {
        let mut records: Vec<(String, String)> = ranges
            .iter()
            .map(|(range, value)| (codec.encode_range(*range), value.clone()))
            .chain(points.iter().map(|(addr, value)| (codec.encode_point(*addr), value.clone())))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));

        let counters = Counters::new();
        let mut results: Vec<OwnedJoinResult<String>> = Vec::new();
        let stats = SweepJoin::new(codec)
            .with_window(window, 3)
            .run(records, &counters, &mut results);
        assert_eq!(stats.out_of_order, 0);
        assert_eq!(stats.bad_keys, 0);
        results.sort();
        results
    }

    #[test]
    fn sweep_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for round in 0..200 {
            let limit = rng.gen_range(1..2000);
            let (ranges, points) = generate(&mut rng, limit);
            let expected = brute_force_join(&ranges, &points);
            assert_eq!(sweep(KeyCodec::default(), &ranges, &points, 4), expected, "round {}", round);
        }
    }

    #[test]
    fn sweep_matches_brute_force_with_custom_separators() {
        let codec = KeyCodec::new('^', '_').unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for round in 0..50 {
            let (ranges, points) = generate(&mut rng, 500);
            let expected = brute_force_join(&ranges, &points);
            assert_eq!(sweep(codec, &ranges, &points, 1000), expected, "round {}", round);
        }
    }

    #[test]
    fn local_join_matches_brute_force_over_full_space() {
        let mut rng = StdRng::seed_from_u64(7);
        for round in 0..30 {
            let num_partitions = rng.gen_range(1..=16);
            let join = LocalJoin::new(JoinConfig {
                num_partitions,
                window_capacity: 2,
                window_grow_increment: 2,
                ..JoinConfig::default()
            })
            .unwrap();

            let mut records: Vec<(DecodedKey, String)> = Vec::new();
            for i in 0..rng.gen_range(0..40) {
                let begin: u32 = rng.r#gen();
                let span: u32 = rng.gen_range(0..=u32::MAX / 4);
                let range = RangeKey { begin, end: begin.saturating_add(span) };
                records.push((DecodedKey::Range(range), format!("r{}", i)));
            }
            for i in 0..rng.gen_range(0..60) {
                records.push((DecodedKey::Point(rng.r#gen()), format!("p{}", i)));
            }

            let mut swept = join.run_decoded(records.clone(), &NoopCounters);
            swept.sort();
            assert_eq!(swept, join.brute_force(records), "round {} P = {}", round, num_partitions);
        }
    }
}
