//! Property-based tests for the key codec and the statistics helpers.
//!
//! The codec must order encoded keys exactly like the tuples they encode,
//! since every grouping stage relies on byte order. Interval coalescing must
//! not depend on where the input is split into days.

use fleetlog::codec::{decode, decode_prefix, encode};
use fleetlog::stats::{coalesce, merge_intervals, QuantileSample, RebootTracker};
use fleetlog::time::SECONDS_PER_DAY;
use proptest::prelude::*;

fn key_string() -> impl Strategy<Value = String> {
    // NUL and 0xFF-adjacent characters exercise the escaping.
    prop::collection::vec(
        prop_oneof![
            Just('\0'),
            Just('\u{1}'),
            Just('\u{ff}'),
            Just('_'),
            prop::char::range('a', 'z'),
        ],
        0..8,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

proptest! {
    #[test]
    fn prop_integer_order_is_byte_order(a in any::<i64>(), b in any::<i64>()) {
        prop_assert_eq!(a.cmp(&b), encode(&a).cmp(&encode(&b)));
    }

    #[test]
    fn prop_string_order_is_byte_order(a in key_string(), b in key_string()) {
        prop_assert_eq!(a.as_bytes().cmp(b.as_bytes()), encode(&a).cmp(&encode(&b)));
    }

    #[test]
    fn prop_tuple_order_is_byte_order(
        a in (key_string(), any::<i64>(), key_string()),
        b in (key_string(), any::<i64>(), key_string()),
    ) {
        let tuple_order = a.0.as_bytes()
            .cmp(b.0.as_bytes())
            .then(a.1.cmp(&b.1))
            .then(a.2.as_bytes().cmp(b.2.as_bytes()));
        prop_assert_eq!(tuple_order, encode(&a).cmp(&encode(&b)));
    }

    #[test]
    fn prop_prefix_decodes_and_leaves_suffix(node in key_string(), ts in any::<i64>(), tail in any::<i64>()) {
        let bytes = encode(&(node.clone(), ts, tail));
        let ((prefix_node, prefix_ts), rest): ((String, i64), &[u8]) = decode_prefix(&bytes).unwrap();
        prop_assert_eq!(prefix_node, node);
        prop_assert_eq!(prefix_ts, ts);
        prop_assert_eq!(decode::<i64>(rest).unwrap(), tail);
    }

    #[test]
    fn prop_per_day_coalescing_matches_whole_stream(
        mut points in prop::collection::vec(0i64..4 * SECONDS_PER_DAY, 0..200),
        threshold in 0i64..3_600,
    ) {
        points.sort_unstable();
        let whole = coalesce(points.iter().copied(), threshold);

        let mut per_day = Vec::new();
        for day in 0..4 {
            let start = day * SECONDS_PER_DAY;
            let day_points = points.iter().copied().filter(|p| (start..start + SECONDS_PER_DAY).contains(p));
            per_day.extend(coalesce(day_points, threshold));
        }
        prop_assert_eq!(merge_intervals(per_day, threshold), whole);
    }

    #[test]
    fn prop_intervals_are_sorted_and_separated(
        mut points in prop::collection::vec(any::<i32>().prop_map(i64::from), 1..100),
        threshold in 0i64..1_000,
    ) {
        points.sort_unstable();
        let intervals = coalesce(points.iter().copied(), threshold);
        prop_assert_eq!(intervals.first().map(|i| i.start), points.first().copied());
        prop_assert_eq!(intervals.last().map(|i| i.end), points.last().copied());
        for pair in intervals.windows(2) {
            prop_assert!(pair[0].start <= pair[0].end);
            prop_assert!(pair[1].start - pair[0].end > threshold);
        }
    }

    #[test]
    fn prop_quantiles_have_capacity_and_are_sorted(
        values in prop::collection::vec(any::<i64>(), 0..300),
        capacity in 1usize..64,
        seed in any::<u64>(),
    ) {
        let mut sample = QuantileSample::with_seed(capacity, seed);
        for value in &values {
            sample.append(*value);
        }
        let quantiles = sample.quantiles();
        prop_assert_eq!(quantiles.len(), capacity);
        prop_assert!(quantiles.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(sample.count(), values.len() as u64);
        for q in &quantiles {
            prop_assert!(values.is_empty() || values.contains(q));
        }
    }

    #[test]
    fn prop_monotonic_uptime_never_reboots_until_finish(
        start in 0i64..1_000_000,
        steps in prop::collection::vec(1i64..10_000, 1..50),
    ) {
        let mut tracker = RebootTracker::new();
        let mut at = start;
        let mut uptime = 0;
        for step in steps {
            at += step;
            uptime += step;
            prop_assert_eq!(tracker.observe(at, uptime), None);
        }
        prop_assert_eq!(tracker.finish(), Some(start));
    }
}
