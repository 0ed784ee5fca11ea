// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Coverage algebra over half-open time ranges.
//!
//! A `Vec<TimeRange>` describes a set of instants. `merge`, `invert` and
//! `cap` are the primitives; everything else is derived from them.

use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// A time range. A missing `start` is the unbounded past, a missing `end`
/// the unbounded future.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "client/src/generated/")
)]
pub struct TimeRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Everything before `end`.
    pub fn until(end: Timestamp) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    /// Everything from `start` on.
    pub fn since(start: Timestamp) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// The whole timeline.
    pub fn all() -> Self {
        Self::default()
    }

    fn is_empty(&self) -> bool {
        matches!((self.start, self.end), (Some(start), Some(end)) if start >= end)
    }

    /// Sort by start and coalesce overlapping or touching ranges.
    pub fn merge(ranges: &[TimeRange]) -> Vec<TimeRange> {
        let mut sorted: Vec<TimeRange> = ranges.iter().copied().filter(|r| !r.is_empty()).collect();
        sorted.sort_by_key(|r| r.start.unwrap_or(Timestamp::MIN));

        let mut merged = Vec::with_capacity(sorted.len());
        let mut current: Option<TimeRange> = None;

        for range in sorted {
            let Some(running) = current.as_mut() else {
                current = Some(range);
                continue;
            };
            match (running.end, range.start) {
                // Unbounded future swallows everything after it.
                (None, _) => break,
                (Some(end), Some(start)) if end < start => {
                    merged.push(*running);
                    current = Some(range);
                }
                (Some(end), _) => {
                    running.end = range.end.map(|next| next.max(end));
                }
            }
        }

        merged.extend(current);
        merged
    }

    /// The complement of `ranges` over the whole timeline.
    pub fn invert(ranges: &[TimeRange]) -> Vec<TimeRange> {
        let merged = Self::merge(ranges);
        let (Some(first), Some(last)) = (merged.first(), merged.last()) else {
            return vec![Self::all()];
        };

        let mut gaps = Vec::with_capacity(merged.len() + 1);
        if let Some(start) = first.start {
            gaps.push(Self::until(start));
        }
        // After merging only the first range lacks a start and only the last lacks an end.
        gaps.extend(merged.windows(2).map(|pair| TimeRange {
            start: pair[0].end,
            end: pair[1].start,
        }));
        if let Some(end) = last.end {
            gaps.push(Self::since(end));
        }
        gaps
    }

    /// Clip `ranges` to `[start, end]`.
    pub fn cap(ranges: &[TimeRange], start: Timestamp, end: Timestamp) -> Vec<TimeRange> {
        let mut outside = Self::invert(ranges);
        outside.push(Self::until(start));
        outside.push(Self::since(end));
        Self::invert(&outside)
    }

    pub fn intersect(a: &[TimeRange], b: &[TimeRange]) -> Vec<TimeRange> {
        let mut outside = Self::invert(a);
        outside.extend(Self::invert(b));
        Self::invert(&outside)
    }

    /// Everything in `a` that is not in `b`.
    pub fn subtract(a: &[TimeRange], b: &[TimeRange]) -> Vec<TimeRange> {
        let mut outside = Self::invert(a);
        outside.extend_from_slice(b);
        Self::invert(&outside)
    }

    /// The parts of `requested` inside `[start, end]` not yet in `fetched`.
    pub fn uncovered(
        requested: &[TimeRange],
        fetched: &[TimeRange],
        start: Timestamp,
        end: Timestamp,
    ) -> Vec<TimeRange> {
        Self::cap(&Self::subtract(requested, fetched), start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn r(start: Timestamp, end: Timestamp) -> TimeRange {
        TimeRange::new(start, end)
    }

    #[test]
    fn test_merge_touching_ranges() {
        assert_eq!(TimeRange::merge(&[r(10, 20), r(20, 30)]), vec![r(10, 30)]);
    }

    #[test]
    fn test_merge_sorts_and_keeps_gaps() {
        assert_eq!(
            TimeRange::merge(&[r(40, 50), r(10, 20), r(15, 25)]),
            vec![r(10, 25), r(40, 50)]
        );
    }

    #[test]
    fn test_merge_unbounded_ends() {
        assert_eq!(
            TimeRange::merge(&[r(10, 20), TimeRange::since(15), r(30, 40)]),
            vec![TimeRange::since(10)]
        );
        assert_eq!(
            TimeRange::merge(&[r(10, 20), TimeRange::until(12)]),
            vec![TimeRange::until(20)]
        );
        assert_eq!(
            TimeRange::merge(&[TimeRange::until(5), TimeRange::until(3)]),
            vec![TimeRange::until(5)]
        );
    }

    #[test]
    fn test_merge_contained_range() {
        assert_eq!(TimeRange::merge(&[r(0, 100), r(10, 20)]), vec![r(0, 100)]);
    }

    #[test]
    fn test_merge_drops_empty_ranges() {
        assert_eq!(TimeRange::merge(&[r(5, 5), r(9, 2)]), vec![]);
    }

    #[test]
    fn test_invert_example() {
        assert_eq!(
            TimeRange::invert(&[TimeRange::until(5), r(10, 20)]),
            vec![r(5, 10), TimeRange::since(20)]
        );
    }

    #[test]
    fn test_invert_empty_and_full() {
        assert_eq!(TimeRange::invert(&[]), vec![TimeRange::all()]);
        assert_eq!(TimeRange::invert(&[TimeRange::all()]), vec![]);
    }

    #[test]
    fn test_cap_clips_to_window() {
        assert_eq!(
            TimeRange::cap(&[TimeRange::until(5)], 0, 100),
            vec![r(0, 5)]
        );
        assert_eq!(TimeRange::cap(&[TimeRange::all()], 0, 100), vec![r(0, 100)]);
        assert_eq!(
            TimeRange::cap(&[r(-10, 10), r(90, 200)], 0, 100),
            vec![r(0, 10), r(90, 100)]
        );
        assert_eq!(TimeRange::cap(&[r(200, 300)], 0, 100), vec![]);
    }

    #[test]
    fn test_uncovered_after_partial_coverage() {
        assert_eq!(
            TimeRange::uncovered(&[TimeRange::all()], &[TimeRange::until(5)], 0, 100),
            vec![r(5, 100)]
        );
    }

    #[test]
    fn test_uncovered_when_fully_covered() {
        assert_eq!(
            TimeRange::uncovered(&[TimeRange::all()], &[TimeRange::all()], 0, 100),
            vec![]
        );
        assert_eq!(
            TimeRange::uncovered(&[r(10, 20)], &[r(0, 50)], 0, 100),
            vec![]
        );
    }

    #[test]
    fn test_subtract_and_intersect() {
        assert_eq!(
            TimeRange::subtract(&[r(0, 100)], &[r(20, 30), r(50, 60)]),
            vec![r(0, 20), r(30, 50), r(60, 100)]
        );
        assert_eq!(
            TimeRange::intersect(&[r(0, 50)], &[r(40, 100)]),
            vec![r(40, 50)]
        );
    }

    #[test]
    fn test_serde_omits_unbounded_sides() {
        let json = serde_json::to_string(&TimeRange::since(7)).unwrap();
        assert_eq!(json, r#"{"start":7}"#);
        let parsed: TimeRange = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, TimeRange::all());
    }

    fn arb_range() -> impl Strategy<Value = TimeRange> {
        (
            proptest::option::weighted(0.9, -1_000i64..1_000),
            0i64..200,
            proptest::bool::weighted(0.1),
        )
            .prop_map(|(start, len, open_end)| TimeRange {
                start,
                end: if open_end {
                    None
                } else {
                    Some(start.unwrap_or(-1_000) + len)
                },
            })
    }

    fn arb_ranges() -> impl Strategy<Value = Vec<TimeRange>> {
        proptest::collection::vec(arb_range(), 0..8)
    }

    fn assert_normalized(ranges: &[TimeRange]) {
        for pair in ranges.windows(2) {
            let (Some(end), Some(start)) = (pair[0].end, pair[1].start) else {
                panic!("only the outer ranges may be unbounded: {ranges:?}");
            };
            assert!(end < start, "ranges overlap or touch: {ranges:?}");
        }
    }

    proptest! {
        #[test]
        fn prop_merge_is_idempotent(ranges in arb_ranges()) {
            let merged = TimeRange::merge(&ranges);
            assert_normalized(&merged);
            prop_assert_eq!(TimeRange::merge(&merged), merged);
        }

        #[test]
        fn prop_double_invert_is_merge(ranges in arb_ranges()) {
            prop_assert_eq!(
                TimeRange::invert(&TimeRange::invert(&ranges)),
                TimeRange::merge(&ranges)
            );
        }

        #[test]
        fn prop_cap_stays_in_window(ranges in arb_ranges(), start in -500i64..0, len in 1i64..1_000) {
            let end = start + len;
            for range in TimeRange::cap(&ranges, start, end) {
                prop_assert!(range.start.is_some_and(|s| s >= start));
                prop_assert!(range.end.is_some_and(|e| e <= end));
            }
        }

        #[test]
        fn prop_coverage_plus_gaps_fill_window(ranges in arb_ranges(), start in -500i64..0, len in 1i64..1_000) {
            let end = start + len;
            let mut covered = TimeRange::merge(&ranges);
            covered.extend(TimeRange::cap(&TimeRange::invert(&ranges), start, end));
            prop_assert_eq!(TimeRange::cap(&covered, start, end), vec![TimeRange::new(start, end)]);
        }
    }
}
