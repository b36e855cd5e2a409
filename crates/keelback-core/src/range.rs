// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Half-open key ranges and the coverage tree tracking backup progress.
//!
//! Keys compare in unsigned byte order. An empty key is a sentinel: as a
//! start key it means the lower end of the key space, as an end key it means
//! the upper end. The empty start sentinel needs no special handling (the
//! empty byte string already sorts first); end keys go through
//! [`before_end`] so that the upper sentinel compares greater than every
//! key.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::manifest::File;

/// A half-open key range `[start, end)` and the files backed up for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub files: Vec<File>,
}

impl Range {
    /// An empty range (no files yet) over `[start, end)`.
    pub fn new(start: Vec<u8>, end: Vec<u8>) -> Self {
        Self {
            start,
            end,
            files: Vec::new(),
        }
    }

    /// True if this range intersects `[start, end)`.
    fn intersects(&self, start: &[u8], end: &[u8]) -> bool {
        before_end(start, &self.end) && before_end(&self.start, end)
    }
}

/// True when `key < end`, treating an empty `end` as the upper sentinel.
pub fn before_end(key: &[u8], end: &[u8]) -> bool {
    end.is_empty() || key < end
}

/// Ordered index of the sub-ranges a backup has completed so far.
///
/// Stored ranges are pairwise disjoint; adjacency is permitted and never
/// merged. Inserting an overlapping range is a caller bug and panics in
/// debug builds.
#[derive(Debug, Default)]
pub struct RangeTree {
    ranges: BTreeMap<Vec<u8>, Range>,
}

impl RangeTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed sub-ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// True if nothing has completed yet.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Records `[start, end)` as completed, with the files produced for it.
    pub fn put_ok(&mut self, start: &[u8], end: &[u8], files: Vec<File>) {
        debug_assert!(
            !self
                .ranges
                .values()
                .any(|stored| stored.intersects(start, end)),
            "overlapping insert [{}, {})",
            hex::encode(start),
            hex::encode(end),
        );
        self.ranges.insert(
            start.to_vec(),
            Range {
                start: start.to_vec(),
                end: end.to_vec(),
                files,
            },
        );
    }

    /// The ordered, maximal sub-ranges of `[start, end)` not yet covered.
    ///
    /// Returns the whole query range when nothing intersects it, truncates
    /// stored ranges extending past either bound, and emits every
    /// interstitial gap between neighbors. Applied to a fully covered range
    /// it returns nothing, so the fine-grained retry loop can use it as its
    /// termination check.
    pub fn incomplete_ranges(&self, start: &[u8], end: &[u8]) -> Vec<Range> {
        let mut gaps = Vec::new();
        let mut cursor = start.to_vec();
        for stored in self.ranges.values() {
            // Entirely before the portion still in question.
            if !stored.end.is_empty() && stored.end <= cursor {
                continue;
            }
            // Starts at or beyond the query end: nothing further intersects.
            if !before_end(&stored.start, end) {
                break;
            }
            // Start keys compare in plain byte order: empty is the lower
            // sentinel and already sorts first.
            if cursor < stored.start {
                gaps.push(Range::new(cursor.clone(), stored.start.clone()));
            }
            if stored.end.is_empty() {
                // Covered through the upper sentinel.
                return gaps;
            }
            cursor = stored.end.clone();
            if !before_end(&cursor, end) {
                return gaps;
            }
        }
        if before_end(&cursor, end) {
            gaps.push(Range::new(cursor, end.to_vec()));
        }
        gaps
    }

    /// Ascending iteration over the completed sub-ranges.
    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.ranges.values()
    }

    /// Drains the tree into the files of its sub-ranges, ascending by the
    /// sub-range start key.
    pub fn into_files(self) -> Vec<File> {
        self.ranges
            .into_values()
            .flat_map(|range| range.files)
            .collect()
    }

    /// Names of files recorded more than once anywhere in the tree, sorted.
    ///
    /// File names are content-addressed, so any duplicate indicates a bug
    /// in the stores' responses and must be reported.
    pub fn duplicate_files(&self) -> Vec<String> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for range in self.ranges.values() {
            for file in &range.files {
                *seen.entry(file.name.as_str()).or_default() += 1;
            }
        }
        let mut duplicates: Vec<String> = seen
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, _)| name.to_owned())
            .collect();
        duplicates.sort();
        duplicates
    }
}

#[cfg(test)]
mod tests {
    use keelback_test_utils::param_test;

    use super::*;

    fn named_file(name: &str) -> File {
        File {
            name: name.to_owned(),
            ..File::default()
        }
    }

    fn starts_and_ends(ranges: &[Range]) -> Vec<(&[u8], &[u8])> {
        ranges
            .iter()
            .map(|range| (range.start.as_slice(), range.end.as_slice()))
            .collect()
    }

    #[test]
    fn empty_tree_returns_whole_query() {
        let tree = RangeTree::new();
        assert_eq!(
            starts_and_ends(&tree.incomplete_ranges(b"a", b"f")),
            vec![(b"a".as_slice(), b"f".as_slice())]
        );
        // Full-universe query over an empty tree.
        assert_eq!(
            starts_and_ends(&tree.incomplete_ranges(b"", b"")),
            vec![(b"".as_slice(), b"".as_slice())]
        );
    }

    #[test]
    fn exact_cover_leaves_nothing() {
        let mut tree = RangeTree::new();
        tree.put_ok(b"a", b"f", vec![]);
        assert!(tree.incomplete_ranges(b"a", b"f").is_empty());
    }

    #[test]
    fn adjacent_inserts_cover_without_merging() {
        let mut tree = RangeTree::new();
        tree.put_ok(b"a", b"c", vec![]);
        tree.put_ok(b"c", b"f", vec![]);
        assert_eq!(tree.len(), 2);
        assert!(tree.incomplete_ranges(b"a", b"f").is_empty());
    }

    #[test]
    fn interstitial_and_trailing_gaps() {
        let mut tree = RangeTree::new();
        tree.put_ok(b"b", b"c", vec![]);
        tree.put_ok(b"d", b"e", vec![]);
        assert_eq!(
            starts_and_ends(&tree.incomplete_ranges(b"a", b"f")),
            vec![
                (b"a".as_slice(), b"b".as_slice()),
                (b"c".as_slice(), b"d".as_slice()),
                (b"e".as_slice(), b"f".as_slice()),
            ]
        );
    }

    #[test]
    fn stored_range_past_query_end_truncates() {
        let mut tree = RangeTree::new();
        tree.put_ok(b"c", b"z", vec![]);
        assert_eq!(
            starts_and_ends(&tree.incomplete_ranges(b"a", b"f")),
            vec![(b"a".as_slice(), b"c".as_slice())]
        );
    }

    #[test]
    fn empty_end_key_is_the_upper_sentinel() {
        let mut tree = RangeTree::new();
        tree.put_ok(b"c", b"", vec![]);
        // The stored range runs to the end of the key space.
        assert_eq!(
            starts_and_ends(&tree.incomplete_ranges(b"a", b"")),
            vec![(b"a".as_slice(), b"c".as_slice())]
        );
        assert!(tree.incomplete_ranges(b"c", b"").is_empty());
        assert!(tree.incomplete_ranges(b"d", b"f").is_empty());
    }

    #[test]
    fn lower_sentinel_start_key_is_not_a_gap() {
        let mut tree = RangeTree::new();
        tree.put_ok(b"", b"m", vec![]);
        assert_eq!(
            starts_and_ends(&tree.incomplete_ranges(b"", b"")),
            vec![(b"m".as_slice(), b"".as_slice())]
        );
    }

    #[test]
    fn incomplete_ranges_is_idempotent_once_filled() {
        let mut tree = RangeTree::new();
        tree.put_ok(b"b", b"c", vec![]);
        for gap in tree.incomplete_ranges(b"a", b"f") {
            tree.put_ok(&gap.start, &gap.end, vec![]);
        }
        assert!(tree.incomplete_ranges(b"a", b"f").is_empty());
    }

    param_test! {
        query_outside_coverage: [
            before: (b"0".as_slice(), b"9".as_slice()),
            after: (b"x".as_slice(), b"z".as_slice()),
        ]
    }
    fn query_outside_coverage(start: &[u8], end: &[u8]) {
        let mut tree = RangeTree::new();
        tree.put_ok(b"b", b"c", vec![]);
        assert_eq!(starts_and_ends(&tree.incomplete_ranges(start, end)), vec![(start, end)]);
    }

    #[test]
    #[should_panic(expected = "overlapping insert")]
    #[cfg(debug_assertions)]
    fn overlapping_insert_panics_in_debug() {
        let mut tree = RangeTree::new();
        tree.put_ok(b"a", b"d", vec![]);
        tree.put_ok(b"c", b"f", vec![]);
    }

    #[test]
    fn into_files_is_ascending_by_start_key() {
        let mut tree = RangeTree::new();
        tree.put_ok(b"d", b"f", vec![named_file("second")]);
        tree.put_ok(b"a", b"d", vec![named_file("first")]);
        let names: Vec<_> = tree.into_files().into_iter().map(|file| file.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn duplicate_files_reports_repeated_names() {
        let mut tree = RangeTree::new();
        tree.put_ok(b"a", b"c", vec![named_file("dup"), named_file("ok")]);
        tree.put_ok(b"c", b"f", vec![named_file("dup")]);
        assert_eq!(tree.duplicate_files(), vec!["dup".to_owned()]);
    }

    #[test]
    fn duplicate_files_empty_when_unique() {
        let mut tree = RangeTree::new();
        tree.put_ok(b"a", b"c", vec![named_file("one")]);
        tree.put_ok(b"c", b"f", vec![named_file("two")]);
        assert!(tree.duplicate_files().is_empty());
    }
}
