//! Property-based tests for the cursor combinators using proptest.
//!
//! These check the ordering and cardinality guarantees the check pipelines
//! rely on for arbitrary sorted inputs.

use std::collections::{BTreeMap, BTreeSet};

use parafs_fsck::{union_by, Cursor, Grouper, VecCursor};
use proptest::prelude::*;

/// Sorted vector of small keys, duplicates allowed.
fn sorted_keys(max_len: usize) -> impl Strategy<Value = Vec<u16>> {
    proptest::collection::vec(0u16..64, 0..max_len).prop_map(|mut v| {
        v.sort_unstable();
        v
    })
}

/// Counts rows per key.
#[derive(Default)]
struct CountRows {
    n: usize,
}

impl Grouper for CountRows {
    type Row = u16;
    type Key = u16;
    type Proj = u16;
    type Value = usize;

    fn key(&self, row: &u16) -> u16 {
        *row
    }
    fn project(&self, row: &u16) -> u16 {
        *row
    }
    fn step(&mut self, _row: &u16) {
        self.n += 1;
    }
    fn finish(&mut self) -> usize {
        self.n
    }
    fn reset(&mut self) {
        self.n = 0;
    }
}

proptest! {
    /// Merging two sorted inputs yields their sorted concatenation.
    #[test]
    fn test_union_is_sorted_concatenation(a in sorted_keys(50), b in sorted_keys(50)) {
        let out = union_by(vec![VecCursor::new(a.clone()), VecCursor::new(b.clone())], |x: &u16| *x)
            .collect_vec()
            .unwrap();

        let mut expected = a;
        expected.extend(b);
        expected.sort_unstable();
        prop_assert_eq!(out, expected);
    }

    /// A left join emits every left row exactly once, in order, paired iff
    /// the right side holds its key.
    #[test]
    fn test_left_join_emits_each_left_row_once(left in sorted_keys(60), right in sorted_keys(60)) {
        let present: BTreeSet<u16> = right.iter().copied().collect();
        let out = VecCursor::new(left.clone())
            .left_join_eq(VecCursor::new(right), |l| *l, |r| *r)
            .collect_vec()
            .unwrap();

        prop_assert_eq!(out.len(), left.len());
        for ((l, r), expected) in out.iter().zip(&left) {
            prop_assert_eq!(l, expected);
            prop_assert_eq!(r.is_some(), present.contains(l));
            if let Some(r) = r {
                prop_assert_eq!(r, l);
            }
        }
    }

    /// Group counts partition the input: one group per distinct key, counts
    /// summing to the input length.
    #[test]
    fn test_group_counts_sum_to_input(rows in sorted_keys(100)) {
        let mut expected: BTreeMap<u16, usize> = BTreeMap::new();
        for r in &rows {
            *expected.entry(*r).or_insert(0) += 1;
        }

        let out = VecCursor::new(rows.clone()).group_by(CountRows::default()).collect_vec().unwrap();

        prop_assert_eq!(out.iter().map(|(_, n)| n).sum::<usize>(), rows.len());
        prop_assert_eq!(out.into_iter().collect::<BTreeMap<_, _>>(), expected);
    }

    /// Distinct over a sorted input keeps exactly one row per key.
    #[test]
    fn test_distinct_keeps_one_per_key(rows in sorted_keys(100)) {
        let out = VecCursor::new(rows.clone()).distinct_by(|x| *x).collect_vec().unwrap();
        let expected: Vec<u16> = rows.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        prop_assert_eq!(out, expected);
    }
}
