//! Merge-join over two key-sorted sequences
//!
//! Both file-state reconciliation and directory negotiation classify names
//! by walking two sorted collections in lock-step. [`merge_join`] does that
//! walk once, in key order, for any pair of iterators yielding `(key, value)`
//! pairs with strictly increasing keys.

use std::cmp::Ordering;
use std::fmt;
use std::iter::{FusedIterator, Peekable};

/// Classification of one key of a merge-join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sets<A, B> {
    /// Key present in both sequences
    Both(A, B),
    /// Key present only in the first sequence
    OnlyFirst(A),
    /// Key present only in the second sequence
    OnlySecond(B),
}

/// Iterator returned by [`merge_join`]
pub struct MergeJoin<I: Iterator, J: Iterator> {
    first: Peekable<I>,
    second: Peekable<J>,
}

impl<I: Iterator, J: Iterator> fmt::Debug for MergeJoin<I, J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeJoin").finish_non_exhaustive()
    }
}

/// Walk two key-sorted sequences together
///
/// Every distinct key of either input is yielded exactly once, in ascending
/// order. Inputs must be strictly sorted by key.
pub fn merge_join<K, A, B, I, J>(first: I, second: J) -> MergeJoin<I::IntoIter, J::IntoIter>
where
    K: Ord,
    I: IntoIterator<Item = (K, A)>,
    J: IntoIterator<Item = (K, B)>,
{
    MergeJoin {
        first: first.into_iter().peekable(),
        second: second.into_iter().peekable(),
    }
}

impl<K, A, B, I, J> Iterator for MergeJoin<I, J>
where
    K: Ord,
    I: Iterator<Item = (K, A)>,
    J: Iterator<Item = (K, B)>,
{
    type Item = (K, Sets<A, B>);

    fn next(&mut self) -> Option<Self::Item> {
        let order = match (self.first.peek(), self.second.peek()) {
            (Some((a, _)), Some((b, _))) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => return None,
        };
        match order {
            Ordering::Less => self.first.next().map(|(k, a)| (k, Sets::OnlyFirst(a))),
            Ordering::Greater => self.second.next().map(|(k, b)| (k, Sets::OnlySecond(b))),
            Ordering::Equal => {
                let (key, a) = self.first.next()?;
                let (_, b) = self.second.next()?;
                Some((key, Sets::Both(a, b)))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (first_low, first_high) = self.first.size_hint();
        let (second_low, second_high) = self.second.size_hint();
        let high = first_high.zip(second_high).map(|(a, b)| a + b);
        (first_low.max(second_low), high)
    }
}

impl<K, A, B, I, J> FusedIterator for MergeJoin<I, J>
where
    K: Ord,
    I: Iterator<Item = (K, A)>,
    J: Iterator<Item = (K, B)>,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{BTreeMap, BTreeSet};

    #[test]
    fn test_classification_order() {
        let first = [("a", 1), ("c", 3), ("d", 4)];
        let second = [("b", 'b'), ("c", 'c'), ("e", 'e')];
        let joined: Vec<_> = merge_join(first, second).collect();
        assert_eq!(
            joined,
            vec![
                ("a", Sets::OnlyFirst(1)),
                ("b", Sets::OnlySecond('b')),
                ("c", Sets::Both(3, 'c')),
                ("d", Sets::OnlyFirst(4)),
                ("e", Sets::OnlySecond('e')),
            ]
        );
    }

    #[test]
    fn test_debug_without_debug_items() {
        struct Opaque;
        let joined = merge_join([(1u8, Opaque)], [(2u8, Opaque)]);
        assert_eq!(format!("{:?}", joined), "MergeJoin { .. }");
    }

    #[test]
    fn test_empty_sides() {
        let empty: [(u8, ()); 0] = [];
        assert_eq!(merge_join(empty, empty).count(), 0);
        assert_eq!(merge_join([(1u8, ())], empty).count(), 1);
    }

    proptest! {
        #[test]
        fn test_merge_partitions_every_key(
            first in proptest::collection::btree_set("[a-e]{1,3}", 0..32),
            second in proptest::collection::btree_set("[a-e]{1,3}", 0..32),
        ) {
            let a: BTreeMap<_, _> = first.iter().map(|k| (k.clone(), ())).collect();
            let b: BTreeMap<_, _> = second.iter().map(|k| (k.clone(), ())).collect();

            let joined: Vec<_> = merge_join(a, b).collect();
            let keys: Vec<_> = joined.iter().map(|(k, _)| k.clone()).collect();
            let union: BTreeSet<_> = first.union(&second).cloned().collect();

            prop_assert_eq!(keys, union.into_iter().collect::<Vec<_>>());
            for (key, class) in &joined {
                match class {
                    Sets::Both(..) => prop_assert!(first.contains(key) && second.contains(key)),
                    Sets::OnlyFirst(_) => prop_assert!(first.contains(key) && !second.contains(key)),
                    Sets::OnlySecond(_) => prop_assert!(!first.contains(key) && second.contains(key)),
                }
            }
        }
    }
}
