//! The merge operator over partial aggregates.
//!
//! A merge operator is a pure leaf function `fn(Tally, Tally) -> Tally`
//! lifted to whole aggregates: keys present on one side only are carried over
//! unchanged, keys present on both sides are combined with the leaf function.
//! If the leaf function is commutative and associative, so is the lifted
//! merge, and the empty aggregate is its identity.

use super::partial::{PartialAggregate, Tally};
use crate::registry::MergeFnId;
use std::collections::btree_map::Entry;
use std::fmt;

/// Pure leaf combination function.
pub type LeafFn = fn(Tally, Tally) -> Tally;

pub(crate) fn sum_leaf(a: Tally, b: Tally) -> Tally {
    a.wrapping_add(b)
}

pub(crate) fn max_leaf(a: Tally, b: Tally) -> Tally {
    a.max(b)
}

pub(crate) fn min_leaf(a: Tally, b: Tally) -> Tally {
    a.min(b)
}

/// A named merge function, resolved from the registry by id.
#[derive(Clone)]
pub struct MergeOperator {
    id: MergeFnId,
    leaf: LeafFn,
}

impl MergeOperator {
    pub fn new(id: impl Into<MergeFnId>, leaf: LeafFn) -> Self {
        Self {
            id: id.into(),
            leaf,
        }
    }

    /// Addition; the operator behind counting aggregates.
    pub fn sum() -> Self {
        Self::new("sum", sum_leaf)
    }

    pub fn max() -> Self {
        Self::new("max", max_leaf)
    }

    pub fn min() -> Self {
        Self::new("min", min_leaf)
    }

    pub fn id(&self) -> &MergeFnId {
        &self.id
    }

    /// Combine two leaf values.
    pub fn combine(&self, a: Tally, b: Tally) -> Tally {
        (self.leaf)(a, b)
    }

    /// The identity element.
    pub fn identity(&self) -> PartialAggregate {
        PartialAggregate::new()
    }

    /// Fold `other` into `acc`.
    ///
    /// Overlapping leaves are combined as `leaf(acc, other)`; argument order is
    /// never swapped so the contract check sees the function as supplied.
    pub fn merge_into(&self, acc: &mut PartialAggregate, other: PartialAggregate) {
        let target = acc.dimensions_mut();
        for (dimension, groups) in other.into_dimensions() {
            if groups.is_empty() {
                continue;
            }
            let slot = target.entry(dimension).or_default();
            for (group, value) in groups {
                match slot.entry(group) {
                    Entry::Vacant(vacant) => {
                        vacant.insert(value);
                    }
                    Entry::Occupied(mut occupied) => {
                        let merged = self.combine(*occupied.get(), value);
                        occupied.insert(merged);
                    }
                }
            }
        }
    }

    pub fn merge(&self, mut a: PartialAggregate, b: PartialAggregate) -> PartialAggregate {
        self.merge_into(&mut a, b);
        a
    }

    /// Left fold over any number of aggregates, starting from the identity.
    pub fn merge_all<I>(&self, aggregates: I) -> PartialAggregate
    where
        I: IntoIterator<Item = PartialAggregate>,
    {
        aggregates
            .into_iter()
            .fold(self.identity(), |acc, next| self.merge(acc, next))
    }
}

impl fmt::Debug for MergeOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeOperator")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate(entries: &[(&str, &str, Tally)]) -> PartialAggregate {
        let sum = MergeOperator::sum();
        let mut out = PartialAggregate::new();
        for (dimension, group, value) in entries {
            out.add(*dimension, *group, *value, &sum);
        }
        out
    }

    #[test]
    fn disjoint_keys_merge_as_union() {
        let sum = MergeOperator::sum();
        let merged = sum.merge(
            aggregate(&[("URL", "/", 1)]),
            aggregate(&[("User", "11", 1)]),
        );
        assert_eq!(merged, aggregate(&[("URL", "/", 1), ("User", "11", 1)]));
    }

    #[test]
    fn overlapping_keys_combine_elementwise() {
        let sum = MergeOperator::sum();
        let merged = sum.merge(
            aggregate(&[("URL", "/", 1), ("URL", "/a", 4)]),
            aggregate(&[("URL", "/", 2)]),
        );
        assert_eq!(merged.get("URL", "/"), Some(3));
        assert_eq!(merged.get("URL", "/a"), Some(4));
    }

    #[test]
    fn identity_leaves_aggregate_unchanged() {
        for op in [MergeOperator::sum(), MergeOperator::max(), MergeOperator::min()] {
            let a = aggregate(&[("Day", "20130512", 6), ("User", "14", -2)]);
            assert_eq!(op.merge(a.clone(), op.identity()), a);
            assert_eq!(op.merge(op.identity(), a.clone()), a);
        }
    }

    #[test]
    fn max_and_min_pick_extremes() {
        let a = aggregate(&[("lat", "p99", 40)]);
        let b = aggregate(&[("lat", "p99", 75)]);
        assert_eq!(MergeOperator::max().merge(a.clone(), b.clone()).get("lat", "p99"), Some(75));
        assert_eq!(MergeOperator::min().merge(a, b).get("lat", "p99"), Some(40));
    }

    #[test]
    fn merge_all_of_nothing_is_identity() {
        let sum = MergeOperator::sum();
        assert!(sum.merge_all(Vec::new()).is_empty());
    }

    #[test]
    fn sum_wraps_instead_of_panicking() {
        let sum = MergeOperator::sum();
        assert_eq!(sum.combine(Tally::MAX, 1), Tally::MIN);
    }
}
