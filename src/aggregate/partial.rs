//! The partial aggregate: a mapping of mappings from grouping dimension to
//! group value to a running tally.

use super::merge::MergeOperator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Leaf value of an aggregate: a count or a sum.
pub type Tally = i64;

/// One grouping key: the dimension (`"URL"`, `"User"`, ...) and the
/// concrete group inside it (`"/post/clojure"`, `"11"`, ...).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    pub dimension: String,
    pub group: String,
}

impl AggregateKey {
    pub fn new(dimension: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dimension, self.group)
    }
}

/// Mergeable accumulation of statistics.
///
/// Keys absent from an aggregate contribute nothing, so the empty aggregate is
/// the identity of every merge operator. Ordered maps keep equality and
/// serialized output deterministic.
///
/// ```rust
/// use foldwise::aggregate::{MergeOperator, PartialAggregate};
///
/// let sum = MergeOperator::sum();
/// let a = PartialAggregate::singleton("URL", "/", 1);
/// let b = PartialAggregate::singleton("URL", "/", 1);
/// let merged = sum.merge(a, b);
/// assert_eq!(merged.get("URL", "/"), Some(2));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialAggregate {
    dimensions: BTreeMap<String, BTreeMap<String, Tally>>,
}

impl PartialAggregate {
    /// The identity element.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(dimension: impl Into<String>, group: impl Into<String>, value: Tally) -> Self {
        let mut aggregate = Self::new();
        aggregate
            .dimensions
            .entry(dimension.into())
            .or_default()
            .insert(group.into(), value);
        aggregate
    }

    /// Builder-style insert for initializers. Replaces an existing value for
    /// the same key.
    pub fn with(mut self, dimension: impl Into<String>, group: impl Into<String>, value: Tally) -> Self {
        self.dimensions
            .entry(dimension.into())
            .or_default()
            .insert(group.into(), value);
        self
    }

    /// Fold one value into the aggregate with `op`.
    pub fn add(
        &mut self,
        dimension: impl Into<String>,
        group: impl Into<String>,
        value: Tally,
        op: &MergeOperator,
    ) {
        let groups = self.dimensions.entry(dimension.into()).or_default();
        match groups.entry(group.into()) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(value);
            }
            std::collections::btree_map::Entry::Occupied(mut slot) => {
                let current = *slot.get();
                slot.insert(op.combine(current, value));
            }
        }
    }

    pub fn get(&self, dimension: &str, group: &str) -> Option<Tally> {
        self.dimensions
            .get(dimension)
            .and_then(|groups| groups.get(group))
            .copied()
    }

    pub fn dimension(&self, dimension: &str) -> Option<&BTreeMap<String, Tally>> {
        self.dimensions.get(dimension)
    }

    pub fn dimension_names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.keys().map(String::as_str)
    }

    /// Every `(dimension, group, value)` triple in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, Tally)> {
        self.dimensions.iter().flat_map(|(dimension, groups)| {
            groups
                .iter()
                .map(move |(group, value)| (dimension.as_str(), group.as_str(), *value))
        })
    }

    /// Number of distinct keys held; what the combiner's memory bound counts.
    pub fn key_count(&self) -> usize {
        self.dimensions.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.values().all(BTreeMap::is_empty)
    }

    pub(crate) fn into_dimensions(self) -> BTreeMap<String, BTreeMap<String, Tally>> {
        self.dimensions
    }

    pub(crate) fn dimensions_mut(&mut self) -> &mut BTreeMap<String, BTreeMap<String, Tally>> {
        &mut self.dimensions
    }
}

impl fmt::Display for PartialAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self.dimensions),
        }
    }
}

/// The fully merged aggregate of one partition. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinalAggregate(PartialAggregate);

impl FinalAggregate {
    pub(crate) fn seal(aggregate: PartialAggregate) -> Self {
        Self(aggregate)
    }

    pub fn as_partial(&self) -> &PartialAggregate {
        &self.0
    }

    pub fn get(&self, dimension: &str, group: &str) -> Option<Tally> {
        self.0.get(dimension, group)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> PartialAggregate {
        self.0
    }

    /// Stitch per-partition finals into one job-wide view.
    ///
    /// Partitions hold disjoint keys, so this is a plain union; `op` only
    /// matters if a caller hands in overlapping aggregates.
    pub fn union<I>(finals: I, op: &MergeOperator) -> PartialAggregate
    where
        I: IntoIterator<Item = FinalAggregate>,
    {
        op.merge_all(finals.into_iter().map(FinalAggregate::into_inner))
    }
}

impl fmt::Display for FinalAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_aggregate_is_empty_identity() {
        let aggregate = PartialAggregate::new();
        assert!(aggregate.is_empty());
        assert_eq!(aggregate.key_count(), 0);
        assert_eq!(aggregate.entries().count(), 0);
    }

    #[test]
    fn add_combines_overlapping_keys() {
        let sum = MergeOperator::sum();
        let mut aggregate = PartialAggregate::new();
        aggregate.add("User", "11", 1, &sum);
        aggregate.add("User", "11", 1, &sum);
        aggregate.add("User", "23", 1, &sum);

        assert_eq!(aggregate.get("User", "11"), Some(2));
        assert_eq!(aggregate.get("User", "23"), Some(1));
        assert_eq!(aggregate.get("User", "14"), None);
        assert_eq!(aggregate.key_count(), 2);
    }

    #[test]
    fn entries_are_in_key_order() {
        let sum = MergeOperator::sum();
        let mut aggregate = PartialAggregate::new();
        aggregate.add("b", "y", 1, &sum);
        aggregate.add("a", "z", 2, &sum);
        aggregate.add("a", "x", 3, &sum);

        let entries: Vec<_> = aggregate.entries().collect();
        assert_eq!(entries, vec![("a", "x", 3), ("a", "z", 2), ("b", "y", 1)]);
    }

    #[test]
    fn serializes_as_nested_object() {
        let aggregate = PartialAggregate::singleton("Day", "20130512", 6);
        let json = serde_json::to_string(&aggregate).unwrap();
        assert_eq!(json, r#"{"Day":{"20130512":6}}"#);
        let back: PartialAggregate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, aggregate);
    }

    #[test]
    fn final_union_joins_disjoint_partitions() {
        let sum = MergeOperator::sum();
        let left = FinalAggregate::seal(PartialAggregate::singleton("URL", "/", 2));
        let right = FinalAggregate::seal(PartialAggregate::singleton("User", "11", 3));

        let all = FinalAggregate::union(vec![left, right], &sum);
        assert_eq!(all.get("URL", "/"), Some(2));
        assert_eq!(all.get("User", "11"), Some(3));
    }
}
