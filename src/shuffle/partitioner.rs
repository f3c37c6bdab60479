//! Key-to-partition routing.
//!
//! Every entry of every partial aggregate sharing a key must land on the
//! same reducer, otherwise that key would end up with two incomplete finals.
//! Both partitioners here are pure functions of the key and the fixed
//! partition count.

use super::PartitionId;
use crate::aggregate::{AggregateKey, PartialAggregate};
use crate::config::PartitionerSpec;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic key router, fixed for the lifetime of a run.
pub trait Partitioner: Send + Sync {
    fn partition_count(&self) -> usize;

    fn partition(&self, key: &AggregateKey) -> PartitionId;

    /// Route every entry of `aggregate`, producing exactly
    /// `partition_count()` aggregates (empty ones included).
    fn split(&self, aggregate: PartialAggregate) -> Vec<PartialAggregate> {
        let mut parts = vec![PartialAggregate::new(); self.partition_count()];
        for (dimension, groups) in aggregate.into_dimensions() {
            for (group, value) in groups {
                let key = AggregateKey {
                    dimension: dimension.clone(),
                    group,
                };
                let target = self.partition(&key);
                parts[target]
                    .dimensions_mut()
                    .entry(key.dimension)
                    .or_default()
                    .insert(key.group, value);
            }
        }
        parts
    }
}

/// SipHash of `(dimension, group)` with fixed keys, modulo the partition count.
#[derive(Clone, Debug)]
pub struct HashPartitioner {
    partitions: usize,
}

impl HashPartitioner {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
        }
    }
}

impl Partitioner for HashPartitioner {
    fn partition_count(&self) -> usize {
        self.partitions
    }

    fn partition(&self, key: &AggregateKey) -> PartitionId {
        let mut hasher = DefaultHasher::new();
        key.dimension.hash(&mut hasher);
        key.group.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as PartitionId
    }
}

/// Explicit ranges over the group value.
///
/// Partition `i` owns groups `<= bounds[i]` not owned by an earlier
/// partition; the last partition owns everything above the last bound.
#[derive(Clone, Debug)]
pub struct RangePartitioner {
    bounds: Vec<String>,
}

impl RangePartitioner {
    /// `bounds` must be sorted; `bounds.len() + 1` partitions result.
    pub fn new(bounds: Vec<String>) -> Self {
        Self { bounds }
    }
}

impl Partitioner for RangePartitioner {
    fn partition_count(&self) -> usize {
        self.bounds.len() + 1
    }

    fn partition(&self, key: &AggregateKey) -> PartitionId {
        self.bounds
            .partition_point(|bound| bound.as_str() < key.group.as_str())
    }
}

/// Build the partitioner a spec asks for.
pub fn build_partitioner(spec: &PartitionerSpec, partitions: usize) -> Box<dyn Partitioner> {
    match spec {
        PartitionerSpec::Hash => Box::new(HashPartitioner::new(partitions)),
        PartitionerSpec::Range { bounds } => Box::new(RangePartitioner::new(bounds.clone())),
    }
}
