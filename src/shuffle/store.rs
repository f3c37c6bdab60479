//! Shuffle stores: where committed map outputs wait for their reducers.

use super::error::ShuffleError;
use super::spill::SpillRuns;
use super::PartitionId;
use crate::aggregate::PartialAggregate;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One piece of a map task's contribution to one partition. A task that
/// spilled runs contributes several pieces; the reducer merges them all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShuffleInput {
    pub map_task: usize,
    pub attempt: u32,
    pub aggregate: PartialAggregate,
}

/// Durable-for-the-run home of map outputs.
///
/// Commits are keyed by map task. The first commit for a task wins and later
/// ones are refused, so each map task is consumed exactly once by every
/// reducer however many attempts ran.
pub trait ShuffleStore: Send + Sync {
    fn partition_count(&self) -> usize;

    /// Publish all of a map task's outputs at once, one per partition.
    ///
    /// Returns `Ok(false)` and stores nothing when the task already has a
    /// committed attempt.
    fn commit(
        &self,
        map_task: usize,
        attempt: u32,
        outputs: Vec<PartialAggregate>,
    ) -> Result<bool, ShuffleError>;

    fn is_committed(&self, map_task: usize) -> Result<bool, ShuffleError>;

    /// Every committed contribution to `partition`, ordered by map task.
    fn fetch(&self, partition: PartitionId) -> Result<Vec<ShuffleInput>, ShuffleError>;

    /// Where a map attempt may park spilled runs before it commits.
    ///
    /// `None` means the store keeps map output in memory anyway, so an
    /// attempt's output stays resident until commit.
    fn spill_runs(&self, _map_task: usize, _attempt: u32) -> Result<Option<SpillRuns>, ShuffleError> {
        Ok(None)
    }

    /// Release whatever the store holds once the job is over.
    fn cleanup(&self) -> Result<(), ShuffleError> {
        Ok(())
    }
}

pub(crate) fn check_fanout(
    map_task: usize,
    expected: usize,
    outputs: &[PartialAggregate],
) -> Result<(), ShuffleError> {
    if outputs.len() != expected {
        return Err(ShuffleError::WrongFanout {
            map_task,
            expected,
            found: outputs.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_partition(partition: PartitionId, count: usize) -> Result<(), ShuffleError> {
    if partition >= count {
        return Err(ShuffleError::PartitionOutOfRange { partition, count });
    }
    Ok(())
}

struct Committed {
    attempt: u32,
    outputs: Vec<PartialAggregate>,
}

/// In-process shuffle store. It cannot spill: a map attempt's output is
/// resident until commit, and every committed output until the job ends.
pub struct MemoryShuffle {
    partitions: usize,
    committed: Mutex<BTreeMap<usize, Committed>>,
}

impl MemoryShuffle {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions,
            committed: Mutex::new(BTreeMap::new()),
        }
    }
}

impl ShuffleStore for MemoryShuffle {
    fn partition_count(&self) -> usize {
        self.partitions
    }

    fn commit(
        &self,
        map_task: usize,
        attempt: u32,
        outputs: Vec<PartialAggregate>,
    ) -> Result<bool, ShuffleError> {
        check_fanout(map_task, self.partitions, &outputs)?;
        let mut committed = self.committed.lock().map_err(|_| ShuffleError::Poisoned)?;
        if committed.contains_key(&map_task) {
            return Ok(false);
        }
        committed.insert(map_task, Committed { attempt, outputs });
        Ok(true)
    }

    fn is_committed(&self, map_task: usize) -> Result<bool, ShuffleError> {
        let committed = self.committed.lock().map_err(|_| ShuffleError::Poisoned)?;
        Ok(committed.contains_key(&map_task))
    }

    fn fetch(&self, partition: PartitionId) -> Result<Vec<ShuffleInput>, ShuffleError> {
        check_partition(partition, self.partitions)?;
        let committed = self.committed.lock().map_err(|_| ShuffleError::Poisoned)?;
        Ok(committed
            .iter()
            .map(|(map_task, entry)| ShuffleInput {
                map_task: *map_task,
                attempt: entry.attempt,
                aggregate: entry.outputs[partition].clone(),
            })
            .collect())
    }
}
