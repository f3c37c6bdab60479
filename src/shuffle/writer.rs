//! Map-side shuffle writer.

use super::error::ShuffleError;
use super::partitioner::Partitioner;
use super::spill::SpillRuns;
use crate::aggregate::{MergeOperator, PartialAggregate};

/// Collects the combiner's flushes for one map task attempt.
///
/// Each flush is split by partition and re-merged into a per-partition
/// buffer. With spill space attached, the buffers are written out as a run
/// whenever they reach the resident limit, and the reducer re-merges the
/// runs; without it they grow until the task commits.
pub struct ShuffleWriter<'a> {
    partitioner: &'a dyn Partitioner,
    op: &'a MergeOperator,
    buffers: Vec<PartialAggregate>,
    spills: u64,
    runs: Option<SpillRuns>,
    resident_limit: usize,
    peak_resident: usize,
}

impl<'a> ShuffleWriter<'a> {
    pub fn new(partitioner: &'a dyn Partitioner, op: &'a MergeOperator) -> Self {
        Self {
            buffers: vec![op.identity(); partitioner.partition_count()],
            partitioner,
            op,
            spills: 0,
            runs: None,
            resident_limit: usize::MAX,
            peak_resident: 0,
        }
    }

    /// Write buffers out to `runs` once they hold `resident_limit` keys.
    pub fn with_runs(mut self, runs: SpillRuns, resident_limit: usize) -> Self {
        self.runs = Some(runs);
        self.resident_limit = resident_limit.max(1);
        self
    }

    /// Route one combiner flush. Empty flushes are ignored.
    pub fn spill(&mut self, flushed: PartialAggregate) -> Result<(), ShuffleError> {
        if flushed.is_empty() {
            return Ok(());
        }
        for (buffer, part) in self.buffers.iter_mut().zip(self.partitioner.split(flushed)) {
            self.op.merge_into(buffer, part);
        }
        self.spills += 1;

        let resident = self.buffered_keys();
        self.peak_resident = self.peak_resident.max(resident);
        if let Some(runs) = self.runs.as_mut() {
            if resident >= self.resident_limit {
                runs.write(&mut self.buffers)?;
            }
        }
        Ok(())
    }

    pub fn spills(&self) -> u64 {
        self.spills
    }

    /// Runs written to spill space so far.
    pub fn runs_written(&self) -> u32 {
        self.runs.as_ref().map_or(0, SpillRuns::written)
    }

    pub fn buffered_keys(&self) -> usize {
        self.buffers.iter().map(PartialAggregate::key_count).sum()
    }

    /// Most keys the buffers held at once.
    pub fn peak_resident(&self) -> usize {
        self.peak_resident
    }

    /// One aggregate per partition, in partition order: whatever was not
    /// written out as a run.
    pub fn finish(self) -> Vec<PartialAggregate> {
        self.buffers
    }
}
