//! Final merge of one partition.
//!
//! A reduce attempt always starts from the identity and replays every
//! committed input of its partition, so a restarted attempt recomputes the
//! same final aggregate instead of adding to a half-finished one.

use crate::aggregate::{FinalAggregate, MergeOperator, PartialAggregate};
use crate::config::constants::PARALLEL_REDUCE_THRESHOLD;
use crate::error::TaskExecutionError;
use crate::scheduler::CancelToken;
use crate::shuffle::ShuffleInput;
use rayon::prelude::*;

/// Merge aggregates as a balanced tree on the rayon pool.
///
/// Associativity makes the grouping irrelevant; rayon keeps the left-to-right
/// order of the inputs, so even the argument order matches a sequential fold.
pub fn merge_parallel(op: &MergeOperator, aggregates: Vec<PartialAggregate>) -> PartialAggregate {
    aggregates
        .into_par_iter()
        .reduce(|| op.identity(), |left, right| op.merge(left, right))
}

#[derive(Clone, Debug)]
pub struct Reducer {
    op: MergeOperator,
    parallel_threshold: usize,
}

impl Reducer {
    pub fn new(op: MergeOperator) -> Self {
        Self {
            op,
            parallel_threshold: PARALLEL_REDUCE_THRESHOLD,
        }
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold.max(1);
        self
    }

    /// Fold any number of partials, in any order, into a final aggregate.
    pub fn reduce<I>(&self, inputs: I) -> FinalAggregate
    where
        I: IntoIterator<Item = PartialAggregate>,
    {
        FinalAggregate::seal(self.op.merge_all(inputs))
    }

    /// Reduce a partition's committed shuffle inputs for one attempt.
    ///
    /// Cancellation is checked between inputs on the sequential path and
    /// around the tree merge on the parallel one.
    pub fn reduce_inputs(
        &self,
        inputs: Vec<ShuffleInput>,
        cancel: &CancelToken,
    ) -> Result<FinalAggregate, TaskExecutionError> {
        cancel.check()?;
        let aggregates: Vec<PartialAggregate> = inputs.into_iter().map(|input| input.aggregate).collect();

        if aggregates.len() >= self.parallel_threshold {
            let merged = merge_parallel(&self.op, aggregates);
            cancel.check()?;
            return Ok(FinalAggregate::seal(merged));
        }

        let mut acc = self.op.identity();
        for aggregate in aggregates {
            cancel.check()?;
            self.op.merge_into(&mut acc, aggregate);
        }
        Ok(FinalAggregate::seal(acc))
    }
}
