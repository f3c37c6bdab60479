//! Local combiner: worker-side pre-aggregation.
//!
//! The combiner folds every partial aggregate a map task produces into one
//! in-memory aggregate before anything is shuffled. Its size is bounded by
//! the number of distinct keys, not by the number of records. State belongs
//! to one task attempt and is never shared, so there is no locking.

use crate::aggregate::{MergeOperator, PartialAggregate};
use crate::config::CombinerConfig;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Counters reported with a map task's outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinerStats {
    /// Partials folded in
    pub accumulated: u64,
    /// Non-empty flushes, including the final one
    pub flushes: u64,
    /// Largest number of distinct keys held at once
    pub peak_keys: usize,
    /// Largest number of keys the shuffle buffers held at once
    #[serde(default)]
    pub peak_shuffle_keys: usize,
    /// Runs written to spill space ahead of commit
    #[serde(default)]
    pub runs_spilled: u64,
}

impl CombinerStats {
    /// Fold another attempt's counters into a job-wide total.
    pub fn absorb(&mut self, other: CombinerStats) {
        self.accumulated += other.accumulated;
        self.flushes += other.flushes;
        self.peak_keys = self.peak_keys.max(other.peak_keys);
        self.peak_shuffle_keys = self.peak_shuffle_keys.max(other.peak_shuffle_keys);
        self.runs_spilled += other.runs_spilled;
    }
}

/// Accumulates partial aggregates for one task attempt.
///
/// ```rust
/// use foldwise::aggregate::{MergeOperator, PartialAggregate};
/// use foldwise::combiner::LocalCombiner;
/// use foldwise::config::CombinerConfig;
///
/// let mut combiner = LocalCombiner::new(MergeOperator::sum(), CombinerConfig::default());
/// combiner.accumulate(PartialAggregate::singleton("User", "11", 1));
/// combiner.accumulate(PartialAggregate::singleton("User", "11", 1));
/// let flushed = combiner.flush();
/// assert_eq!(flushed.get("User", "11"), Some(2));
/// assert!(combiner.flush().is_empty());
/// ```
#[derive(Debug)]
pub struct LocalCombiner {
    op: MergeOperator,
    config: CombinerConfig,
    state: PartialAggregate,
    buffered_since: Option<Instant>,
    stats: CombinerStats,
}

impl LocalCombiner {
    pub fn new(op: MergeOperator, config: CombinerConfig) -> Self {
        Self {
            state: op.identity(),
            op,
            config,
            buffered_since: None,
            stats: CombinerStats::default(),
        }
    }

    /// Fold a partial aggregate into the local state.
    pub fn accumulate(&mut self, partial: PartialAggregate) {
        if self.buffered_since.is_none() {
            self.buffered_since = Some(Instant::now());
        }
        self.op.merge_into(&mut self.state, partial);
        self.stats.accumulated += 1;
        self.stats.peak_keys = self.stats.peak_keys.max(self.state.key_count());
    }

    /// Whether the buffered state crossed the key or age threshold.
    pub fn should_flush(&self) -> bool {
        if self.state.is_empty() {
            return false;
        }
        if self.state.key_count() >= self.config.max_buffered_keys {
            return true;
        }
        self.buffered_since
            .is_some_and(|since| since.elapsed() >= self.config.max_buffer_age)
    }

    /// Hand over the accumulated state and reset to the identity.
    pub fn flush(&mut self) -> PartialAggregate {
        self.buffered_since = None;
        let flushed = std::mem::replace(&mut self.state, self.op.identity());
        if !flushed.is_empty() {
            self.stats.flushes += 1;
        }
        flushed
    }

    pub fn buffered_keys(&self) -> usize {
        self.state.key_count()
    }

    pub fn stats(&self) -> CombinerStats {
        self.stats
    }
}
