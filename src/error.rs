//! Error kinds surfaced by a job run.
//!
//! Per-record errors are recovered where they happen (skip and count),
//! per-task errors are recovered by retrying the task, and the structural
//! errors at the bottom of this file end the job.

use crate::scheduler::TaskId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw record the initializer could not turn into a partial aggregate.
///
/// The record is skipped and counted; the task carries on.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordParseError {
    #[error("record has no fields")]
    Empty,

    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field `{field}` is empty")]
    EmptyField { field: String },

    #[error("invalid timestamp `{value}`: {reason}")]
    Timestamp { value: String, reason: String },
}

/// A transient failure of one task attempt. The scheduler retries it.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskExecutionError {
    #[error("record source failed: {0}")]
    Source(String),

    #[error("shuffle transport failed: {0}")]
    Shuffle(String),

    #[error("sink write failed: {0}")]
    Sink(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task exceeded its {budget_ms} ms budget")]
    TimedOut { budget_ms: u64 },

    #[error("task was cancelled")]
    Cancelled,

    #[error("worker failure: {0}")]
    Worker(String),
}

/// One algebraic law the merge function was caught breaking.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum LawViolation {
    #[error("not commutative: merge({a}, {b}) = {ab} but merge({b}, {a}) = {ba}")]
    NotCommutative {
        a: String,
        b: String,
        ab: String,
        ba: String,
    },

    #[error("not associative: merge(merge({a}, {b}), {c}) = {left} but merge({a}, merge({b}, {c})) = {right}")]
    NotAssociative {
        a: String,
        b: String,
        c: String,
        left: String,
        right: String,
    },

    #[error("empty aggregate is not an identity for {a}: got {got}")]
    NotIdentity { a: String, got: String },
}

/// The supplied merge function failed the sampled contract check.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("merge function `{merge_fn}` violates the merge contract ({} violation(s), first: {})", .violations.len(), first_violation(.violations))]
pub struct MergeContractViolation {
    pub merge_fn: String,
    pub violations: Vec<LawViolation>,
}

fn first_violation(violations: &[LawViolation]) -> String {
    violations
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none recorded".to_string())
}

/// The shuffle barrier was reached while a map task's output is missing for good.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("map task {map_task} exhausted {attempts} attempt(s); partitions would be incomplete (last error: {last_error})")]
pub struct PartitionIncompleteError {
    pub map_task: TaskId,
    pub attempts: u32,
    pub last_error: String,
}

/// Fatal, job-level errors.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    ContractViolation(#[from] MergeContractViolation),

    #[error(transparent)]
    PartitionIncomplete(#[from] PartitionIncompleteError),

    #[error("task {task} failed permanently after {attempts} attempt(s): {last_error}")]
    TaskExhausted {
        task: TaskId,
        attempts: u32,
        last_error: String,
    },

    #[error("invalid job specification: {0}")]
    Spec(#[from] crate::config::SpecError),

    #[error("no {kind} function registered under `{id}`")]
    UnknownFunction { kind: &'static str, id: String },

    #[error(transparent)]
    Source(#[from] crate::source::SourceError),

    #[error(transparent)]
    Sink(#[from] crate::sink::SinkError),

    #[error(transparent)]
    Shuffle(#[from] crate::shuffle::ShuffleError),

    #[error(transparent)]
    Scheduler(#[from] crate::scheduler::SchedulerError),

    #[error("job aborted: {0}")]
    Aborted(String),

    #[error("worker pool shut down unexpectedly: {0}")]
    WorkerPool(String),
}

impl JobError {
    /// The task the failure is attributed to, when there is one.
    pub fn failed_task(&self) -> Option<TaskId> {
        match self {
            Self::PartitionIncomplete(e) => Some(e.map_task),
            Self::TaskExhausted { task, .. } => Some(*task),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violation_message_names_the_function() {
        let err = MergeContractViolation {
            merge_fn: "minus".to_string(),
            violations: vec![LawViolation::NotCommutative {
                a: "1".into(),
                b: "2".into(),
                ab: "-1".into(),
                ba: "1".into(),
            }],
        };
        let message = err.to_string();
        assert!(message.contains("`minus`"));
        assert!(message.contains("1 violation(s)"));
        assert!(message.contains("not commutative"));
    }

    #[test]
    fn failed_task_is_reported_for_structural_errors() {
        let task = TaskId::map(3);
        let err = JobError::from(PartitionIncompleteError {
            map_task: task,
            attempts: 2,
            last_error: "boom".into(),
        });
        assert_eq!(err.failed_task(), Some(task));

        let err = JobError::UnknownFunction {
            kind: "init",
            id: "nope".into(),
        };
        assert_eq!(err.failed_task(), None);
    }
}
