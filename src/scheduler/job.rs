//! Job lifecycle, failure kinds and the final report.

use super::task::{TaskId, TaskSummary};
use crate::combiner::CombinerStats;
use crate::core::StateHistory;
use crate::error::{JobError, MergeContractViolation, PartitionIncompleteError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

crate::state_enum! {
    /// Lifecycle of a whole job.
    pub enum JobState {
        Pending,
        MapRunning,
        ShuffleBarrier,
        ReduceRunning,
        Succeeded,
        Failed,
    }
    final: [Succeeded, Failed]
    error: [Failed]
    transitions: {
        Pending => [MapRunning, Failed],
        MapRunning => [ShuffleBarrier, Failed],
        ShuffleBarrier => [ReduceRunning, Failed],
        ReduceRunning => [Succeeded, Failed],
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    #[error(transparent)]
    ContractViolation(MergeContractViolation),

    #[error(transparent)]
    PartitionIncomplete(PartitionIncompleteError),

    #[error("task {task} failed permanently after {attempts} attempt(s): {last_error}")]
    TaskExhausted {
        task: TaskId,
        attempts: u32,
        last_error: String,
    },

    #[error("job aborted: {reason}")]
    Aborted { reason: String },
}

impl JobFailure {
    pub fn failed_task(&self) -> Option<TaskId> {
        match self {
            Self::PartitionIncomplete(e) => Some(e.map_task),
            Self::TaskExhausted { task, .. } => Some(*task),
            Self::ContractViolation(_) | Self::Aborted { .. } => None,
        }
    }
}

impl From<JobFailure> for JobError {
    fn from(failure: JobFailure) -> Self {
        match failure {
            JobFailure::ContractViolation(e) => JobError::ContractViolation(e),
            JobFailure::PartitionIncomplete(e) => JobError::PartitionIncomplete(e),
            JobFailure::TaskExhausted {
                task,
                attempts,
                last_error,
            } => JobError::TaskExhausted {
                task,
                attempts,
                last_error,
            },
            JobFailure::Aborted { reason } => JobError::Aborted(reason),
        }
    }
}

/// Point-in-time view of a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub maps_completed: usize,
    pub maps_total: usize,
    pub reduces_completed: usize,
    pub reduces_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

impl JobStatus {
    pub fn failed_task(&self) -> Option<TaskId> {
        self.failure.as_ref().and_then(JobFailure::failed_task)
    }
}

/// Everything a finished run has to say about itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobReport {
    pub run_id: Uuid,
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_task: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    pub records_read: u64,
    pub skipped_records: u64,
    pub partitions: usize,
    pub map_tasks: usize,
    pub combiner: CombinerStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub history: StateHistory<JobState>,
    pub tasks: Vec<TaskSummary>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.status == JobState::Succeeded
    }

    /// The failure as a `JobError`, for callers that want `?`.
    pub fn into_result(self) -> Result<Self, JobError> {
        match self.failure.clone() {
            Some(failure) => Err(failure.into()),
            None => Ok(self),
        }
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskSummary> {
        self.tasks.iter().find(|summary| summary.id == id)
    }
}
