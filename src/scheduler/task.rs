//! Tasks: the unit of scheduling and retry.

use crate::core::{State, StateHistory, StateTransition};
use crate::error::TaskExecutionError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Reads one source slice
    Map,
    /// Merges one partition
    Reduce,
}

/// Stable identity of a task across all of its attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub kind: TaskKind,
    pub index: usize,
}

impl TaskId {
    pub fn map(index: usize) -> Self {
        Self {
            kind: TaskKind::Map,
            index,
        }
    }

    pub fn reduce(partition: usize) -> Self {
        Self {
            kind: TaskKind::Reduce,
            index: partition,
        }
    }

    pub fn is_map(&self) -> bool {
        self.kind == TaskKind::Map
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TaskKind::Map => write!(f, "map-{}", self.index),
            TaskKind::Reduce => write!(f, "reduce-{}", self.index),
        }
    }
}

crate::state_enum! {
    /// Lifecycle of one task.
    ///
    /// `Failed` is not terminal: a failed task goes back to `Pending` while
    /// it has attempts left and stays `Failed` once it has none.
    pub enum TaskState {
        Pending,
        Running,
        Completed,
        Failed,
    }
    final: [Completed]
    error: [Failed]
    transitions: {
        Pending => [Running],
        Running => [Completed, Failed],
        Failed => [Pending],
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("illegal transition for {subject}: {from} -> {to}")]
    IllegalTransition {
        subject: String,
        from: String,
        to: String,
    },

    #[error("unknown task {0}")]
    UnknownTask(TaskId),
}

/// Cooperative cancellation flag shared between the coordinator and one
/// attempt.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled; meant for `?` at safe points.
    pub fn check(&self) -> Result<(), TaskExecutionError> {
        if self.is_cancelled() {
            Err(TaskExecutionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Block until cancelled, polling every `interval`.
    pub fn wait(&self, interval: Duration) {
        while !self.is_cancelled() {
            std::thread::sleep(interval);
        }
    }
}

/// A task and everything the coordinator knows about it.
#[derive(Clone, Debug)]
pub struct Task {
    id: TaskId,
    state: TaskState,
    attempts: u32,
    started_at: Option<Instant>,
    last_error: Option<String>,
    history: StateHistory<TaskState>,
}

impl Task {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            state: TaskState::Pending,
            attempts: 0,
            started_at: None,
            last_error: None,
            history: StateHistory::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Attempts started so far; the running attempt's number while running.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn history(&self) -> &StateHistory<TaskState> {
        &self.history
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    /// Whether `attempt` is the attempt currently running.
    pub fn is_current(&self, attempt: u32) -> bool {
        self.state == TaskState::Running && self.attempts == attempt
    }

    /// Time the running attempt has been going, measured at `now`.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        match self.state {
            TaskState::Running => self.started_at.map(|start| now.saturating_duration_since(start)),
            _ => None,
        }
    }

    pub(crate) fn start(&mut self, now: Instant) -> Result<u32, SchedulerError> {
        // Pending -> Running is recorded under the attempt it starts.
        let attempt = self.attempts + 1;
        self.transition(TaskState::Running, attempt, None)?;
        self.attempts = attempt;
        self.started_at = Some(now);
        Ok(attempt)
    }

    pub(crate) fn complete(&mut self) -> Result<(), SchedulerError> {
        self.transition(TaskState::Completed, self.attempts, None)?;
        self.started_at = None;
        Ok(())
    }

    pub(crate) fn fail(&mut self, reason: String) -> Result<(), SchedulerError> {
        self.transition(TaskState::Failed, self.attempts, Some(reason.clone()))?;
        self.started_at = None;
        self.last_error = Some(reason);
        Ok(())
    }

    pub(crate) fn requeue(&mut self) -> Result<(), SchedulerError> {
        self.transition(TaskState::Pending, self.attempts, None)
    }

    fn transition(
        &mut self,
        to: TaskState,
        attempt: u32,
        reason: Option<String>,
    ) -> Result<(), SchedulerError> {
        if !self.state.allows(&to) {
            return Err(SchedulerError::IllegalTransition {
                subject: self.id.to_string(),
                from: self.state.name().to_string(),
                to: to.name().to_string(),
            });
        }
        let from = std::mem::replace(&mut self.state, to.clone());
        self.history = self.history.record(StateTransition {
            from,
            to,
            timestamp: Utc::now(),
            attempt,
            reason,
        });
        Ok(())
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            state: self.state.clone(),
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            history: self.history.clone(),
        }
    }
}

/// Serializable snapshot of a task for job reports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub state: TaskState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub history: StateHistory<TaskState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_display_kind_and_index() {
        assert_eq!(TaskId::map(3).to_string(), "map-3");
        assert_eq!(TaskId::reduce(0).to_string(), "reduce-0");
        assert!(TaskId::map(0) < TaskId::reduce(0));
    }

    #[test]
    fn lifecycle_table() {
        assert!(TaskState::Pending.allows(&TaskState::Running));
        assert!(TaskState::Running.allows(&TaskState::Failed));
        assert!(TaskState::Failed.allows(&TaskState::Pending));
        assert!(!TaskState::Pending.allows(&TaskState::Completed));
        assert!(!TaskState::Completed.allows(&TaskState::Pending));
        assert!(TaskState::Completed.is_final());
        assert!(TaskState::Failed.is_error());
        assert!(!TaskState::Failed.is_final());
    }

    #[test]
    fn retry_is_recorded_per_attempt() {
        let mut task = Task::new(TaskId::map(0));
        let now = Instant::now();

        assert_eq!(task.start(now).unwrap(), 1);
        assert!(task.is_current(1));
        task.fail("disk gone".into()).unwrap();
        task.requeue().unwrap();
        assert_eq!(task.start(now).unwrap(), 2);
        assert!(!task.is_current(1));
        task.complete().unwrap();

        let attempts: Vec<u32> = task.history().transitions().iter().map(|t| t.attempt).collect();
        assert_eq!(attempts, vec![1, 1, 1, 2, 2]);
        assert_eq!(task.history().entries_into(&TaskState::Running), 2);
        assert_eq!(task.last_error(), Some("disk gone"));
        assert_eq!(
            task.history().transitions()[1].reason.as_deref(),
            Some("disk gone")
        );
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let mut task = Task::new(TaskId::reduce(1));
        let err = task.complete().unwrap_err();
        assert_eq!(
            err,
            SchedulerError::IllegalTransition {
                subject: "reduce-1".into(),
                from: "Pending".into(),
                to: "Completed".into(),
            }
        );
        assert_eq!(task.state(), &TaskState::Pending);
    }

    #[test]
    fn elapsed_only_while_running() {
        let mut task = Task::new(TaskId::map(0));
        let start = Instant::now();
        assert_eq!(task.elapsed(start), None);
        task.start(start).unwrap();
        let later = start + Duration::from_millis(40);
        assert_eq!(task.elapsed(later), Some(Duration::from_millis(40)));
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert_eq!(token.check(), Err(TaskExecutionError::Cancelled));
    }
}
