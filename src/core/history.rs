//! Transition history for tasks and jobs.
//!
//! Every lifecycle change the coordinator applies is recorded with its
//! timestamp and attempt number, so a job report can show exactly how each
//! task got to where it ended (including every retry).

use super::state::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Record of a single state transition.
///
/// # Example
///
/// ```rust
/// use foldwise::core::StateTransition;
/// use foldwise::scheduler::TaskState;
/// use chrono::Utc;
///
/// let transition = StateTransition {
///     from: TaskState::Pending,
///     to: TaskState::Running,
///     timestamp: Utc::now(),
///     attempt: 1,
///     reason: None,
/// };
/// assert_eq!(transition.attempt, 1);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateTransition<S: State> {
    pub from: S,
    pub to: S,
    pub timestamp: DateTime<Utc>,
    /// Attempt number the transition belongs to (1-based, 0 before any run)
    pub attempt: u32,
    /// Why the transition happened, for failures and aborts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Ordered history of state transitions.
///
/// `record` returns a new history and leaves the original untouched.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateHistory<S: State> {
    transitions: Vec<StateTransition<S>>,
}

impl<S: State> Default for StateHistory<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State> StateHistory<S> {
    pub fn new() -> Self {
        Self {
            transitions: Vec::new(),
        }
    }

    /// Record a transition, returning a new history.
    pub fn record(&self, transition: StateTransition<S>) -> Self {
        let mut transitions = self.transitions.clone();
        transitions.push(transition);
        Self { transitions }
    }

    /// States traversed in order: the first `from`, then every `to`.
    pub fn get_path(&self) -> Vec<&S> {
        let mut path = Vec::new();
        if let Some(first) = self.transitions.first() {
            path.push(&first.from);
        }
        for transition in &self.transitions {
            path.push(&transition.to);
        }
        path
    }

    /// Time between the first and the last recorded transition.
    pub fn duration(&self) -> Option<Duration> {
        if let (Some(first), Some(last)) = (self.transitions.first(), self.transitions.last()) {
            last.timestamp
                .signed_duration_since(first.timestamp)
                .to_std()
                .ok()
        } else {
            None
        }
    }

    /// How many times the history entered `state`.
    pub fn entries_into(&self, state: &S) -> usize {
        self.transitions.iter().filter(|t| &t.to == state).count()
    }

    pub fn last(&self) -> Option<&StateTransition<S>> {
        self.transitions.last()
    }

    pub fn transitions(&self) -> &[StateTransition<S>] {
        &self.transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskState;

    fn step(from: TaskState, to: TaskState, attempt: u32) -> StateTransition<TaskState> {
        StateTransition {
            from,
            to,
            timestamp: Utc::now(),
            attempt,
            reason: None,
        }
    }

    #[test]
    fn new_history_is_empty() {
        let history: StateHistory<TaskState> = StateHistory::new();
        assert!(history.transitions().is_empty());
        assert!(history.get_path().is_empty());
        assert!(history.duration().is_none());
        assert!(history.last().is_none());
    }

    #[test]
    fn record_is_immutable() {
        let history = StateHistory::new();
        let next = history.record(step(TaskState::Pending, TaskState::Running, 1));

        assert_eq!(history.transitions().len(), 0);
        assert_eq!(next.transitions().len(), 1);
    }

    #[test]
    fn path_follows_a_retry() {
        let history = StateHistory::new()
            .record(step(TaskState::Pending, TaskState::Running, 1))
            .record(step(TaskState::Running, TaskState::Failed, 1))
            .record(step(TaskState::Failed, TaskState::Pending, 1))
            .record(step(TaskState::Pending, TaskState::Running, 2))
            .record(step(TaskState::Running, TaskState::Completed, 2));

        let path = history.get_path();
        assert_eq!(path.len(), 6);
        assert_eq!(path[0], &TaskState::Pending);
        assert_eq!(path[5], &TaskState::Completed);
        assert_eq!(history.entries_into(&TaskState::Running), 2);
        assert_eq!(history.last().map(|t| t.attempt), Some(2));
    }

    #[test]
    fn single_transition_has_zero_duration() {
        let history = StateHistory::new().record(step(TaskState::Pending, TaskState::Running, 1));
        assert_eq!(history.duration(), Some(Duration::from_secs(0)));
    }

    #[test]
    fn history_serializes_with_reasons() {
        let mut failed = step(TaskState::Running, TaskState::Failed, 1);
        failed.reason = Some("worker lost".to_string());
        let history = StateHistory::new().record(failed);

        let json = serde_json::to_string(&history).unwrap();
        assert!(json.contains("worker lost"));
        let back: StateHistory<TaskState> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.transitions().len(), 1);
        assert_eq!(back.transitions()[0].reason.as_deref(), Some("worker lost"));
    }
}
