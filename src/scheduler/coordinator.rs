//! The coordinator: a deterministic state machine over one job's tasks.
//!
//! It never touches threads, clocks or I/O itself. Callers feed it
//! `TaskEvent`s and the current `Instant`, and ask it what to run next. That
//! keeps every scheduling rule (barrier, retry, stale attempts, timeouts)
//! testable without a worker pool.

use super::job::{JobFailure, JobReport, JobState, JobStatus};
use super::policy::{AttemptContext, RetryPolicy};
use super::task::{SchedulerError, Task, TaskId, TaskKind, TaskState};
use crate::combiner::CombinerStats;
use crate::core::{Guard, State, StateHistory, StateTransition};
use crate::error::{PartitionIncompleteError, TaskExecutionError};
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One attempt of one task, handed to a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Assignment {
    pub task: TaskId,
    pub attempt: u32,
}

/// What a worker reports back about an attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskEvent {
    Completed {
        task: TaskId,
        attempt: u32,
        records: u64,
        skipped: u64,
    },
    Failed {
        task: TaskId,
        attempt: u32,
        error: TaskExecutionError,
    },
}

impl TaskEvent {
    pub fn task(&self) -> TaskId {
        match self {
            Self::Completed { task, .. } | Self::Failed { task, .. } => *task,
        }
    }

    pub fn attempt(&self) -> u32 {
        match self {
            Self::Completed { attempt, .. } | Self::Failed { attempt, .. } => *attempt,
        }
    }
}

/// How the coordinator took an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Accepted,
    /// From an attempt that is no longer current; ignored
    Stale,
    /// Attempt failed, task is pending again
    Retrying { attempts: u32 },
    /// Attempt failed with no attempts left; the job has failed
    Exhausted,
}

pub struct Coordinator {
    run_id: Uuid,
    state: JobState,
    history: StateHistory<JobState>,
    maps: Vec<Task>,
    reduces: Vec<Task>,
    policy: RetryPolicy,
    barrier: Guard<[Task]>,
    records_read: u64,
    skipped_records: u64,
    failure: Option<JobFailure>,
    started_at: DateTime<Utc>,
}

impl Coordinator {
    pub fn new(run_id: Uuid, map_tasks: usize, partitions: usize, policy: RetryPolicy) -> Self {
        Self {
            run_id,
            state: JobState::Pending,
            history: StateHistory::new(),
            maps: (0..map_tasks).map(|i| Task::new(TaskId::map(i))).collect(),
            reduces: (0..partitions).map(|p| Task::new(TaskId::reduce(p))).collect(),
            policy,
            barrier: Guard::named("every map task completed", |maps: &[Task]| {
                maps.iter().all(Task::is_completed)
            }),
            records_read: 0,
            skipped_records: 0,
            failure: None,
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_final()
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.failure.as_ref()
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    pub fn skipped_records(&self) -> u64 {
        self.skipped_records
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        match id.kind {
            TaskKind::Map => self.maps.get(id.index),
            TaskKind::Reduce => self.reduces.get(id.index),
        }
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, SchedulerError> {
        let tasks = match id.kind {
            TaskKind::Map => &mut self.maps,
            TaskKind::Reduce => &mut self.reduces,
        };
        tasks.get_mut(id.index).ok_or(SchedulerError::UnknownTask(id))
    }

    /// Open the map phase. A job without map tasks goes straight through the
    /// barrier.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        self.transition(JobState::MapRunning, None)?;
        info!(
            run_id = %self.run_id,
            map_tasks = self.maps.len(),
            partitions = self.reduces.len(),
            "map phase started"
        );
        self.advance()
    }

    /// Start the next pending task of the current phase, if there is one.
    ///
    /// Reduce tasks only become assignable once the barrier has opened.
    pub fn next_assignment(&mut self, now: Instant) -> Result<Option<Assignment>, SchedulerError> {
        let tasks = match self.state {
            JobState::MapRunning => &mut self.maps,
            JobState::ReduceRunning => &mut self.reduces,
            _ => return Ok(None),
        };
        let Some(task) = tasks.iter_mut().find(|t| t.state() == &TaskState::Pending) else {
            return Ok(None);
        };
        let attempt = task.start(now)?;
        debug!(task = %task.id(), attempt, "task assigned");
        Ok(Some(Assignment {
            task: task.id(),
            attempt,
        }))
    }

    /// Whether `attempt` is the live attempt of `task`.
    pub fn is_current(&self, task: TaskId, attempt: u32) -> bool {
        !self.is_finished() && self.task(task).is_some_and(|t| t.is_current(attempt))
    }

    /// Attempts currently running.
    pub fn running(&self) -> Vec<Assignment> {
        self.maps
            .iter()
            .chain(&self.reduces)
            .filter(|t| t.state() == &TaskState::Running)
            .map(|t| Assignment {
                task: t.id(),
                attempt: t.attempts(),
            })
            .collect()
    }

    pub fn apply(&mut self, event: TaskEvent) -> Result<Applied, SchedulerError> {
        let id = event.task();
        let attempt = event.attempt();
        // Validates the id even for events that end up ignored.
        let current = self.task_mut(id)?.is_current(attempt);
        if self.is_finished() || !current {
            debug!(task = %id, attempt, "ignoring event from stale attempt");
            return Ok(Applied::Stale);
        }

        match event {
            TaskEvent::Completed { records, skipped, .. } => {
                self.task_mut(id)?.complete()?;
                self.records_read += records;
                self.skipped_records += skipped;
                debug!(task = %id, attempt, records, skipped, "task completed");
                self.advance()?;
                Ok(Applied::Accepted)
            }
            TaskEvent::Failed { error, .. } => self.fail_attempt(id, error.to_string()),
        }
    }

    /// Fail every running attempt that is over its time budget.
    ///
    /// Returns the expired attempts so the caller can cancel them.
    pub fn expire(&mut self, now: Instant) -> Result<Vec<Assignment>, SchedulerError> {
        let mut expired = Vec::new();
        for task in self.maps.iter().chain(&self.reduces) {
            let Some(elapsed) = task.elapsed(now) else { continue };
            let context = AttemptContext {
                task: task.id(),
                attempt: task.attempts(),
                elapsed,
            };
            if self.policy.deadline_violation(&context).is_some() {
                expired.push(Assignment {
                    task: task.id(),
                    attempt: task.attempts(),
                });
            }
        }

        let budget_ms = self
            .policy
            .timeout()
            .map(|t| t.as_millis() as u64)
            .unwrap_or_default();
        for assignment in &expired {
            if self.is_finished() {
                break;
            }
            warn!(task = %assignment.task, attempt = assignment.attempt, budget_ms, "attempt timed out");
            self.fail_attempt(
                assignment.task,
                TaskExecutionError::TimedOut { budget_ms }.to_string(),
            )?;
        }
        Ok(expired)
    }

    /// End the job now. Running attempts are failed; a finished job is left
    /// alone.
    pub fn abort(&mut self, failure: JobFailure) -> Result<(), SchedulerError> {
        if self.is_finished() {
            return Ok(());
        }
        self.fail_job(failure)
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            state: self.state.clone(),
            maps_completed: self.maps.iter().filter(|t| t.is_completed()).count(),
            maps_total: self.maps.len(),
            reduces_completed: self.reduces.iter().filter(|t| t.is_completed()).count(),
            reduces_total: self.reduces.len(),
            failure: self.failure.clone(),
        }
    }

    pub fn report(&self, combiner: CombinerStats) -> JobReport {
        JobReport {
            run_id: self.run_id,
            status: self.state.clone(),
            failed_task: self.failure.as_ref().and_then(JobFailure::failed_task),
            failure: self.failure.clone(),
            records_read: self.records_read,
            skipped_records: self.skipped_records,
            partitions: self.reduces.len(),
            map_tasks: self.maps.len(),
            combiner,
            started_at: self.started_at,
            finished_at: Utc::now(),
            history: self.history.clone(),
            tasks: self.maps.iter().chain(&self.reduces).map(Task::summary).collect(),
        }
    }

    fn fail_attempt(&mut self, id: TaskId, reason: String) -> Result<Applied, SchedulerError> {
        let attempts = {
            let task = self.task_mut(id)?;
            task.fail(reason.clone())?;
            task.attempts()
        };

        if self.policy.may_retry(id, attempts) {
            self.task_mut(id)?.requeue()?;
            warn!(task = %id, attempts, error = %reason, "task attempt failed, retrying");
            return Ok(Applied::Retrying { attempts });
        }

        error!(task = %id, attempts, error = %reason, "task failed permanently");
        let failure = if id.is_map() {
            JobFailure::PartitionIncomplete(PartitionIncompleteError {
                map_task: id,
                attempts,
                last_error: reason,
            })
        } else {
            JobFailure::TaskExhausted {
                task: id,
                attempts,
                last_error: reason,
            }
        };
        self.fail_job(failure)?;
        Ok(Applied::Exhausted)
    }

    fn fail_job(&mut self, failure: JobFailure) -> Result<(), SchedulerError> {
        for task in self.maps.iter_mut().chain(self.reduces.iter_mut()) {
            if task.state() == &TaskState::Running {
                task.fail("job aborted".to_string())?;
            }
        }
        error!(run_id = %self.run_id, failure = %failure, "job failed");
        self.transition(JobState::Failed, Some(failure.to_string()))?;
        self.failure = Some(failure);
        Ok(())
    }

    /// Take every phase step whose condition now holds.
    fn advance(&mut self) -> Result<(), SchedulerError> {
        if self.state == JobState::MapRunning && self.barrier.check(&self.maps) {
            self.transition(JobState::ShuffleBarrier, None)?;
            info!(
                run_id = %self.run_id,
                guard = self.barrier.description(),
                records = self.records_read,
                skipped = self.skipped_records,
                "shuffle barrier reached"
            );
            self.transition(JobState::ReduceRunning, None)?;
            info!(run_id = %self.run_id, partitions = self.reduces.len(), "reduce phase started");
        }
        if self.state == JobState::ReduceRunning && self.reduces.iter().all(Task::is_completed) {
            self.transition(JobState::Succeeded, None)?;
            info!(run_id = %self.run_id, "job succeeded");
        }
        Ok(())
    }

    fn transition(&mut self, to: JobState, reason: Option<String>) -> Result<(), SchedulerError> {
        if !self.state.allows(&to) {
            return Err(SchedulerError::IllegalTransition {
                subject: format!("job {}", self.run_id),
                from: self.state.name().to_string(),
                to: to.name().to_string(),
            });
        }
        let from = std::mem::replace(&mut self.state, to.clone());
        self.history = self.history.record(StateTransition {
            from,
            to,
            timestamp: Utc::now(),
            attempt: 0,
            reason,
        });
        Ok(())
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn coordinator(maps: usize, partitions: usize, max_attempts: u32) -> Coordinator {
        let policy = RetryPolicy::builder()
            .max_attempts(max_attempts)
            .timeout(Duration::from_millis(100))
            .build();
        let mut c = Coordinator::new(Uuid::new_v4(), maps, partitions, policy);
        c.start().unwrap();
        c
    }

    fn done(a: Assignment) -> TaskEvent {
        TaskEvent::Completed {
            task: a.task,
            attempt: a.attempt,
            records: 3,
            skipped: 1,
        }
    }

    fn failed(a: Assignment) -> TaskEvent {
        TaskEvent::Failed {
            task: a.task,
            attempt: a.attempt,
            error: TaskExecutionError::Worker("boom".into()),
        }
    }

    #[test]
    fn phases_follow_the_barrier() {
        let now = Instant::now();
        let mut c = coordinator(2, 2, 1);

        let m0 = c.next_assignment(now).unwrap().unwrap();
        let m1 = c.next_assignment(now).unwrap().unwrap();
        assert_eq!((m0.task, m1.task), (TaskId::map(0), TaskId::map(1)));
        assert_eq!(c.next_assignment(now).unwrap(), None);

        assert_eq!(c.apply(done(m0)).unwrap(), Applied::Accepted);
        // Barrier still closed: map-1 is running.
        assert_eq!(c.state(), &JobState::MapRunning);
        assert_eq!(c.next_assignment(now).unwrap(), None);

        c.apply(done(m1)).unwrap();
        assert_eq!(c.state(), &JobState::ReduceRunning);

        let r0 = c.next_assignment(now).unwrap().unwrap();
        let r1 = c.next_assignment(now).unwrap().unwrap();
        assert_eq!(r0.task, TaskId::reduce(0));
        c.apply(done(r0)).unwrap();
        c.apply(done(r1)).unwrap();

        assert_eq!(c.state(), &JobState::Succeeded);
        assert!(c.is_finished());
        assert_eq!(c.skipped_records(), 4);

        let report = c.report(CombinerStats::default());
        assert!(report.succeeded());
        let path: Vec<&JobState> = report.history.get_path();
        assert_eq!(
            path,
            vec![
                &JobState::Pending,
                &JobState::MapRunning,
                &JobState::ShuffleBarrier,
                &JobState::ReduceRunning,
                &JobState::Succeeded
            ]
        );
    }

    #[test]
    fn job_without_map_tasks_opens_the_barrier_immediately() {
        let c = coordinator(0, 3, 1);
        assert_eq!(c.state(), &JobState::ReduceRunning);
        assert_eq!(c.status().reduces_total, 3);
    }

    #[test]
    fn failed_attempt_is_retried_and_stale_events_ignored() {
        let now = Instant::now();
        let mut c = coordinator(1, 1, 3);

        let first = c.next_assignment(now).unwrap().unwrap();
        assert_eq!(c.apply(failed(first)).unwrap(), Applied::Retrying { attempts: 1 });

        let second = c.next_assignment(now).unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        assert!(!c.is_current(first.task, first.attempt));

        // A late success of attempt 1 must not count.
        assert_eq!(c.apply(done(first)).unwrap(), Applied::Stale);
        assert_eq!(c.records_read(), 0);

        c.apply(done(second)).unwrap();
        assert_eq!(c.records_read(), 3);
        assert_eq!(c.state(), &JobState::ReduceRunning);
    }

    #[test]
    fn exhausted_map_task_fails_the_job_as_partition_incomplete() {
        let now = Instant::now();
        let mut c = coordinator(2, 1, 2);

        let a = c.next_assignment(now).unwrap().unwrap();
        let other = c.next_assignment(now).unwrap().unwrap();
        c.apply(failed(a)).unwrap();
        let b = c.next_assignment(now).unwrap().unwrap();
        assert_eq!(b.task, a.task);
        assert_eq!(c.apply(failed(b)).unwrap(), Applied::Exhausted);

        assert_eq!(c.state(), &JobState::Failed);
        assert_eq!(c.status().failed_task(), Some(TaskId::map(0)));
        assert!(matches!(c.failure(), Some(JobFailure::PartitionIncomplete(e)) if e.attempts == 2));
        // The other running map attempt was failed with the job.
        assert_eq!(c.task(other.task).map(|t| t.state().clone()), Some(TaskState::Failed));
        assert_eq!(c.next_assignment(now).unwrap(), None);
        assert_eq!(c.apply(done(other)).unwrap(), Applied::Stale);
    }

    #[test]
    fn exhausted_reduce_task_is_reported_by_id() {
        let now = Instant::now();
        let mut c = coordinator(0, 2, 1);
        let r = c.next_assignment(now).unwrap().unwrap();
        assert_eq!(c.apply(failed(r)).unwrap(), Applied::Exhausted);
        assert!(matches!(
            c.failure(),
            Some(JobFailure::TaskExhausted { task, attempts: 1, .. }) if *task == TaskId::reduce(0)
        ));
    }

    #[test]
    fn expired_attempts_are_failed_and_retried() {
        let start = Instant::now();
        let mut c = coordinator(1, 1, 2);
        let first = c.next_assignment(start).unwrap().unwrap();

        assert!(c.expire(start + Duration::from_millis(50)).unwrap().is_empty());
        let expired = c.expire(start + Duration::from_millis(150)).unwrap();
        assert_eq!(expired, vec![first]);

        let task = c.task(first.task).unwrap();
        assert_eq!(task.state(), &TaskState::Pending);
        assert!(task.last_error().unwrap_or_default().contains("100 ms"));
        assert_eq!(c.apply(done(first)).unwrap(), Applied::Stale);
    }

    #[test]
    fn abort_fails_running_tasks_and_the_job() {
        let now = Instant::now();
        let mut c = coordinator(2, 1, 3);
        let running = c.next_assignment(now).unwrap().unwrap();

        c.abort(JobFailure::Aborted {
            reason: "cancelled".into(),
        })
        .unwrap();
        assert_eq!(c.state(), &JobState::Failed);
        assert!(c.running().is_empty());
        assert!(!c.is_current(running.task, running.attempt));

        // Aborting twice is harmless.
        c.abort(JobFailure::Aborted {
            reason: "again".into(),
        })
        .unwrap();
        assert!(matches!(c.failure(), Some(JobFailure::Aborted { reason }) if reason == "cancelled"));
    }

    #[test]
    fn unknown_tasks_are_errors() {
        let mut c = coordinator(1, 1, 1);
        let result = c.apply(done(Assignment {
            task: TaskId::map(9),
            attempt: 1,
        }));
        assert_eq!(result, Err(SchedulerError::UnknownTask(TaskId::map(9))));
    }
}
