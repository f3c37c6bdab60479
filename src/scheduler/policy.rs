//! Retry and timeout policy for task attempts.
//!
//! The policy is a set of rules evaluated against an attempt context with
//! stillwater's `Validation`, so a check reports every rule an attempt
//! breaks at once (an attempt can be both over budget and out of retries).

use super::task::TaskId;
use crate::config::JobSpec;
use std::time::Duration;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

/// What a rule sees about one attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptContext {
    pub task: TaskId,
    /// 1-based attempt number
    pub attempt: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("attempt {attempt} exceeds the limit of {max} attempt(s)")]
    AttemptsExhausted { max: u32, attempt: u32 },

    #[error("running for {elapsed:?}, budget is {budget:?}")]
    TimedOut { budget: Duration, elapsed: Duration },

    #[error("{message}")]
    Rejected { message: String },
}

pub type PolicyOutcome = Validation<(), NonEmptyVec<PolicyViolation>>;

/// Extra rule applied to every attempt context.
pub type PolicyCheck = Box<dyn Fn(&AttemptContext) -> PolicyOutcome + Send + Sync>;

pub struct RetryPolicy {
    max_attempts: u32,
    timeout: Option<Duration>,
    checks: Vec<PolicyCheck>,
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// The policy a job spec asks for.
    pub fn from_spec(spec: &JobSpec) -> Self {
        Self::builder()
            .max_attempts(spec.max_attempts())
            .timeout(spec.task_timeout)
            .build()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Evaluate every rule, accumulating all violations.
    pub fn enforce(&self, context: &AttemptContext) -> PolicyOutcome {
        let mut checks: Vec<PolicyOutcome> = Vec::with_capacity(2 + self.checks.len());

        checks.push(if context.attempt > self.max_attempts {
            Validation::fail(PolicyViolation::AttemptsExhausted {
                max: self.max_attempts,
                attempt: context.attempt,
            })
        } else {
            Validation::success(())
        });

        if let Some(budget) = self.timeout {
            checks.push(if context.elapsed > budget {
                Validation::fail(PolicyViolation::TimedOut {
                    budget,
                    elapsed: context.elapsed,
                })
            } else {
                Validation::success(())
            });
        }

        for check in &self.checks {
            checks.push(check(context));
        }

        Validation::all_vec(checks).map(|_| ())
    }

    /// Whether a task that has used `attempts` attempts may start another.
    pub fn may_retry(&self, task: TaskId, attempts: u32) -> bool {
        self.enforce(&AttemptContext {
            task,
            attempt: attempts.saturating_add(1),
            elapsed: Duration::ZERO,
        })
        .is_success()
    }

    /// The timeout violation of a running attempt, if it has one.
    pub fn deadline_violation(&self, context: &AttemptContext) -> Option<PolicyViolation> {
        match self.enforce(context) {
            Validation::Success(()) => None,
            Validation::Failure(violations) => violations
                .iter()
                .find(|v| matches!(v, PolicyViolation::TimedOut { .. }))
                .cloned(),
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("timeout", &self.timeout)
            .field("checks", &self.checks.len())
            .finish()
    }
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder {
    max_attempts: u32,
    timeout: Option<Duration>,
    checks: Vec<PolicyCheck>,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_attempts: 1,
            timeout: None,
            checks: Vec::new(),
        }
    }

    /// Total attempts allowed, the first one included.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Wall-clock budget of a single attempt.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn require<F>(mut self, check: F) -> Self
    where
        F: Fn(&AttemptContext) -> PolicyOutcome + Send + Sync + 'static,
    {
        self.checks.push(Box::new(check));
        self
    }

    /// Add a predicate rule with a fixed rejection message.
    pub fn require_pred<F>(mut self, predicate: F, message: impl Into<String>) -> Self
    where
        F: Fn(&AttemptContext) -> bool + Send + Sync + 'static,
    {
        let message = message.into();
        self.checks.push(Box::new(move |ctx: &AttemptContext| {
            if predicate(ctx) {
                Validation::success(())
            } else {
                Validation::fail(PolicyViolation::Rejected {
                    message: message.clone(),
                })
            }
        }));
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            timeout: self.timeout,
            checks: self.checks,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
