//! Guard predicates for controlling transitions.
//!
//! A guard is a pure boolean function over some view of the system. The
//! coordinator uses one to hold the shuffle barrier closed until every map
//! task has delivered its output.

/// Pure predicate that decides whether a transition may happen.
///
/// # Example
///
/// ```rust
/// use foldwise::core::Guard;
///
/// struct Progress {
///     done: usize,
///     total: usize,
/// }
///
/// let all_done = Guard::new(|p: &Progress| p.done == p.total);
///
/// assert!(!all_done.check(&Progress { done: 2, total: 3 }));
/// assert!(all_done.check(&Progress { done: 3, total: 3 }));
/// ```
pub struct Guard<C: ?Sized> {
    description: String,
    predicate: Box<dyn Fn(&C) -> bool + Send + Sync>,
}

impl<C: ?Sized> Guard<C> {
    /// Create a guard from a pure predicate function.
    ///
    /// The predicate must be deterministic and free of side effects.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        Self::named("guard", predicate)
    }

    /// Create a guard with a description used in logs.
    pub fn named<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        Guard {
            description: description.into(),
            predicate: Box::new(predicate),
        }
    }

    /// Evaluate the predicate.
    pub fn check(&self, context: &C) -> bool {
        (self.predicate)(context)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl<C: ?Sized> std::fmt::Debug for Guard<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counts {
        completed: usize,
        failed: usize,
        total: usize,
    }

    #[test]
    fn guard_opens_only_when_everything_completed() {
        let barrier = Guard::named("all complete", |c: &Counts| c.completed == c.total);

        assert!(!barrier.check(&Counts {
            completed: 1,
            failed: 0,
            total: 2
        }));
        assert!(barrier.check(&Counts {
            completed: 2,
            failed: 0,
            total: 2
        }));
        assert_eq!(barrier.description(), "all complete");
    }

    #[test]
    fn guard_is_deterministic() {
        let guard = Guard::new(|c: &Counts| c.failed == 0);
        let counts = Counts {
            completed: 0,
            failed: 1,
            total: 1,
        };

        assert_eq!(guard.check(&counts), guard.check(&counts));
        assert!(!guard.check(&counts));
    }

    #[test]
    fn guard_over_unsized_context() {
        let non_empty = Guard::<[u32]>::new(|xs| !xs.is_empty());
        assert!(non_empty.check(&[1, 2]));
        assert!(!non_empty.check(&[]));
    }
}
