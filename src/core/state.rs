//! Core State trait shared by task and job lifecycles.
//!
//! A state is a plain value. Everything the scheduler needs to know about a
//! state (its name, whether it is terminal, which states may follow it) is
//! answered by pure methods on that value.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for lifecycle states tracked by the coordinator.
///
/// # Required Traits
///
/// - `Clone`: states are copied into transition history
/// - `PartialEq`: transitions are validated by comparing states
/// - `Debug`: states appear in logs and errors
/// - `Serialize` + `Deserialize`: histories are written into job reports
///
/// # Example
///
/// ```rust
/// use foldwise::core::State;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
/// enum Attempt {
///     Queued,
///     Started,
///     Done,
/// }
///
/// impl State for Attempt {
///     fn name(&self) -> &str {
///         match self {
///             Self::Queued => "Queued",
///             Self::Started => "Started",
///             Self::Done => "Done",
///         }
///     }
///
///     fn is_final(&self) -> bool {
///         matches!(self, Self::Done)
///     }
///
///     fn allows(&self, next: &Self) -> bool {
///         matches!(
///             (self, next),
///             (Self::Queued, Self::Started) | (Self::Started, Self::Done)
///         )
///     }
/// }
///
/// assert!(Attempt::Queued.allows(&Attempt::Started));
/// assert!(!Attempt::Done.allows(&Attempt::Queued));
/// ```
pub trait State:
    Clone + PartialEq + Debug + Serialize + for<'de> Deserialize<'de> + Send + Sync
{
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Terminal states accept no further transitions.
    ///
    /// Default implementation returns `false`.
    fn is_final(&self) -> bool {
        false
    }

    /// Failure states. Usually also final, but a retryable failure is not.
    ///
    /// Default implementation returns `false`.
    fn is_error(&self) -> bool {
        false
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Default implementation allows any move out of a non-final state.
    fn allows(&self, next: &Self) -> bool {
        let _ = next;
        !self.is_final()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
    enum Phase {
        Idle,
        Busy,
        Finished,
        Broken,
    }

    impl State for Phase {
        fn name(&self) -> &str {
            match self {
                Self::Idle => "Idle",
                Self::Busy => "Busy",
                Self::Finished => "Finished",
                Self::Broken => "Broken",
            }
        }

        fn is_final(&self) -> bool {
            matches!(self, Self::Finished | Self::Broken)
        }

        fn is_error(&self) -> bool {
            matches!(self, Self::Broken)
        }
    }

    #[test]
    fn default_allows_leaving_non_final_states() {
        assert!(Phase::Idle.allows(&Phase::Busy));
        assert!(Phase::Busy.allows(&Phase::Broken));
        assert!(!Phase::Finished.allows(&Phase::Idle));
        assert!(!Phase::Broken.allows(&Phase::Busy));
    }

    #[test]
    fn error_states_are_flagged() {
        assert!(Phase::Broken.is_error());
        assert!(!Phase::Finished.is_error());
        assert_eq!(Phase::Busy.name(), "Busy");
    }

    #[test]
    fn state_serializes_correctly() {
        let json = serde_json::to_string(&Phase::Busy).unwrap();
        let back: Phase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Phase::Busy);
    }
}
