//! Lifecycle state-machine core used by the scheduler.
//!
//! - State definitions via the `State` trait and the `state_enum!` macro
//! - Guard predicates for transition control (the shuffle barrier)
//! - Immutable, timestamped transition history
//!
//! Nothing in this module performs I/O.

mod guard;
mod history;
#[macro_use]
mod macros;
mod state;

pub use guard::Guard;
pub use history::{StateHistory, StateTransition};
pub use state::State;
