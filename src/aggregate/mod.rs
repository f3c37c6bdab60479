//! Partial aggregates and the merge contract.
//!
//! - `PartialAggregate` / `FinalAggregate`: the single data shape every
//!   phase produces and consumes
//! - `MergeOperator`: a named pure leaf function lifted to aggregates
//! - `ContractCheck`: sampled verification that the operator is commutative,
//!   associative, and has the empty aggregate as identity

mod contract;
mod merge;
mod partial;

pub use contract::ContractCheck;
pub use merge::{LeafFn, MergeOperator};
pub(crate) use merge::{max_leaf, min_leaf, sum_leaf};
pub use partial::{AggregateKey, FinalAggregate, PartialAggregate, Tally};
