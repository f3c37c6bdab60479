//! Partitioning and the shuffle between map and reduce.
//!
//! Map tasks split their combined output with a `Partitioner`, collect it in
//! a `ShuffleWriter`, and publish it through a `ShuffleStore` in one commit.
//! Reducers fetch their partition once every map task has committed.

mod error;
mod partitioner;
mod spill;
mod store;
mod writer;

pub use error::ShuffleError;
pub use partitioner::{build_partitioner, HashPartitioner, Partitioner, RangePartitioner};
pub use spill::{SpillEnvelope, SpillRuns, SpillShuffle, SPILL_FORMAT_VERSION};
pub use store::{MemoryShuffle, ShuffleInput, ShuffleStore};
pub use writer::ShuffleWriter;

/// Index of a reduce partition, `0..partition_count`.
pub type PartitionId = usize;
