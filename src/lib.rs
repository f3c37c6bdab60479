//! Foldwise: combiner-based aggregation over large record streams
//!
//! A job computes grouped statistics in three phases. Map tasks turn source
//! slices into partial aggregates and pre-aggregate them in a local combiner.
//! The combined output is split by key into partitions and shuffled. Reduce
//! tasks merge every partition's inputs into one final aggregate. All of it
//! rests on one contract: the merge function is commutative and associative
//! with the empty aggregate as identity, so partials can be merged in any
//! order, at any granularity, and re-merged after a retry without changing
//! the result.
//!
//! # Core Concepts
//!
//! - **Aggregates**: `PartialAggregate` and the `MergeOperator` that folds them
//! - **Registry**: initializers and merge functions are referenced by id
//! - **Combiner**: bounded worker-side pre-aggregation
//! - **Shuffle**: deterministic partitioning and exactly-once map output commits
//! - **Scheduler**: task and job state machines driven by worker events
//!
//! # Example
//!
//! ```rust
//! use foldwise::aggregate::{FinalAggregate, MergeOperator};
//! use foldwise::config::{JobSpec, SinkDescriptor, SourceDescriptor};
//! use foldwise::registry::FunctionRegistry;
//! use foldwise::scheduler::LocalExecutor;
//! use foldwise::sink::MemorySink;
//! use std::sync::Arc;
//!
//! let lines = [
//!     "20130512020202,/,11",
//!     "20130512020412,/,23",
//!     "20130512030143,/post/clojure,11",
//!     "20130512040256,/post/datomic,23",
//!     "20130512050910,/post/clojure,11",
//!     "20130512051012,/post/clojure,14",
//! ];
//! let spec = JobSpec::builder()
//!     .init_fn("access_log")
//!     .merge_fn("sum")
//!     .source(SourceDescriptor::Inline {
//!         lines: lines.iter().map(|l| l.to_string()).collect(),
//!         delimiter: ',',
//!     })
//!     .sink(SinkDescriptor::Stdout)
//!     .slice_size(2)
//!     .partition_count(3)
//!     .build()
//!     .unwrap();
//!
//! let sink = Arc::new(MemorySink::new());
//! let report = LocalExecutor::new(FunctionRegistry::with_builtins())
//!     .run_with(&spec, spec.source.open(), sink.clone())
//!     .unwrap();
//! assert!(report.succeeded());
//!
//! let all = FinalAggregate::union(sink.partitions().into_values(), &MergeOperator::sum());
//! assert_eq!(all.get("URL", "/post/clojure"), Some(3));
//! assert_eq!(all.get("User", "11"), Some(3));
//! assert_eq!(all.get("Day", "20130512"), Some(6));
//! ```

pub mod core;

pub mod aggregate;
pub mod combiner;
pub mod config;
pub mod error;
pub mod mapper;
pub mod reducer;
pub mod registry;
pub mod scheduler;
pub mod shuffle;
pub mod sink;
pub mod source;

// Re-export commonly used types
pub use aggregate::{AggregateKey, FinalAggregate, MergeOperator, PartialAggregate};
pub use config::JobSpec;
pub use error::{JobError, MergeContractViolation, PartitionIncompleteError, RecordParseError, TaskExecutionError};
pub use registry::FunctionRegistry;
pub use scheduler::{JobReport, JobState, LocalExecutor};
