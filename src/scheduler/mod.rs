//! Scheduling: task and job lifecycles, retry policy, the coordinator and
//! the local executor.
//!
//! # Example
//!
//! ```rust
//! use foldwise::config::{JobSpec, SinkDescriptor, SourceDescriptor};
//! use foldwise::registry::FunctionRegistry;
//! use foldwise::scheduler::{JobState, LocalExecutor};
//! use foldwise::sink::MemorySink;
//! use std::sync::Arc;
//!
//! let spec = JobSpec::builder()
//!     .init_fn("access_log")
//!     .merge_fn("sum")
//!     .source(SourceDescriptor::Inline {
//!         lines: vec![
//!             "20130512020202,/,11".into(),
//!             "20130512020412,/,23".into(),
//!         ],
//!         delimiter: ',',
//!     })
//!     .sink(SinkDescriptor::Stdout)
//!     .partition_count(1)
//!     .build()
//!     .unwrap();
//!
//! let sink = Arc::new(MemorySink::new());
//! let report = LocalExecutor::new(FunctionRegistry::with_builtins())
//!     .run_with(&spec, spec.source.open(), sink.clone())
//!     .unwrap();
//!
//! assert_eq!(report.status, JobState::Succeeded);
//! assert_eq!(sink.get(0).and_then(|f| f.get("URL", "/")), Some(2));
//! ```

mod coordinator;
mod executor;
mod job;
mod policy;
mod task;

pub use coordinator::{Applied, Assignment, Coordinator, TaskEvent};
pub use executor::{Fault, FaultInjector, FaultPoint, LocalExecutor, NoFaults, ScriptedFaults};
pub use job::{JobFailure, JobReport, JobState, JobStatus};
pub use policy::{AttemptContext, PolicyCheck, PolicyOutcome, PolicyViolation, RetryPolicy, RetryPolicyBuilder};
pub use task::{CancelToken, SchedulerError, Task, TaskId, TaskKind, TaskState, TaskSummary};
