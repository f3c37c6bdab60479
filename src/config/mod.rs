//! Job specification: the submission surface of a run.
//!
//! A `JobSpec` is plain data. Functions are referenced by registry id, the
//! source and sink by descriptor, so a spec can be written to a JSON file and
//! submitted from anywhere. Specs are built with `JobSpecBuilder`, loaded
//! with `JobSpec::from_json`, and tuned through `FOLDWISE_*` environment
//! variables.

pub mod constants;
mod error;

pub use error::SpecError;

use crate::registry::{InitFnId, MergeFnId};
use crate::sink::{JsonLinesSink, OutputSink, SinkError};
use crate::source::{DelimitedFileSource, MemorySource, RecordSource};
use constants::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Serialize a `Duration` as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Flush thresholds of the local combiner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinerConfig {
    pub max_buffered_keys: usize,
    #[serde(rename = "max_buffer_age_ms", with = "duration_ms")]
    pub max_buffer_age: Duration,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            max_buffered_keys: DEFAULT_MAX_BUFFERED_KEYS,
            max_buffer_age: Duration::from_millis(DEFAULT_MAX_BUFFER_AGE_MS),
        }
    }
}

fn default_delimiter() -> char {
    ','
}

/// Where records come from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// Line-delimited text file
    DelimitedFile {
        path: PathBuf,
        #[serde(default = "default_delimiter")]
        delimiter: char,
    },
    /// Lines embedded in the spec itself
    Inline {
        lines: Vec<String>,
        #[serde(default = "default_delimiter")]
        delimiter: char,
    },
}

impl SourceDescriptor {
    pub fn open(&self) -> Arc<dyn RecordSource> {
        match self {
            Self::DelimitedFile { path, delimiter } => {
                Arc::new(DelimitedFileSource::new(path.clone(), *delimiter))
            }
            Self::Inline { lines, delimiter } => {
                Arc::new(MemorySource::from_lines(lines, *delimiter))
            }
        }
    }
}

/// Where final aggregates go.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkDescriptor {
    /// One JSON object per partition, one per line
    JsonLines { path: PathBuf },
    /// JSON lines on standard output
    Stdout,
}

impl SinkDescriptor {
    pub fn open(&self) -> Result<Arc<dyn OutputSink>, SinkError> {
        Ok(match self {
            Self::JsonLines { path } => Arc::new(JsonLinesSink::create(path)?),
            Self::Stdout => Arc::new(JsonLinesSink::new(std::io::stdout())),
        })
    }
}

/// How keys are assigned to partitions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionerSpec {
    #[default]
    Hash,
    /// Explicit ranges over the group value: partition `i` takes groups
    /// `<= bounds[i]`, the last partition takes the rest.
    Range { bounds: Vec<String> },
}

/// Everything needed to run one job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub init_fn: InitFnId,
    pub merge_fn: MergeFnId,
    pub source: SourceDescriptor,
    pub sink: SinkDescriptor,
    #[serde(default = "default_partition_count")]
    pub partition_count: usize,
    /// Retries allowed after a task's first attempt
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_slice_size")]
    pub slice_size: usize,
    #[serde(default)]
    pub partitioner: PartitionerSpec,
    #[serde(default)]
    pub combiner: CombinerConfig,
    #[serde(rename = "task_timeout_ms", with = "duration_ms", default = "default_task_timeout")]
    pub task_timeout: Duration,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_contract_samples")]
    pub contract_samples: usize,
    /// Spill map outputs to files under this directory instead of memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spill_dir: Option<PathBuf>,
}

fn default_partition_count() -> usize {
    DEFAULT_PARTITION_COUNT
}

fn default_retry_limit() -> u32 {
    DEFAULT_RETRY_LIMIT
}

fn default_slice_size() -> usize {
    DEFAULT_SLICE_SIZE
}

fn default_task_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TASK_TIMEOUT_MS)
}

fn default_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_contract_samples() -> usize {
    DEFAULT_CONTRACT_SAMPLES
}

impl JobSpec {
    pub fn builder() -> JobSpecBuilder {
        JobSpecBuilder::new()
    }

    /// Parse and validate a JSON spec.
    pub fn from_json(json: &str) -> Result<Self, SpecError> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, SpecError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Maximum attempts per task: the first run plus `retry_limit` retries.
    pub fn max_attempts(&self) -> u32 {
        self.retry_limit.saturating_add(1)
    }

    /// Override tuning knobs from the process environment.
    pub fn apply_env(self) -> Result<Self, SpecError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Override tuning knobs from an arbitrary variable lookup.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, SpecError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, SpecError> {
            value
                .trim()
                .parse()
                .map_err(|_| SpecError::InvalidEnv { var, value })
        }

        if let Some(value) = lookup(ENV_WORKERS) {
            self.workers = parse(ENV_WORKERS, value)?;
        }
        if let Some(value) = lookup(ENV_MAX_BUFFERED_KEYS) {
            self.combiner.max_buffered_keys = parse(ENV_MAX_BUFFERED_KEYS, value)?;
        }
        if let Some(value) = lookup(ENV_MAX_BUFFER_AGE_MS) {
            self.combiner.max_buffer_age = Duration::from_millis(parse(ENV_MAX_BUFFER_AGE_MS, value)?);
        }
        if let Some(value) = lookup(ENV_TASK_TIMEOUT_MS) {
            self.task_timeout = Duration::from_millis(parse(ENV_TASK_TIMEOUT_MS, value)?);
        }
        if let Some(value) = lookup(ENV_RETRY_LIMIT) {
            self.retry_limit = parse(ENV_RETRY_LIMIT, value)?;
        }
        if let Some(value) = lookup(ENV_SPILL_DIR) {
            if !value.trim().is_empty() {
                self.spill_dir = Some(PathBuf::from(value.trim()));
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        let positive = [
            ("partition_count", self.partition_count),
            ("slice_size", self.slice_size),
            ("workers", self.workers),
            ("combiner.max_buffered_keys", self.combiner.max_buffered_keys),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(SpecError::Zero { field });
            }
        }
        if self.task_timeout.is_zero() {
            return Err(SpecError::Zero {
                field: "task_timeout_ms",
            });
        }
        if let PartitionerSpec::Range { bounds } = &self.partitioner {
            let sorted = bounds.windows(2).all(|pair| pair[0] < pair[1]);
            if bounds.len() + 1 != self.partition_count || !sorted {
                return Err(SpecError::RangeBounds {
                    partitions: self.partition_count,
                    expected: self.partition_count.saturating_sub(1),
                    found: bounds.len(),
                });
            }
        }
        Ok(())
    }
}

/// Fluent builder for `JobSpec`.
///
/// ```rust
/// use foldwise::config::{JobSpec, SinkDescriptor, SourceDescriptor};
///
/// let spec = JobSpec::builder()
///     .init_fn("access_log")
///     .merge_fn("sum")
///     .source(SourceDescriptor::Inline {
///         lines: vec!["20130512020202,/,11".into()],
///         delimiter: ',',
///     })
///     .sink(SinkDescriptor::Stdout)
///     .partition_count(2)
///     .build()
///     .unwrap();
/// assert_eq!(spec.max_attempts(), 4);
/// ```
#[derive(Debug, Default)]
pub struct JobSpecBuilder {
    init_fn: Option<InitFnId>,
    merge_fn: Option<MergeFnId>,
    source: Option<SourceDescriptor>,
    sink: Option<SinkDescriptor>,
    partition_count: Option<usize>,
    retry_limit: Option<u32>,
    slice_size: Option<usize>,
    partitioner: Option<PartitionerSpec>,
    combiner: Option<CombinerConfig>,
    task_timeout: Option<Duration>,
    workers: Option<usize>,
    contract_samples: Option<usize>,
    spill_dir: Option<PathBuf>,
}

impl JobSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initializer id (required).
    pub fn init_fn(mut self, id: impl Into<InitFnId>) -> Self {
        self.init_fn = Some(id.into());
        self
    }

    /// Set the merge function id (required).
    pub fn merge_fn(mut self, id: impl Into<MergeFnId>) -> Self {
        self.merge_fn = Some(id.into());
        self
    }

    /// Set the record source (required).
    pub fn source(mut self, source: SourceDescriptor) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the output sink (required).
    pub fn sink(mut self, sink: SinkDescriptor) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn partition_count(mut self, n: usize) -> Self {
        self.partition_count = Some(n);
        self
    }

    pub fn retry_limit(mut self, n: u32) -> Self {
        self.retry_limit = Some(n);
        self
    }

    pub fn slice_size(mut self, n: usize) -> Self {
        self.slice_size = Some(n);
        self
    }

    pub fn partitioner(mut self, partitioner: PartitionerSpec) -> Self {
        self.partitioner = Some(partitioner);
        self
    }

    pub fn combiner(mut self, combiner: CombinerConfig) -> Self {
        self.combiner = Some(combiner);
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = Some(n);
        self
    }

    pub fn contract_samples(mut self, n: usize) -> Self {
        self.contract_samples = Some(n);
        self
    }

    pub fn spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    /// Build and validate the spec.
    pub fn build(self) -> Result<JobSpec, SpecError> {
        let spec = JobSpec {
            init_fn: self.init_fn.ok_or(SpecError::MissingInitFn)?,
            merge_fn: self.merge_fn.ok_or(SpecError::MissingMergeFn)?,
            source: self.source.ok_or(SpecError::MissingSource)?,
            sink: self.sink.ok_or(SpecError::MissingSink)?,
            partition_count: self.partition_count.unwrap_or(DEFAULT_PARTITION_COUNT),
            retry_limit: self.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT),
            slice_size: self.slice_size.unwrap_or(DEFAULT_SLICE_SIZE),
            partitioner: self.partitioner.unwrap_or_default(),
            combiner: self.combiner.unwrap_or_default(),
            task_timeout: self.task_timeout.unwrap_or_else(default_task_timeout),
            workers: self.workers.unwrap_or_else(default_workers),
            contract_samples: self.contract_samples.unwrap_or(DEFAULT_CONTRACT_SAMPLES),
            spill_dir: self.spill_dir,
        };
        spec.validate()?;
        Ok(spec)
    }
}
