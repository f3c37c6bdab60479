//! Environment variable names and default values for job tuning.

// Environment variable names
pub const ENV_WORKERS: &str = "FOLDWISE_WORKERS";
pub const ENV_MAX_BUFFERED_KEYS: &str = "FOLDWISE_MAX_BUFFERED_KEYS";
pub const ENV_MAX_BUFFER_AGE_MS: &str = "FOLDWISE_MAX_BUFFER_AGE_MS";
pub const ENV_TASK_TIMEOUT_MS: &str = "FOLDWISE_TASK_TIMEOUT_MS";
pub const ENV_RETRY_LIMIT: &str = "FOLDWISE_RETRY_LIMIT";
pub const ENV_SPILL_DIR: &str = "FOLDWISE_SPILL_DIR";

// Combiner: flush once this many distinct keys are buffered
pub const DEFAULT_MAX_BUFFERED_KEYS: usize = 100_000;
// Combiner: flush a buffer older than this even if it is small
pub const DEFAULT_MAX_BUFFER_AGE_MS: u64 = 5_000;

pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 5 * 60 * 1_000;
/// Retries after the first attempt
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
/// Records per map task
pub const DEFAULT_SLICE_SIZE: usize = 50_000;
pub const DEFAULT_PARTITION_COUNT: usize = 4;
/// Real map outputs fed to the merge contract check
pub const DEFAULT_CONTRACT_SAMPLES: usize = 4;

/// How often the executor wakes up to look for expired attempts
pub const POLL_INTERVAL_MS: u64 = 50;

/// Partitions with at least this many map inputs are reduced as a parallel tree
pub const PARALLEL_REDUCE_THRESHOLD: usize = 32;
