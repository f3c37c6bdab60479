//! Errors for job specifications and their builder.

use thiserror::Error;

/// Errors raised while building, loading, or validating a `JobSpec`.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("initializer not specified. Call .init_fn(id) before .build()")]
    MissingInitFn,

    #[error("merge function not specified. Call .merge_fn(id) before .build()")]
    MissingMergeFn,

    #[error("record source not specified. Call .source(descriptor) before .build()")]
    MissingSource,

    #[error("output sink not specified. Call .sink(descriptor) before .build()")]
    MissingSink,

    #[error("`{field}` must be greater than zero")]
    Zero { field: &'static str },

    #[error("range partitioner needs {expected} sorted, distinct bounds for {partitions} partitions, got {found}")]
    RangeBounds {
        partitions: usize,
        expected: usize,
        found: usize,
    },

    #[error("environment variable {var}={value:?} is not a valid value")]
    InvalidEnv { var: &'static str, value: String },

    #[error("cannot parse job specification: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cannot read job specification: {0}")]
    Io(#[from] std::io::Error),
}
