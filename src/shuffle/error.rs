//! Shuffle and spill error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by shuffle stores.
#[derive(Debug, Error)]
pub enum ShuffleError {
    /// Encoding a spill envelope failed
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// Decoding a spill envelope failed
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Spill file written by an incompatible version
    #[error("unsupported spill version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Spill file does not belong where it was found
    #[error("spill validation failed: {0}")]
    ValidationFailed(String),

    #[error("spill I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("partition {partition} out of range (job has {count})")]
    PartitionOutOfRange { partition: usize, count: usize },

    #[error("map task {map_task} produced {found} partitions, expected {expected}")]
    WrongFanout {
        map_task: usize,
        expected: usize,
        found: usize,
    },

    #[error("shuffle store lock poisoned")]
    Poisoned,
}
