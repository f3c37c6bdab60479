//! Output sinks for final aggregates.
//!
//! The executor calls `write` once per partition, after the partition's
//! reduce task is accepted. Durability is the sink's business.

use crate::aggregate::FinalAggregate;
use crate::shuffle::PartitionId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("cannot encode partition {partition}: {source}")]
    Encode {
        partition: PartitionId,
        #[source]
        source: serde_json::Error,
    },

    #[error("partition {0} was already written")]
    Duplicate(PartitionId),

    #[error("sink lock poisoned")]
    Poisoned,
}

/// Destination of final aggregates.
pub trait OutputSink: Send + Sync {
    fn write(&self, partition: PartitionId, aggregate: &FinalAggregate) -> Result<(), SinkError>;
}

/// Keeps every written partition in memory. Refuses a second write for the
/// same partition, which makes exactly-once delivery observable in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    partitions: Mutex<BTreeMap<PartitionId, FinalAggregate>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn partitions(&self) -> BTreeMap<PartitionId, FinalAggregate> {
        self.partitions
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, partition: PartitionId) -> Option<FinalAggregate> {
        self.partitions
            .lock()
            .ok()
            .and_then(|guard| guard.get(&partition).cloned())
    }
}

impl OutputSink for MemorySink {
    fn write(&self, partition: PartitionId, aggregate: &FinalAggregate) -> Result<(), SinkError> {
        let mut guard = self.partitions.lock().map_err(|_| SinkError::Poisoned)?;
        if guard.contains_key(&partition) {
            return Err(SinkError::Duplicate(partition));
        }
        guard.insert(partition, aggregate.clone());
        Ok(())
    }
}

#[derive(Serialize)]
struct PartitionLine<'a> {
    partition: PartitionId,
    aggregate: &'a FinalAggregate,
}

/// Writes `{"partition": N, "aggregate": {...}}` lines.
///
/// A partition's line is handed to the writer at most once. If the flush
/// that follows fails, the reduce task is retried and the retry only
/// flushes again, so buffered writers never end up with two copies.
pub struct JsonLinesSink<W: Write + Send> {
    state: Mutex<LineState<W>>,
}

struct LineState<W> {
    writer: W,
    accepted: BTreeSet<PartitionId>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            state: Mutex::new(LineState {
                writer,
                accepted: BTreeSet::new(),
            }),
        }
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.state
            .into_inner()
            .map(|state| state.writer)
            .map_err(|_| SinkError::Poisoned)
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Create (or truncate) the output file, creating parent directories.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> OutputSink for JsonLinesSink<W> {
    fn write(&self, partition: PartitionId, aggregate: &FinalAggregate) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&PartitionLine {
            partition,
            aggregate,
        })
        .map_err(|source| SinkError::Encode { partition, source })?;
        line.push(b'\n');

        let mut state = self.state.lock().map_err(|_| SinkError::Poisoned)?;
        if !state.accepted.contains(&partition) {
            state.writer.write_all(&line)?;
            state.accepted.insert(partition);
        }
        state.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::PartialAggregate;

    fn final_of(dimension: &str, group: &str, value: i64) -> FinalAggregate {
        FinalAggregate::seal(PartialAggregate::singleton(dimension, group, value))
    }

    #[test]
    fn memory_sink_rejects_duplicate_partitions() {
        let sink = MemorySink::new();
        sink.write(0, &final_of("URL", "/", 2)).unwrap();
        assert!(matches!(
            sink.write(0, &final_of("URL", "/", 2)),
            Err(SinkError::Duplicate(0))
        ));
        assert_eq!(sink.get(0).and_then(|f| f.get("URL", "/")), Some(2));
        assert_eq!(sink.partitions().len(), 1);
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_partition() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.write(1, &final_of("Day", "20130512", 6)).unwrap();
        sink.write(0, &FinalAggregate::default()).unwrap();

        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"partition":1,"aggregate":{"Day":{"20130512":6}}}"#);
        assert_eq!(lines[1], r#"{"partition":0,"aggregate":{}}"#);
    }

    /// Fails the first write that reaches it, like a disk that hiccups once.
    #[derive(Debug)]
    struct FailsOnce {
        failed: bool,
        out: Vec<u8>,
    }

    impl Write for FailsOnce {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.failed {
                self.failed = true;
                return Err(io::Error::new(io::ErrorKind::Other, "disk hiccup"));
            }
            self.out.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn retried_write_after_failed_flush_emits_one_line() {
        let sink = JsonLinesSink::new(BufWriter::new(FailsOnce {
            failed: false,
            out: Vec::new(),
        }));
        let aggregate = final_of("Day", "20130512", 1);

        assert!(matches!(sink.write(0, &aggregate), Err(SinkError::Io(_))));
        sink.write(0, &aggregate).unwrap();

        let inner = sink.into_inner().unwrap().into_inner().unwrap();
        let text = String::from_utf8(inner.out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert_eq!(text, "{\"partition\":0,\"aggregate\":{\"Day\":{\"20130512\":1}}}\n");
    }

    #[test]
    fn file_sink_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.jsonl");
        let sink = JsonLinesSink::create(&path).unwrap();
        sink.write(0, &final_of("URL", "/", 1)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"URL\""));
    }
}
