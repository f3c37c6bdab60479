//! Record sources.
//!
//! Ingestion proper lives outside this crate; what the pipeline needs from a
//! source is that it can be cut into contiguous slices up front and that
//! every slice can be re-read from the start, which is what makes re-running
//! a map task possible.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while planning or reading a source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("slice {index} ({start}..{end}) is outside a source of {len} records")]
    SliceOutOfRange {
        index: usize,
        start: u64,
        end: u64,
        len: u64,
    },
}

/// An ordered tuple of scalar fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    fields: Vec<String>,
}

impl RawRecord {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    /// Split a delimited line into fields. Surrounding whitespace is trimmed.
    pub fn parse(line: &str, delimiter: char) -> Self {
        Self::new(
            line.trim()
                .split(delimiter)
                .map(|field| field.trim().to_string())
                .collect(),
        )
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() || self.fields.iter().all(String::is_empty)
    }
}

/// A contiguous range of records, `start..start + len`, handed to one map task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSlice {
    pub index: usize,
    pub start: u64,
    pub len: u64,
    /// Byte position of the slice's first record, for sources that can seek.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl SourceSlice {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }
}

/// Cut `total` records into slices of at most `slice_size`.
pub fn plan_slices(total: u64, slice_size: usize) -> Vec<SourceSlice> {
    let size = slice_size.max(1) as u64;
    let mut slices = Vec::new();
    let mut start = 0;
    while start < total {
        let len = size.min(total - start);
        slices.push(SourceSlice {
            index: slices.len(),
            start,
            len,
            offset: None,
        });
        start += len;
    }
    slices
}

/// Lazy sequence of records for one slice.
pub trait RecordStream {
    /// The next record, `None` at the end of the slice.
    ///
    /// An `Err` means the slice could not be read further; the map task
    /// attempt fails and is retried from the start of the slice.
    fn next(&mut self) -> Option<Result<RawRecord, SourceError>>;
}

/// A restartable, sliceable record source.
pub trait RecordSource: Send + Sync {
    /// Cut the source into contiguous slices of at most `slice_size` records.
    fn plan(&self, slice_size: usize) -> Result<Vec<SourceSlice>, SourceError>;

    /// Open one slice from its first record.
    fn open(&self, slice: &SourceSlice) -> Result<Box<dyn RecordStream + '_>, SourceError>;
}

impl<T: RecordSource + ?Sized> RecordSource for Arc<T> {
    fn plan(&self, slice_size: usize) -> Result<Vec<SourceSlice>, SourceError> {
        (**self).plan(slice_size)
    }

    fn open(&self, slice: &SourceSlice) -> Result<Box<dyn RecordStream + '_>, SourceError> {
        (**self).open(slice)
    }
}

/// Records held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    records: Vec<RawRecord>,
}

impl MemorySource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }

    /// Build from delimited lines; blank lines are dropped.
    pub fn from_lines<I, S>(lines: I, delimiter: char) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            lines
                .into_iter()
                .filter(|line| !line.as_ref().trim().is_empty())
                .map(|line| RawRecord::parse(line.as_ref(), delimiter))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

struct SliceIter<'a> {
    records: std::slice::Iter<'a, RawRecord>,
}

impl RecordStream for SliceIter<'_> {
    fn next(&mut self) -> Option<Result<RawRecord, SourceError>> {
        self.records.next().cloned().map(Ok)
    }
}

impl RecordSource for MemorySource {
    fn plan(&self, slice_size: usize) -> Result<Vec<SourceSlice>, SourceError> {
        Ok(plan_slices(self.records.len() as u64, slice_size))
    }

    fn open(&self, slice: &SourceSlice) -> Result<Box<dyn RecordStream + '_>, SourceError> {
        let len = self.records.len() as u64;
        if slice.end() > len {
            return Err(SourceError::SliceOutOfRange {
                index: slice.index,
                start: slice.start,
                end: slice.end(),
                len,
            });
        }
        let records = &self.records[slice.start as usize..slice.end() as usize];
        Ok(Box::new(SliceIter {
            records: records.iter(),
        }))
    }
}

/// Line-delimited text file; one record per non-blank line.
#[derive(Clone, Debug)]
pub struct DelimitedFileSource {
    path: PathBuf,
    delimiter: char,
}

impl DelimitedFileSource {
    pub fn new(path: impl Into<PathBuf>, delimiter: char) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> SourceError {
        SourceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn reader(&self) -> Result<BufReader<File>, SourceError> {
        File::open(&self.path)
            .map(BufReader::new)
            .map_err(|e| self.io_error(e))
    }
}

struct LineStream<'a> {
    source: &'a DelimitedFileSource,
    lines: io::Lines<BufReader<File>>,
    to_skip: u64,
    remaining: u64,
}

impl RecordStream for LineStream<'_> {
    fn next(&mut self) -> Option<Result<RawRecord, SourceError>> {
        while self.remaining > 0 {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(self.source.io_error(e))),
            };
            if line.trim().is_empty() {
                continue;
            }
            if self.to_skip > 0 {
                self.to_skip -= 1;
                continue;
            }
            self.remaining -= 1;
            return Some(Ok(RawRecord::parse(&line, self.source.delimiter)));
        }
        None
    }
}

impl RecordSource for DelimitedFileSource {
    /// One pass over the file, remembering where every slice begins so
    /// `open` can seek straight to it.
    fn plan(&self, slice_size: usize) -> Result<Vec<SourceSlice>, SourceError> {
        let size = slice_size.max(1) as u64;
        let mut reader = self.reader()?;
        let mut line = String::new();
        let mut position = 0u64;
        let mut total = 0u64;
        let mut offsets = Vec::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line).map_err(|e| self.io_error(e))?;
            if read == 0 {
                break;
            }
            if !line.trim().is_empty() {
                if total % size == 0 {
                    offsets.push(position);
                }
                total += 1;
            }
            position += read as u64;
        }

        let mut slices = plan_slices(total, slice_size);
        for (slice, offset) in slices.iter_mut().zip(offsets) {
            slice.offset = Some(offset);
        }
        Ok(slices)
    }

    fn open(&self, slice: &SourceSlice) -> Result<Box<dyn RecordStream + '_>, SourceError> {
        let mut reader = self.reader()?;
        let to_skip = match slice.offset {
            Some(offset) => {
                reader
                    .seek(SeekFrom::Start(offset))
                    .map_err(|e| self.io_error(e))?;
                0
            }
            None => slice.start,
        };
        Ok(Box::new(LineStream {
            source: self,
            lines: reader.lines(),
            to_skip,
            remaining: slice.len,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn drain(mut stream: Box<dyn RecordStream + '_>) -> Vec<RawRecord> {
        let mut out = Vec::new();
        while let Some(record) = stream.next() {
            out.push(record.unwrap());
        }
        out
    }

    #[test]
    fn plan_slices_covers_every_record_once() {
        let slices = plan_slices(10, 4);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0], SourceSlice { index: 0, start: 0, len: 4, offset: None });
        assert_eq!(slices[2], SourceSlice { index: 2, start: 8, len: 2, offset: None });
        assert_eq!(slices.iter().map(|s| s.len).sum::<u64>(), 10);
        assert!(plan_slices(0, 4).is_empty());
    }

    #[test]
    fn parse_splits_and_trims() {
        let record = RawRecord::parse(" 20130512020202, /, 11 ", ',');
        assert_eq!(record.fields(), &["20130512020202", "/", "11"]);
        assert_eq!(record.field(1), Some("/"));
        assert!(RawRecord::parse("", ',').is_empty());
    }

    #[test]
    fn memory_source_reopens_slices_identically() {
        let source = MemorySource::from_lines(["a,1", "", "b,2", "c,3"], ',');
        assert_eq!(source.len(), 3);
        let slices = source.plan(2).unwrap();
        assert_eq!(slices.len(), 2);

        let first = drain(source.open(&slices[1]).unwrap());
        let second = drain(source.open(&slices[1]).unwrap());
        assert_eq!(first, second);
        assert_eq!(first[0].field(0), Some("c"));
    }

    #[test]
    fn memory_source_rejects_foreign_slices() {
        let source = MemorySource::from_lines(["a"], ',');
        let bogus = SourceSlice { index: 0, start: 0, len: 5, offset: None };
        assert!(matches!(
            source.open(&bogus).map(|_| ()),
            Err(SourceError::SliceOutOfRange { len: 1, .. })
        ));
    }

    #[test]
    fn file_source_slices_skip_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "x|1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "y|2").unwrap();
        writeln!(file, "z|3").unwrap();

        let source = DelimitedFileSource::new(file.path(), '|');
        let slices = source.plan(2).unwrap();
        assert_eq!(slices.len(), 2);

        assert_eq!(slices[0].offset, Some(0));
        assert_eq!(slices[1].offset, Some(9));

        let tail = drain(source.open(&slices[1]).unwrap());
        assert_eq!(tail, vec![RawRecord::new(vec!["z".into(), "3".into()])]);
        let head = drain(source.open(&slices[0]).unwrap());
        assert_eq!(head.len(), 2);
        assert_eq!(head[1].field(0), Some("y"));
    }

    #[test]
    fn file_slice_without_offset_is_found_by_counting() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in ["a,1", "", "b,2", "c,3", "d,4"] {
            writeln!(file, "{line}").unwrap();
        }
        let source = DelimitedFileSource::new(file.path(), ',');
        let planned = source.plan(3).unwrap();
        let counted = SourceSlice {
            offset: None,
            ..planned[1]
        };

        let seeked = drain(source.open(&planned[1]).unwrap());
        assert_eq!(seeked, drain(source.open(&counted).unwrap()));
        assert_eq!(seeked, vec![RawRecord::new(vec!["d".into(), "4".into()])]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let source = DelimitedFileSource::new("/definitely/not/here.csv", ',');
        assert!(matches!(source.plan(10), Err(SourceError::Io { .. })));
    }
}
