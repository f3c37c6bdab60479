//! File-backed shuffle store.
//!
//! Layout under the run directory:
//!
//! ```text
//! <root>/<run id>/map-000003/part-0001.bin
//! <root>/<run id>/map-000003/part-0001.run-000000.bin
//! ```
//!
//! A map attempt writes into its own staging directory: spilled runs while
//! it is still reading, and one remainder file per partition at commit.
//! Commit renames the staging directory into place as a whole, so readers
//! only ever see complete commits. Runs are re-merged by the reducer.
//! Every file is a bincode `SpillEnvelope` naming the run, task, attempt, and
//! partition it belongs to; files that disagree with their location are
//! rejected on read.

use super::error::ShuffleError;
use super::store::{check_fanout, check_partition, ShuffleInput, ShuffleStore};
use super::PartitionId;
use crate::aggregate::PartialAggregate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Version identifier of the spill file format
pub const SPILL_FORMAT_VERSION: u32 = 1;

const MAP_DIR_PREFIX: &str = "map-";
const STAGING_SUFFIX: &str = ".staging";

/// One partition's worth of one map task, as stored on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillEnvelope {
    pub version: u32,
    pub run_id: Uuid,
    pub map_task: usize,
    pub attempt: u32,
    pub partition: PartitionId,
    pub written_at: DateTime<Utc>,
    pub aggregate: PartialAggregate,
}

impl SpillEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ShuffleError> {
        bincode::serialize(self).map_err(|e| ShuffleError::SerializationFailed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShuffleError> {
        let envelope: Self = bincode::deserialize(bytes)
            .map_err(|e| ShuffleError::DeserializationFailed(e.to_string()))?;
        if envelope.version != SPILL_FORMAT_VERSION {
            return Err(ShuffleError::UnsupportedVersion {
                found: envelope.version,
                supported: SPILL_FORMAT_VERSION,
            });
        }
        Ok(envelope)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ShuffleError + '_ {
    move |source| ShuffleError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn part_file(dir: &Path, partition: PartitionId) -> PathBuf {
    dir.join(format!("part-{partition:04}.bin"))
}

fn run_file(dir: &Path, partition: PartitionId, run: u32) -> PathBuf {
    dir.join(format!("part-{partition:04}.run-{run:06}.bin"))
}

/// Runs spilled by one map attempt into its staging directory.
///
/// Nothing here is visible to reducers until the attempt commits. Runs of an
/// attempt that never commits go away with the run directory.
#[derive(Debug)]
pub struct SpillRuns {
    run_id: Uuid,
    staging: PathBuf,
    map_task: usize,
    attempt: u32,
    written: u32,
}

impl SpillRuns {
    /// Write every non-empty buffer as one run file and empty it.
    pub fn write(&mut self, buffers: &mut [PartialAggregate]) -> Result<(), ShuffleError> {
        fs::create_dir_all(&self.staging).map_err(io_error(&self.staging))?;
        let written_at = Utc::now();
        for (partition, buffer) in buffers.iter_mut().enumerate() {
            if buffer.is_empty() {
                continue;
            }
            let envelope = SpillEnvelope {
                version: SPILL_FORMAT_VERSION,
                run_id: self.run_id,
                map_task: self.map_task,
                attempt: self.attempt,
                partition,
                written_at,
                aggregate: std::mem::take(buffer),
            };
            let path = run_file(&self.staging, partition, self.written);
            fs::write(&path, envelope.to_bytes()?).map_err(io_error(&path))?;
        }
        self.written += 1;
        Ok(())
    }

    /// Number of runs written so far.
    pub fn written(&self) -> u32 {
        self.written
    }
}

/// Shuffle store spilling every committed output to disk.
pub struct SpillShuffle {
    run_id: Uuid,
    dir: PathBuf,
    partitions: usize,
    commit_lock: Mutex<()>,
}

impl SpillShuffle {
    /// Create `<root>/<run_id>` and use it for this run.
    pub fn create(root: impl AsRef<Path>, run_id: Uuid, partitions: usize) -> Result<Self, ShuffleError> {
        let dir = root.as_ref().join(run_id.to_string());
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        Ok(Self {
            run_id,
            dir,
            partitions,
            commit_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn task_dir(&self, map_task: usize) -> PathBuf {
        self.dir.join(format!("{MAP_DIR_PREFIX}{map_task:06}"))
    }

    fn staging_dir(&self, map_task: usize, attempt: u32) -> PathBuf {
        self.dir
            .join(format!("{MAP_DIR_PREFIX}{map_task:06}.{attempt}{STAGING_SUFFIX}"))
    }

    /// The remainder file and every run a committed task left for `partition`.
    fn partition_files(&self, map_task: usize, partition: PartitionId) -> Result<Vec<PathBuf>, ShuffleError> {
        let dir = self.task_dir(map_task);
        let prefix = format!("part-{partition:04}.");
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_error(&dir))? {
            let entry = entry.map_err(io_error(&dir))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && name.ends_with(".bin") {
                files.push(entry.path());
            }
        }
        if files.is_empty() {
            return Err(ShuffleError::ValidationFailed(format!(
                "{} holds nothing for partition {partition}",
                dir.display()
            )));
        }
        files.sort();
        Ok(files)
    }

    fn committed_tasks(&self) -> Result<Vec<usize>, ShuffleError> {
        let mut tasks = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_error(&self.dir))? {
            let entry = entry.map_err(io_error(&self.dir))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(STAGING_SUFFIX) {
                continue;
            }
            if let Some(index) = name
                .strip_prefix(MAP_DIR_PREFIX)
                .and_then(|digits| digits.parse::<usize>().ok())
            {
                tasks.push(index);
            }
        }
        tasks.sort_unstable();
        Ok(tasks)
    }

    fn read_envelope(&self, path: &Path, map_task: usize, partition: PartitionId) -> Result<SpillEnvelope, ShuffleError> {
        let bytes = fs::read(path).map_err(io_error(path))?;
        let envelope = SpillEnvelope::from_bytes(&bytes)?;
        if envelope.run_id != self.run_id
            || envelope.map_task != map_task
            || envelope.partition != partition
        {
            return Err(ShuffleError::ValidationFailed(format!(
                "{} holds run {} map {} partition {}",
                path.display(),
                envelope.run_id,
                envelope.map_task,
                envelope.partition
            )));
        }
        Ok(envelope)
    }
}

impl ShuffleStore for SpillShuffle {
    fn partition_count(&self) -> usize {
        self.partitions
    }

    fn commit(
        &self,
        map_task: usize,
        attempt: u32,
        outputs: Vec<PartialAggregate>,
    ) -> Result<bool, ShuffleError> {
        check_fanout(map_task, self.partitions, &outputs)?;
        let _guard = self.commit_lock.lock().map_err(|_| ShuffleError::Poisoned)?;

        let target = self.task_dir(map_task);
        if target.exists() {
            return Ok(false);
        }

        // Runs the attempt spilled earlier are already in its staging directory.
        let staging = self.staging_dir(map_task, attempt);
        fs::create_dir_all(&staging).map_err(io_error(&staging))?;

        let written_at = Utc::now();
        for (partition, aggregate) in outputs.into_iter().enumerate() {
            let envelope = SpillEnvelope {
                version: SPILL_FORMAT_VERSION,
                run_id: self.run_id,
                map_task,
                attempt,
                partition,
                written_at,
                aggregate,
            };
            let path = part_file(&staging, partition);
            fs::write(&path, envelope.to_bytes()?).map_err(io_error(&path))?;
        }

        fs::rename(&staging, &target).map_err(io_error(&target))?;
        Ok(true)
    }

    fn is_committed(&self, map_task: usize) -> Result<bool, ShuffleError> {
        Ok(self.task_dir(map_task).exists())
    }

    fn fetch(&self, partition: PartitionId) -> Result<Vec<ShuffleInput>, ShuffleError> {
        check_partition(partition, self.partitions)?;
        let mut inputs = Vec::new();
        for map_task in self.committed_tasks()? {
            for path in self.partition_files(map_task, partition)? {
                let envelope = self.read_envelope(&path, map_task, partition)?;
                inputs.push(ShuffleInput {
                    map_task,
                    attempt: envelope.attempt,
                    aggregate: envelope.aggregate,
                });
            }
        }
        Ok(inputs)
    }

    fn spill_runs(&self, map_task: usize, attempt: u32) -> Result<Option<SpillRuns>, ShuffleError> {
        Ok(Some(SpillRuns {
            run_id: self.run_id,
            staging: self.staging_dir(map_task, attempt),
            map_task,
            attempt,
            written: 0,
        }))
    }

    fn cleanup(&self) -> Result<(), ShuffleError> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(value: i64) -> Vec<PartialAggregate> {
        vec![
            PartialAggregate::singleton("URL", "/", value),
            PartialAggregate::singleton("User", "11", value),
        ]
    }

    #[test]
    fn committed_outputs_are_read_back() {
        let root = tempfile::tempdir().unwrap();
        let store = SpillShuffle::create(root.path(), Uuid::new_v4(), 2).unwrap();

        assert!(store.commit(1, 2, outputs(4)).unwrap());
        assert!(store.commit(0, 1, outputs(1)).unwrap());

        let inputs = store.fetch(1).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].map_task, 0);
        assert_eq!(inputs[1].attempt, 2);
        assert_eq!(inputs[1].aggregate.get("User", "11"), Some(4));
    }

    #[test]
    fn second_commit_for_same_task_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let store = SpillShuffle::create(root.path(), Uuid::new_v4(), 2).unwrap();

        assert!(store.commit(0, 1, outputs(1)).unwrap());
        assert!(!store.commit(0, 2, outputs(9)).unwrap());
        assert_eq!(store.fetch(0).unwrap()[0].aggregate.get("URL", "/"), Some(1));
    }

    #[test]
    fn leftover_staging_directories_are_invisible() {
        let root = tempfile::tempdir().unwrap();
        let store = SpillShuffle::create(root.path(), Uuid::new_v4(), 2).unwrap();
        fs::create_dir_all(store.dir().join("map-000007.1.staging")).unwrap();

        assert!(store.fetch(0).unwrap().is_empty());
        assert!(!store.is_committed(7).unwrap());
    }

    #[test]
    fn envelope_from_another_run_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let store = SpillShuffle::create(root.path(), run_id, 2).unwrap();
        store.commit(0, 1, outputs(1)).unwrap();

        let foreign = SpillEnvelope {
            version: SPILL_FORMAT_VERSION,
            run_id: Uuid::new_v4(),
            map_task: 0,
            attempt: 1,
            partition: 0,
            written_at: Utc::now(),
            aggregate: PartialAggregate::new(),
        };
        let path = store.dir().join("map-000000").join("part-0000.bin");
        fs::write(&path, foreign.to_bytes().unwrap()).unwrap();

        assert!(matches!(store.fetch(0), Err(ShuffleError::ValidationFailed(_))));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let envelope = SpillEnvelope {
            version: SPILL_FORMAT_VERSION + 1,
            run_id: Uuid::new_v4(),
            map_task: 0,
            attempt: 1,
            partition: 0,
            written_at: Utc::now(),
            aggregate: PartialAggregate::new(),
        };
        let bytes = envelope.to_bytes().unwrap();
        assert!(matches!(
            SpillEnvelope::from_bytes(&bytes),
            Err(ShuffleError::UnsupportedVersion { found: 2, supported: 1 })
        ));
    }

    #[test]
    fn spilled_runs_become_visible_only_on_commit() {
        let root = tempfile::tempdir().unwrap();
        let store = SpillShuffle::create(root.path(), Uuid::new_v4(), 2).unwrap();
        let mut runs = store.spill_runs(0, 1).unwrap().unwrap();

        let mut buffers = outputs(2);
        runs.write(&mut buffers).unwrap();
        assert!(buffers.iter().all(PartialAggregate::is_empty));
        runs.write(&mut [PartialAggregate::new(), PartialAggregate::singleton("User", "14", 1)])
            .unwrap();
        assert_eq!(runs.written(), 2);
        assert!(store.fetch(1).unwrap().is_empty(), "runs are staged until commit");

        assert!(store.commit(0, 1, outputs(1)).unwrap());
        let inputs = store.fetch(1).unwrap();
        assert_eq!(inputs.len(), 3);
        let merged = crate::aggregate::MergeOperator::sum()
            .merge_all(inputs.into_iter().map(|input| input.aggregate));
        assert_eq!(merged.get("User", "11"), Some(3));
        assert_eq!(merged.get("User", "14"), Some(1));
        assert_eq!(store.fetch(0).unwrap().len(), 2);
    }

    #[test]
    fn runs_of_an_uncommitted_attempt_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        let store = SpillShuffle::create(root.path(), Uuid::new_v4(), 2).unwrap();
        let mut stale = store.spill_runs(0, 1).unwrap().unwrap();
        stale.write(&mut outputs(100)).unwrap();

        assert!(store.commit(0, 2, outputs(1)).unwrap());
        let inputs = store.fetch(0).unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].attempt, 2);
        assert_eq!(inputs[0].aggregate.get("URL", "/"), Some(1));
    }

    #[test]
    fn cleanup_removes_run_directory() {
        let root = tempfile::tempdir().unwrap();
        let store = SpillShuffle::create(root.path(), Uuid::new_v4(), 2).unwrap();
        store.commit(0, 1, outputs(1)).unwrap();
        store.cleanup().unwrap();
        assert!(!store.dir().exists());
    }
}
