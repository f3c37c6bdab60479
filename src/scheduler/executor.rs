//! Runs a job on a local pool of worker threads.
//!
//! The calling thread owns the `Coordinator` and is the only place that
//! changes scheduling state. Workers receive assignments over one crossbeam
//! channel and send their outcome back over another; besides the channels
//! they share nothing but read-only job context and the shuffle store.
//!
//! Publishing an attempt's effects (committing map output, writing a
//! partition to the sink) also happens on the calling thread, and only for
//! the attempt the coordinator still considers current. A timed-out or
//! superseded attempt may finish its work, but its result is dropped.

use super::coordinator::{Applied, Assignment, Coordinator, TaskEvent};
use super::job::{JobFailure, JobReport, JobState};
use super::policy::RetryPolicy;
use super::task::{CancelToken, TaskId, TaskKind};
use crate::aggregate::{ContractCheck, FinalAggregate, MergeOperator, PartialAggregate};
use crate::combiner::{CombinerStats, LocalCombiner};
use crate::config::constants::POLL_INTERVAL_MS;
use crate::config::{CombinerConfig, JobSpec};
use crate::core::State;
use crate::error::{JobError, TaskExecutionError};
use crate::mapper::Initializer;
use crate::reducer::Reducer;
use crate::registry::FunctionRegistry;
use crate::shuffle::{
    build_partitioner, MemoryShuffle, Partitioner, ShuffleStore, ShuffleWriter, SpillShuffle,
};
use crate::sink::OutputSink;
use crate::source::{RecordSource, SourceSlice};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

/// Where inside an attempt a fault may be injected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Before the attempt does any work
    Start,
    /// After the n-th record of a map attempt was read (1-based)
    Record(u64),
    /// After the attempt's work is done, before it reports
    Finish,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Fail the attempt with a worker error
    Fail(String),
    /// Panic inside the attempt
    Panic(String),
    /// Hang until the attempt is cancelled
    Stall,
}

/// Hook for failure testing.
pub trait FaultInjector: Send + Sync {
    fn inject(&self, task: TaskId, attempt: u32, point: FaultPoint) -> Option<Fault>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn inject(&self, _task: TaskId, _attempt: u32, _point: FaultPoint) -> Option<Fault> {
        None
    }
}

/// Faults scripted per task, attempt and point.
///
/// ```rust
/// use foldwise::scheduler::{Fault, FaultInjector, FaultPoint, ScriptedFaults, TaskId};
///
/// let faults = ScriptedFaults::new().at(TaskId::map(0), 1, FaultPoint::Start, Fault::Fail("disk".into()));
/// assert!(faults.inject(TaskId::map(0), 1, FaultPoint::Start).is_some());
/// assert!(faults.inject(TaskId::map(0), 2, FaultPoint::Start).is_none());
/// ```
#[derive(Clone, Debug, Default)]
pub struct ScriptedFaults {
    faults: HashMap<(TaskId, u32, FaultPoint), Fault>,
}

impl ScriptedFaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, task: TaskId, attempt: u32, point: FaultPoint, fault: Fault) -> Self {
        self.faults.insert((task, attempt, point), fault);
        self
    }

    /// Script the same fault for attempts `1..=attempts`.
    pub fn every_attempt(mut self, task: TaskId, attempts: u32, point: FaultPoint, fault: Fault) -> Self {
        for attempt in 1..=attempts {
            self.faults.insert((task, attempt, point), fault.clone());
        }
        self
    }
}

impl FaultInjector for ScriptedFaults {
    fn inject(&self, task: TaskId, attempt: u32, point: FaultPoint) -> Option<Fault> {
        self.faults.get(&(task, attempt, point)).cloned()
    }
}

struct WorkItem {
    assignment: Assignment,
    cancel: CancelToken,
}

struct MapOutput {
    partitions: Vec<PartialAggregate>,
    records: u64,
    skipped: u64,
    combiner: CombinerStats,
}

enum TaskOutput {
    Map(MapOutput),
    Reduce(FinalAggregate),
}

struct WorkerReport {
    assignment: Assignment,
    result: Result<TaskOutput, TaskExecutionError>,
}

/// Read-only context every worker runs attempts against.
struct WorkerContext {
    source: Arc<dyn RecordSource>,
    slices: Vec<SourceSlice>,
    initializer: Initializer,
    op: MergeOperator,
    partitioner: Box<dyn Partitioner>,
    combiner: CombinerConfig,
    reducer: Reducer,
    store: Arc<dyn ShuffleStore>,
    faults: Arc<dyn FaultInjector>,
    poll: Duration,
}

impl WorkerContext {
    fn serve(&self, work: Receiver<WorkItem>, reports: Sender<WorkerReport>) {
        for item in work.iter() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.execute(item.assignment, &item.cancel)
            }))
            .unwrap_or_else(|payload| Err(TaskExecutionError::Panicked(panic_message(payload.as_ref()))));

            let report = WorkerReport {
                assignment: item.assignment,
                result,
            };
            if reports.send(report).is_err() {
                break;
            }
        }
    }

    fn execute(&self, assignment: Assignment, cancel: &CancelToken) -> Result<TaskOutput, TaskExecutionError> {
        self.trip(assignment, FaultPoint::Start, cancel)?;
        let output = match assignment.task.kind {
            TaskKind::Map => TaskOutput::Map(self.run_map(assignment, cancel)?),
            TaskKind::Reduce => TaskOutput::Reduce(self.run_reduce(assignment, cancel)?),
        };
        self.trip(assignment, FaultPoint::Finish, cancel)?;
        Ok(output)
    }

    fn trip(&self, assignment: Assignment, point: FaultPoint, cancel: &CancelToken) -> Result<(), TaskExecutionError> {
        match self.faults.inject(assignment.task, assignment.attempt, point) {
            None => Ok(()),
            Some(Fault::Fail(message)) => Err(TaskExecutionError::Worker(message)),
            Some(Fault::Panic(message)) => panic!("{message}"),
            Some(Fault::Stall) => {
                cancel.wait(self.poll);
                Err(TaskExecutionError::Cancelled)
            }
        }
    }

    fn run_map(&self, assignment: Assignment, cancel: &CancelToken) -> Result<MapOutput, TaskExecutionError> {
        let Assignment { task, attempt } = assignment;
        let slice = self
            .slices
            .get(task.index)
            .ok_or_else(|| TaskExecutionError::Worker(format!("no source slice for {task}")))?;
        let mut stream = self
            .source
            .open(slice)
            .map_err(|e| TaskExecutionError::Source(e.to_string()))?;

        let mut combiner = LocalCombiner::new(self.op.clone(), self.combiner.clone());
        let mut writer = ShuffleWriter::new(self.partitioner.as_ref(), &self.op);
        if let Some(runs) = self
            .store
            .spill_runs(task.index, attempt)
            .map_err(|e| TaskExecutionError::Shuffle(e.to_string()))?
        {
            writer = writer.with_runs(runs, self.combiner.max_buffered_keys);
        }
        let mut records = 0u64;
        let mut skipped = 0u64;

        while let Some(next) = stream.next() {
            cancel.check()?;
            let record = next.map_err(|e| TaskExecutionError::Source(e.to_string()))?;
            records += 1;
            self.trip(assignment, FaultPoint::Record(records), cancel)?;

            match self.initializer.apply(&record) {
                Ok(partial) => combiner.accumulate(partial),
                Err(error) => {
                    skipped += 1;
                    debug!(%task, attempt, record = slice.start + records - 1, %error, "skipping malformed record");
                }
            }
            if combiner.should_flush() {
                writer
                    .spill(combiner.flush())
                    .map_err(|e| TaskExecutionError::Shuffle(e.to_string()))?;
            }
        }
        writer
            .spill(combiner.flush())
            .map_err(|e| TaskExecutionError::Shuffle(e.to_string()))?;

        let stats = CombinerStats {
            peak_shuffle_keys: writer.peak_resident(),
            runs_spilled: u64::from(writer.runs_written()),
            ..combiner.stats()
        };
        debug!(
            %task,
            attempt,
            records,
            skipped,
            spills = writer.spills(),
            runs = stats.runs_spilled,
            keys = writer.buffered_keys(),
            "map attempt finished"
        );
        Ok(MapOutput {
            partitions: writer.finish(),
            records,
            skipped,
            combiner: stats,
        })
    }

    fn run_reduce(&self, assignment: Assignment, cancel: &CancelToken) -> Result<FinalAggregate, TaskExecutionError> {
        let partition = assignment.task.index;
        let inputs = self
            .store
            .fetch(partition)
            .map_err(|e| TaskExecutionError::Shuffle(e.to_string()))?;
        debug!(task = %assignment.task, attempt = assignment.attempt, inputs = inputs.len(), "reducing partition");
        self.reducer.reduce_inputs(inputs, cancel)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Scheduling state of one run, owned by the calling thread.
struct JobRun<'a> {
    spec: &'a JobSpec,
    op: &'a MergeOperator,
    store: &'a dyn ShuffleStore,
    sink: &'a dyn OutputSink,
    job_cancel: &'a CancelToken,
    coordinator: Coordinator,
    in_flight: HashMap<Assignment, CancelToken>,
    busy: usize,
    samples: Vec<PartialAggregate>,
    contract_checked: bool,
    combiner: CombinerStats,
}

impl JobRun<'_> {
    fn drive(
        &mut self,
        work: &Sender<WorkItem>,
        reports: &Receiver<WorkerReport>,
        poll: Duration,
    ) -> Result<(), JobError> {
        loop {
            if self.job_cancel.is_cancelled() && !self.coordinator.is_finished() {
                warn!("job cancelled by caller");
                self.coordinator.abort(JobFailure::Aborted {
                    reason: "cancelled by caller".to_string(),
                })?;
            }
            if self.coordinator.is_finished() {
                return Ok(());
            }

            while self.busy < self.spec.workers {
                let Some(assignment) = self.coordinator.next_assignment(Instant::now())? else {
                    break;
                };
                let cancel = CancelToken::new();
                work.send(WorkItem {
                    assignment,
                    cancel: cancel.clone(),
                })
                .map_err(|_| JobError::WorkerPool("work queue closed".to_string()))?;
                self.in_flight.insert(assignment, cancel);
                self.busy += 1;
            }

            match reports.recv_timeout(poll) {
                Ok(report) => {
                    self.busy = self.busy.saturating_sub(1);
                    self.in_flight.remove(&report.assignment);
                    self.handle(report)?;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(JobError::WorkerPool("every worker exited".to_string()));
                }
            }

            for expired in self.coordinator.expire(Instant::now())? {
                if let Some(token) = self.in_flight.get(&expired) {
                    token.cancel();
                }
            }
        }
    }

    fn handle(&mut self, report: WorkerReport) -> Result<(), JobError> {
        let WorkerReport { assignment, result } = report;
        let Assignment { task, attempt } = assignment;
        if !self.coordinator.is_current(task, attempt) {
            debug!(%task, attempt, "discarding result of stale attempt");
            return Ok(());
        }

        let event = match result {
            Ok(TaskOutput::Map(output)) => self.publish_map(assignment, output),
            Ok(TaskOutput::Reduce(aggregate)) => self.publish_reduce(assignment, aggregate),
            Err(error) => TaskEvent::Failed { task, attempt, error },
        };

        if self.coordinator.apply(event)? == Applied::Accepted && task.is_map() {
            self.check_contract()?;
        }
        Ok(())
    }

    fn publish_map(&mut self, assignment: Assignment, output: MapOutput) -> TaskEvent {
        let Assignment { task, attempt } = assignment;
        let MapOutput {
            partitions,
            records,
            skipped,
            combiner,
        } = output;

        let wanted = self.spec.contract_samples.saturating_sub(self.samples.len());
        let sample: Vec<PartialAggregate> = if self.contract_checked {
            Vec::new()
        } else {
            partitions.iter().filter(|p| !p.is_empty()).take(wanted).cloned().collect()
        };

        match self.store.commit(task.index, attempt, partitions) {
            Ok(committed) => {
                if !committed {
                    debug!(%task, attempt, "map output already committed");
                }
                self.samples.extend(sample);
                self.combiner.absorb(combiner);
                if skipped > 0 {
                    warn!(%task, attempt, skipped, "skipped malformed records");
                }
                TaskEvent::Completed {
                    task,
                    attempt,
                    records,
                    skipped,
                }
            }
            Err(e) => TaskEvent::Failed {
                task,
                attempt,
                error: TaskExecutionError::Shuffle(e.to_string()),
            },
        }
    }

    fn publish_reduce(&mut self, assignment: Assignment, aggregate: FinalAggregate) -> TaskEvent {
        let Assignment { task, attempt } = assignment;
        match self.sink.write(task.index, &aggregate) {
            Ok(()) => {
                info!(partition = task.index, keys = aggregate.as_partial().key_count(), "partition written");
                TaskEvent::Completed {
                    task,
                    attempt,
                    records: 0,
                    skipped: 0,
                }
            }
            Err(e) => TaskEvent::Failed {
                task,
                attempt,
                error: TaskExecutionError::Sink(e.to_string()),
            },
        }
    }

    /// Verify the merge contract once enough real map output was sampled,
    /// or once the map phase is over, whichever comes first.
    fn check_contract(&mut self) -> Result<(), JobError> {
        if self.contract_checked {
            return Ok(());
        }
        let maps_done = self.coordinator.state() != &JobState::MapRunning;
        if self.samples.len() < self.spec.contract_samples && !maps_done {
            return Ok(());
        }
        self.contract_checked = true;
        let samples = std::mem::take(&mut self.samples);

        match ContractCheck::new(self.op).verify(&samples) {
            Ok(()) => {
                debug!(samples = samples.len(), "merge contract holds on sampled map output");
                Ok(())
            }
            Err(violation) => {
                error!(merge_fn = %violation.merge_fn, violations = violation.violations.len(), "merge contract violated");
                self.coordinator.abort(JobFailure::ContractViolation(violation))?;
                Ok(())
            }
        }
    }

    fn cancel_in_flight(&self) {
        for token in self.in_flight.values() {
            token.cancel();
        }
    }
}

/// Runs jobs on worker threads of the current process.
///
/// ```rust,no_run
/// use foldwise::config::JobSpec;
/// use foldwise::core::State;
/// use foldwise::registry::FunctionRegistry;
/// use foldwise::scheduler::LocalExecutor;
///
/// let spec = JobSpec::from_file("job.json")?;
/// let report = LocalExecutor::new(FunctionRegistry::with_builtins()).run(&spec)?;
/// println!("{}", report.status.name());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct LocalExecutor {
    registry: FunctionRegistry,
    faults: Arc<dyn FaultInjector>,
    cancel: CancelToken,
    poll_interval: Duration,
}

impl LocalExecutor {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            registry,
            faults: Arc::new(NoFaults),
            cancel: CancelToken::new(),
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
        }
    }

    pub fn with_faults(mut self, faults: impl FaultInjector + 'static) -> Self {
        self.faults = Arc::new(faults);
        self
    }

    /// How often the coordinator wakes up to check deadlines and cancellation.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Cancelling this token aborts the running job at the next poll.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Run a job against the source and sink its spec describes.
    pub fn run(&self, spec: &JobSpec) -> Result<JobReport, JobError> {
        let source = spec.source.open();
        let sink = spec.sink.open()?;
        self.run_with(spec, source, sink)
    }

    /// Run a job against an explicit source and sink.
    ///
    /// Returns `Err` only when the job could not be set up or the worker
    /// pool broke down; a job that ran and failed returns a report whose
    /// status is `Failed`.
    pub fn run_with(
        &self,
        spec: &JobSpec,
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<JobReport, JobError> {
        spec.validate()?;
        let initializer = self.registry.init(&spec.init_fn)?;
        let op = self.registry.merge(&spec.merge_fn)?;

        let run_id = Uuid::new_v4();
        let span = info_span!("job", %run_id);
        let _entered = span.enter();

        let slices = source.plan(spec.slice_size)?;
        let partitioner = build_partitioner(&spec.partitioner, spec.partition_count);
        let partitions = partitioner.partition_count();
        let store: Arc<dyn ShuffleStore> = match &spec.spill_dir {
            Some(dir) => Arc::new(SpillShuffle::create(dir, run_id, partitions)?),
            None => Arc::new(MemoryShuffle::new(partitions)),
        };

        info!(
            init_fn = %spec.init_fn,
            merge_fn = %spec.merge_fn,
            map_tasks = slices.len(),
            partitions,
            workers = spec.workers,
            spill = spec.spill_dir.is_some(),
            "job submitted"
        );

        let mut run = JobRun {
            spec,
            op: &op,
            store: store.as_ref(),
            sink: sink.as_ref(),
            job_cancel: &self.cancel,
            coordinator: Coordinator::new(run_id, slices.len(), partitions, RetryPolicy::from_spec(spec)),
            in_flight: HashMap::new(),
            busy: 0,
            samples: Vec::new(),
            contract_checked: spec.contract_samples == 0,
            combiner: CombinerStats::default(),
        };

        // The leaf check needs no data, so a broken merge never runs a task.
        if let Err(violation) = ContractCheck::new(&op).verify(&[]) {
            error!(merge_fn = %violation.merge_fn, "merge contract violated before start");
            run.coordinator.start()?;
            run.coordinator.abort(JobFailure::ContractViolation(violation))?;
            return Ok(self.finish(&run, store.as_ref()));
        }
        run.coordinator.start()?;

        let context = WorkerContext {
            source,
            slices,
            initializer,
            op: op.clone(),
            partitioner,
            combiner: spec.combiner.clone(),
            reducer: Reducer::new(op.clone()),
            store: Arc::clone(&store),
            faults: Arc::clone(&self.faults),
            poll: self.poll_interval,
        };

        let driven = std::thread::scope(|scope| -> Result<(), JobError> {
            let (work_tx, work_rx) = unbounded::<WorkItem>();
            let (report_tx, report_rx) = unbounded::<WorkerReport>();

            for worker in 0..spec.workers {
                let work = work_rx.clone();
                let reports = report_tx.clone();
                let context = &context;
                std::thread::Builder::new()
                    .name(format!("foldwise-worker-{worker}"))
                    .spawn_scoped(scope, move || context.serve(work, reports))
                    .map_err(|e| JobError::WorkerPool(e.to_string()))?;
            }
            drop(report_tx);

            let driven = run.drive(&work_tx, &report_rx, self.poll_interval);
            run.cancel_in_flight();
            drop(work_tx);
            driven
        });

        let report = self.finish(&run, store.as_ref());
        driven?;
        Ok(report)
    }

    fn finish(&self, run: &JobRun<'_>, store: &dyn ShuffleStore) -> JobReport {
        if let Err(e) = store.cleanup() {
            warn!(error = %e, "could not clean up shuffle store");
        }
        let report = run.coordinator.report(run.combiner);
        info!(
            status = report.status.name(),
            records = report.records_read,
            skipped = report.skipped_records,
            failed_task = ?report.failed_task,
            "job finished"
        );
        report
    }
}

impl std::fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("registry", &self.registry)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SinkDescriptor, SourceDescriptor};
    use crate::sink::MemorySink;
    use crate::source::MemorySource;

    const LOG: [&str; 6] = [
        "20130512020202,/,11",
        "20130512020412,/,23",
        "20130512030143,/post/clojure,11",
        "20130512040256,/post/datomic,23",
        "20130512050910,/post/clojure,11",
        "20130512051012,/post/clojure,14",
    ];

    fn spec(slice_size: usize, partitions: usize) -> JobSpec {
        JobSpec::builder()
            .init_fn("access_log")
            .merge_fn("sum")
            .source(SourceDescriptor::Inline {
                lines: vec![],
                delimiter: ',',
            })
            .sink(SinkDescriptor::Stdout)
            .slice_size(slice_size)
            .partition_count(partitions)
            .workers(2)
            .retry_limit(2)
            .task_timeout(Duration::from_secs(10))
            .build()
            .unwrap()
    }

    fn run(executor: &LocalExecutor, spec: &JobSpec) -> (JobReport, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let source = Arc::new(MemorySource::from_lines(LOG, ','));
        let report = executor.run_with(spec, source, sink.clone()).unwrap();
        (report, sink)
    }

    fn executor() -> LocalExecutor {
        LocalExecutor::new(FunctionRegistry::with_builtins()).with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn counts_the_access_log() {
        let (report, sink) = run(&executor(), &spec(2, 3));
        assert!(report.succeeded(), "{:?}", report.failure);
        assert_eq!(report.map_tasks, 3);
        assert_eq!(report.records_read, 6);
        assert_eq!(sink.partitions().len(), 3);

        let all = FinalAggregate::union(sink.partitions().into_values(), &MergeOperator::sum());
        assert_eq!(all.get("URL", "/post/clojure"), Some(3));
        assert_eq!(all.get("User", "11"), Some(3));
        assert_eq!(all.get("Day", "20130512"), Some(6));
    }

    #[test]
    fn worker_panic_is_retried() {
        let executor = executor().with_faults(ScriptedFaults::new().at(
            TaskId::map(1),
            1,
            FaultPoint::Record(1),
            Fault::Panic("initializer blew up".into()),
        ));
        let (report, sink) = run(&executor, &spec(2, 2));

        assert!(report.succeeded());
        let task = report.task(TaskId::map(1)).unwrap();
        assert_eq!(task.attempts, 2);
        assert!(task.history.transitions().iter().any(|t| t
            .reason
            .as_deref()
            .is_some_and(|r| r.contains("initializer blew up"))));
        let all = FinalAggregate::union(sink.partitions().into_values(), &MergeOperator::sum());
        assert_eq!(all.get("Day", "20130512"), Some(6));
    }

    #[test]
    fn unknown_function_is_a_setup_error() {
        let mut bad = spec(2, 2);
        bad.merge_fn = "median".into();
        let sink = Arc::new(MemorySink::new());
        let result = executor().run_with(&bad, Arc::new(MemorySource::default()), sink);
        assert!(matches!(result, Err(JobError::UnknownFunction { kind: "merge", .. })));
    }

    #[test]
    fn cancelled_job_fails_without_output() {
        let executor = executor().with_faults(
            ScriptedFaults::new().every_attempt(TaskId::map(0), 3, FaultPoint::Start, Fault::Stall),
        );
        executor.cancel_token().cancel();
        let (report, sink) = run(&executor, &spec(2, 2));

        assert_eq!(report.status, JobState::Failed);
        assert!(matches!(report.failure, Some(JobFailure::Aborted { .. })));
        assert!(sink.partitions().is_empty());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
