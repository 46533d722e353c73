//! Run coordinator: single-flight submission, chunked execution, barrier,
//! aggregate validation and terminal bookkeeping.

use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use survey_map::MappingRuleSet;
use survey_model::{
    AttributeKey, DataPipeline, NewErrorEntry, PipelineId, PipelineRun, RunErrorEntry,
    RunErrorKind, RunId, RunStatus, Value,
};
use survey_validate::{AttributeSchema, BatchTally, ValidationEngine};
use tracing::{debug, error, info, info_span, warn};

use crate::worker::process_chunk;
use crate::{
    BatchSource, ChunkOutcome, EngineConfig, ErrorSink, PipelineError, RetryPolicy,
    RunAccumulator,
};

/// Error sink `source` for entries raised by runs.
const RUN_SOURCE: &str = "pipeline";

/// One accepted record of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRecord {
    /// Position of the record in the submitted batch.
    pub index: usize,
    pub values: BTreeMap<AttributeKey, Value>,
}

/// Everything a run needs, frozen at submission time.
///
/// Rule sets are shared snapshots: registering rules while a run executes does
/// not change what that run sees.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub pipeline_id: PipelineId,
    pub rules: Arc<MappingRuleSet>,
    pub validation: Arc<ValidationEngine>,
    pub schema: Arc<AttributeSchema>,
    /// Empty tally with the keys the threshold rules track.
    pub tally: BatchTally,
    pub chunk_size: usize,
    pub timeout: Option<Duration>,
}

/// Externally visible state of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatusReport {
    pub run_id: RunId,
    pub pipeline_id: PipelineId,
    pub status: RunStatus,
    pub batch_size: usize,
    pub records_processed: usize,
    pub records_failed: usize,
    pub errors_truncated: usize,
    pub metrics: BTreeMap<String, f64>,
    pub error_log: Vec<RunErrorEntry>,
}

impl From<&PipelineRun> for RunStatusReport {
    fn from(run: &PipelineRun) -> Self {
        Self {
            run_id: run.id,
            pipeline_id: run.pipeline_id.clone(),
            status: run.status,
            batch_size: run.batch_size,
            records_processed: run.records_processed,
            records_failed: run.records_failed,
            errors_truncated: run.errors_truncated,
            metrics: run.metrics.clone(),
            error_log: run.error_log.clone(),
        }
    }
}

struct RunSlot {
    run: PipelineRun,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    output: Option<Arc<Vec<MappedRecord>>>,
}

#[derive(Default)]
struct State {
    runs: HashMap<RunId, RunSlot>,
    /// Submission order.
    order: Vec<RunId>,
    /// Pipelines holding the single-flight slot.
    active: HashMap<PipelineId, RunId>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_run<T>(&self, run_id: RunId, f: impl FnOnce(&mut RunSlot) -> T) -> Option<T> {
        self.lock().runs.get_mut(&run_id).map(f)
    }

    /// Marks a run that died without finishing as failed and frees its
    /// pipeline.
    fn abort(&self, run_id: RunId, entry: RunErrorEntry) {
        let mut state = self.lock();
        let Some(slot) = state.runs.get_mut(&run_id) else {
            return;
        };
        let run = &mut slot.run;
        if !run.status.is_terminal() {
            let now = Utc::now();
            if run.status == RunStatus::Pending {
                let _ = run.start(now);
            }
            run.records_failed = run.batch_size.saturating_sub(run.records_processed);
            run.error_log.push(entry);
            let _ = run.fail(now);
        }
        let pipeline_id = run.pipeline_id.clone();
        if state.active.get(&pipeline_id) == Some(&run_id) {
            state.active.remove(&pipeline_id);
        }
    }
}

/// Drives pipeline runs on background threads.
pub struct PipelineRunCoordinator {
    shared: Arc<Shared>,
    pool: Arc<ThreadPool>,
    sink: Arc<ErrorSink>,
    retry: RetryPolicy,
    max_error_entries: usize,
}

impl std::fmt::Debug for PipelineRunCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunCoordinator")
            .field("workers", &self.pool.current_num_threads())
            .field("max_error_entries", &self.max_error_entries)
            .finish()
    }
}

impl PipelineRunCoordinator {
    pub fn new(config: &EngineConfig, sink: Arc<ErrorSink>) -> Result<Self, PipelineError> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("survey-worker-{i}"));
        if let Some(threads) = config.worker_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| PipelineError::Spawn(e.to_string()))?;
        Ok(Self {
            shared: Arc::new(Shared::default()),
            pool: Arc::new(pool),
            sink,
            retry: config.retry.clone(),
            max_error_entries: config.max_error_entries,
        })
    }

    /// Reserves the pipeline's single-flight slot and starts the run.
    ///
    /// The slot is taken before this returns, so a second submit for the same
    /// pipeline fails with `AlreadyRunning` until the first run is terminal.
    pub fn submit(
        &self,
        pipeline: &DataPipeline,
        context: RunContext,
        source: Box<dyn BatchSource>,
    ) -> Result<RunId, PipelineError> {
        if !pipeline.is_active {
            return Err(PipelineError::PipelineInactive(pipeline.id.clone()));
        }
        let run = PipelineRun::new(pipeline.id.clone(), Utc::now());
        let run_id = run.id;
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut state = self.shared.lock();
            if let Some(active) = state.active.get(&pipeline.id) {
                return Err(PipelineError::AlreadyRunning {
                    pipeline_id: pipeline.id.clone(),
                    run_id: *active,
                });
            }
            state.active.insert(pipeline.id.clone(), run_id);
            state.order.push(run_id);
            state.runs.insert(
                run_id,
                RunSlot {
                    run,
                    cancel: Arc::clone(&cancel),
                    handle: None,
                    output: None,
                },
            );
        }
        info!(run_id = %run_id, pipeline_id = %pipeline.id, source = %source.describe(), "run submitted");

        let execution = RunExecution {
            run_id,
            shared: Arc::clone(&self.shared),
            pool: Arc::clone(&self.pool),
            sink: Arc::clone(&self.sink),
            retry: self.retry.clone(),
            max_error_entries: self.max_error_entries,
            cancel,
            context,
        };
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("survey-run-{run_id}"))
            .spawn(move || {
                if catch_unwind(AssertUnwindSafe(|| execution.run(source))).is_err() {
                    error!(run_id = %run_id, "run worker panicked");
                    shared.abort(
                        run_id,
                        RunErrorEntry::new(RunErrorKind::Infrastructure, "run worker panicked"),
                    );
                }
            });
        match spawned {
            Ok(handle) => {
                self.shared.with_run(run_id, |slot| slot.handle = Some(handle));
                Ok(run_id)
            }
            Err(err) => {
                self.shared.abort(
                    run_id,
                    RunErrorEntry::new(RunErrorKind::Infrastructure, err.to_string()),
                );
                Err(PipelineError::Spawn(err.to_string()))
            }
        }
    }

    pub fn status(&self, run_id: RunId) -> Result<PipelineRun, PipelineError> {
        self.shared
            .with_run(run_id, |slot| slot.run.clone())
            .ok_or(PipelineError::RunNotFound(run_id))
    }

    pub fn report(&self, run_id: RunId) -> Result<RunStatusReport, PipelineError> {
        self.status(run_id).map(|run| RunStatusReport::from(&run))
    }

    /// Blocks until the run is terminal and returns its final state.
    pub fn wait(&self, run_id: RunId) -> Result<PipelineRun, PipelineError> {
        let handle = self
            .shared
            .with_run(run_id, |slot| slot.handle.take())
            .ok_or(PipelineError::RunNotFound(run_id))?;
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            self.shared.abort(
                run_id,
                RunErrorEntry::new(RunErrorKind::Infrastructure, "run worker panicked"),
            );
        }
        // A concurrent waiter may hold the handle; poll until terminal.
        loop {
            let run = self.status(run_id)?;
            if run.status.is_terminal() {
                return Ok(run);
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Requests cooperative cancellation; takes effect at the next chunk
    /// boundary. Returns the status at the time of the request.
    pub fn cancel(&self, run_id: RunId) -> Result<RunStatus, PipelineError> {
        self.shared
            .with_run(run_id, |slot| {
                if !slot.run.status.is_terminal() {
                    slot.cancel.store(true, Ordering::SeqCst);
                    info!(run_id = %run_id, "cancellation requested");
                }
                slot.run.status
            })
            .ok_or(PipelineError::RunNotFound(run_id))
    }

    /// Accepted records of a completed run, in batch order.
    pub fn output(&self, run_id: RunId) -> Result<Arc<Vec<MappedRecord>>, PipelineError> {
        self.shared
            .with_run(run_id, |slot| match &slot.output {
                Some(output) => Ok(Arc::clone(output)),
                None => Err(PipelineError::OutputUnavailable {
                    run_id,
                    status: slot.run.status,
                }),
            })
            .ok_or(PipelineError::RunNotFound(run_id))?
    }

    /// Runs of a pipeline in submission order.
    pub fn runs_for(&self, pipeline_id: &PipelineId) -> Vec<PipelineRun> {
        let state = self.shared.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.runs.get(id))
            .filter(|slot| &slot.run.pipeline_id == pipeline_id)
            .map(|slot| slot.run.clone())
            .collect()
    }

    pub fn active_run(&self, pipeline_id: &PipelineId) -> Option<RunId> {
        self.shared.lock().active.get(pipeline_id).copied()
    }
}

struct RunExecution {
    run_id: RunId,
    shared: Arc<Shared>,
    pool: Arc<ThreadPool>,
    sink: Arc<ErrorSink>,
    retry: RetryPolicy,
    max_error_entries: usize,
    cancel: Arc<AtomicBool>,
    context: RunContext,
}

impl RunExecution {
    fn run(self, mut source: Box<dyn BatchSource>) {
        let span = info_span!(
            "run",
            run_id = %self.run_id,
            pipeline_id = %self.context.pipeline_id
        );
        let _enter = span.enter();
        let started = Instant::now();

        let records = match self.retry.run("batch read", || source.read()) {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "batch read failed");
                let mut acc = RunAccumulator::new(self.max_error_entries, self.context.tally.empty_like());
                acc.push(RunErrorEntry::new(RunErrorKind::Infrastructure, err.to_string()));
                self.start(0);
                self.finish(acc, false, started);
                return;
            }
        };
        let batch_size = records.len();
        self.start(batch_size);
        info!(records = batch_size, "run started");

        let context = &self.context;
        let chunk_size = context.chunk_size.max(1);
        let chunks: Vec<(usize, &[_])> = records
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| (i * chunk_size, chunk))
            .collect();
        let wave = self.pool.current_num_threads().max(1);
        let deadline = context.timeout.map(|timeout| started + timeout);

        let mut acc = RunAccumulator::new(self.max_error_entries, context.tally.empty_like());
        let mut stopped = None;
        for group in chunks.chunks(wave) {
            if let Some(kind) = self.stop_reason(deadline) {
                stopped = Some(kind);
                break;
            }
            let outcomes: Vec<ChunkOutcome> = self.pool.install(|| {
                group
                    .par_iter()
                    .map(|(offset, chunk)| process_chunk(context, *offset, chunk))
                    .collect()
            });
            for outcome in outcomes {
                acc.merge(outcome);
            }
            self.publish_progress(&acc);
            debug!(processed = acc.processed, failed = acc.failed, "chunks merged");
        }

        let succeeded = match stopped {
            Some(kind) => {
                acc.skip_remaining(batch_size);
                let message = match kind {
                    RunErrorKind::TimedOut => format!(
                        "run exceeded its timeout; {} records not processed",
                        acc.skipped
                    ),
                    _ => format!("run cancelled; {} records not processed", acc.skipped),
                };
                warn!(skipped = acc.skipped, reason = %kind, "run stopped early");
                acc.push(RunErrorEntry::new(kind, message));
                false
            }
            None => self.validate_aggregate(&mut acc),
        };
        self.finish(acc, succeeded, started);
    }

    fn stop_reason(&self, deadline: Option<Instant>) -> Option<RunErrorKind> {
        if self.cancel.load(Ordering::SeqCst) {
            return Some(RunErrorKind::Cancelled);
        }
        deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
            .then_some(RunErrorKind::TimedOut)
    }

    /// Returns false when an `error` threshold rule is violated.
    fn validate_aggregate(&self, acc: &mut RunAccumulator) -> bool {
        let violations = self
            .context
            .validation
            .validate_aggregate(&self.context.pipeline_id, &acc.tally);
        let mut passed = true;
        for violation in violations {
            if violation.is_error() {
                passed = false;
                let mut entry =
                    RunErrorEntry::new(RunErrorKind::AggregateViolation, violation.message());
                if let Some(rule_id) = violation.rule_id {
                    entry = entry.with_rule(rule_id);
                }
                acc.push(entry);
            } else {
                warn!(message = %violation.message(), "aggregate validation warning");
            }
        }
        passed
    }

    fn start(&self, batch_size: usize) {
        self.shared.with_run(self.run_id, |slot| {
            slot.run.batch_size = batch_size;
            if let Err(err) = slot.run.start(Utc::now()) {
                error!(error = %err, "run could not start");
            }
        });
    }

    fn publish_progress(&self, acc: &RunAccumulator) {
        self.shared.with_run(self.run_id, |slot| {
            slot.run.records_processed = acc.processed;
            slot.run.records_failed = acc.failed;
        });
    }

    /// Writes the error log to the sink, then makes the run terminal and
    /// frees the pipeline.
    ///
    /// A run whose entries could not all be stored fails, whatever its
    /// outcome otherwise.
    fn finish(&self, mut acc: RunAccumulator, succeeded: bool, started: Instant) {
        acc.finish_log();
        let mut parked = 0usize;
        for entry in &mut acc.error_log {
            let (id, write) = self.sink.record_outcome(self.sink_entry(entry));
            entry.error_id = Some(id);
            if !write.is_stored() {
                parked += 1;
            }
        }
        let succeeded = if parked > 0 {
            error!(parked, "error store writes exhausted their retries; failing the run");
            let mut entry = RunErrorEntry::new(
                RunErrorKind::Infrastructure,
                format!("error store unavailable; {parked} run error entries not stored"),
            );
            entry.error_id = Some(self.sink.record(self.sink_entry(&entry)));
            acc.push(entry);
            false
        } else {
            succeeded
        };

        let mut metrics = acc.metrics();
        metrics.insert(
            "duration_ms".to_string(),
            started.elapsed().as_millis() as f64,
        );

        let mut state = self.shared.lock();
        let State { runs, active, .. } = &mut *state;
        let Some(slot) = runs.get_mut(&self.run_id) else {
            return;
        };
        let run = &mut slot.run;
        run.records_processed = acc.processed;
        run.records_failed = acc.failed;
        run.errors_truncated = acc.errors_truncated;
        run.metrics = metrics;
        run.error_log = std::mem::take(&mut acc.error_log);
        let now = Utc::now();
        let transition = if succeeded {
            slot.output = Some(Arc::new(std::mem::take(&mut acc.accepted)));
            run.complete(now)
        } else {
            run.fail(now)
        };
        if let Err(err) = transition {
            error!(error = %err, "run could not reach a terminal status");
        }
        info!(
            status = %run.status,
            processed = run.records_processed,
            failed = run.records_failed,
            "run finished"
        );
        if active.get(&run.pipeline_id) == Some(&self.run_id) {
            active.remove(&run.pipeline_id);
        }
    }

    fn sink_entry(&self, entry: &RunErrorEntry) -> NewErrorEntry {
        let mut new = NewErrorEntry::new(RUN_SOURCE, entry.kind.as_str(), entry.message.clone())
            .with_source_id(self.run_id.to_string())
            .with_context("pipeline_id", self.context.pipeline_id.as_str());
        if let Some(index) = entry.record_index {
            new = new.with_context("record_index", index.to_string());
        }
        if let Some(rule_id) = &entry.rule_id {
            new = new.with_context("rule_id", rule_id.as_str());
        }
        if let Some(attribute) = &entry.attribute {
            new = new.with_context("attribute", attribute.clone());
        }
        new
    }
}
