mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use common::{engine, fast_retry, key, pipeline_id, populate, respondent, test_config};
use survey_model::{
    ErrorEntry, ErrorId, MappingRule, NewErrorEntry, RuleId, RunErrorKind, RunStatus,
};
use survey_pipeline::{
    Engine, EngineError, ErrorQuery, ErrorSink, ErrorStore, InMemoryErrorStore, PipelineError,
    SinkWrite, StoreError,
};

/// Delegates to an in-memory store unless `down` is set.
struct SwitchableStore {
    inner: Arc<Mutex<InMemoryErrorStore>>,
    down: Arc<AtomicBool>,
}

impl SwitchableStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("database offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl ErrorStore for SwitchableStore {
    fn write(&mut self, entry: &ErrorEntry) -> Result<(), StoreError> {
        self.check()?;
        self.inner.lock().unwrap().write(entry)
    }

    fn mark_resolved(&mut self, id: ErrorId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.lock().unwrap().mark_resolved(id, at)
    }

    fn get(&self, id: ErrorId) -> Result<Option<ErrorEntry>, StoreError> {
        self.check()?;
        self.inner.lock().unwrap().get(id)
    }

    fn entries(&self) -> Result<Vec<ErrorEntry>, StoreError> {
        self.check()?;
        self.inner.lock().unwrap().entries()
    }
}

type Offline = (ErrorSink, Arc<Mutex<InMemoryErrorStore>>, Arc<AtomicBool>);

/// A sink over a store that starts out down.
fn offline_sink(attempts: u32) -> Offline {
    let inner = Arc::new(Mutex::new(InMemoryErrorStore::new()));
    let down = Arc::new(AtomicBool::new(true));
    let sink = ErrorSink::new(
        Box::new(SwitchableStore {
            inner: Arc::clone(&inner),
            down: Arc::clone(&down),
        }),
        fast_retry(attempts),
    );
    (sink, inner, down)
}

#[test]
fn unavailable_store_parks_entries_until_flush() {
    let (sink, inner, down) = offline_sink(3);

    let (id, write) =
        sink.record_outcome(NewErrorEntry::new("pipeline", "infrastructure", "disk full"));
    assert_eq!(write, SinkWrite::Parked);
    assert_eq!(sink.pending_len(), 1);
    // Parked entries stay visible.
    assert_eq!(sink.get(id).map(|entry| entry.message), Some("disk full".to_string()));

    down.store(false, Ordering::SeqCst);
    assert_eq!(sink.flush(), 0);
    assert!(inner.lock().unwrap().get(id).unwrap().is_some());
}

#[test]
fn next_write_flushes_parked_entries() {
    let (sink, inner, down) = offline_sink(2);
    sink.record(NewErrorEntry::new("pipeline", "infrastructure", "first"));
    down.store(false, Ordering::SeqCst);
    let (_, write) =
        sink.record_outcome(NewErrorEntry::new("pipeline", "infrastructure", "second"));
    assert!(write.is_stored());

    assert_eq!(sink.pending_len(), 0);
    assert_eq!(inner.lock().unwrap().entries().unwrap().len(), 2);
}

#[test]
fn rejected_configuration_is_logged_to_the_sink() {
    let mut engine = engine();
    let err = engine
        .register_mapping_rule(MappingRule::new(
            RuleId::new("age-copy").unwrap(),
            "age",
            &key("demo", "generation"),
            common::generations(),
            1,
        ))
        .unwrap_err();
    assert_eq!(err.error_type(), "Conflict");

    let entries = engine.errors().query(
        &ErrorQuery::new()
            .source("configuration")
            .source_id("age-copy")
            .unresolved(),
    );
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].error_type, "Conflict");

    engine.errors().resolve(entries[0].id).unwrap();
    assert!(
        engine
            .errors()
            .query(&ErrorQuery::new().source("configuration").unresolved())
            .is_empty()
    );
}

#[test]
fn full_pending_buffer_drops_the_oldest_entry() {
    let (sink, _inner, _down) = offline_sink(1);
    let sink = sink.with_pending_limit(2);
    let first = sink.record(NewErrorEntry::new("pipeline", "infrastructure", "first"));
    sink.record(NewErrorEntry::new("pipeline", "infrastructure", "second"));
    sink.record(NewErrorEntry::new("pipeline", "infrastructure", "third"));

    assert_eq!(sink.pending_len(), 2);
    assert_eq!(sink.dropped(), 1);
    assert!(sink.get(first).is_none());
    let messages: Vec<String> = sink
        .query(&ErrorQuery::new())
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert_eq!(messages, ["second", "third"]);
}

#[test]
fn run_fails_when_its_errors_cannot_be_stored() {
    let (sink, inner, down) = offline_sink(2);
    let engine = populate(Engine::with_sink(test_config(), Arc::new(sink)).unwrap());

    let run_id = engine
        .submit_run(&pipeline_id(), vec![respondent("a", 30.0), respondent("b", 15.0)])
        .unwrap();
    let run = engine.wait_run(run_id).unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.records_processed, 1);
    assert_eq!(run.records_failed, 1);
    let kinds: Vec<RunErrorKind> = run.error_log.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, [RunErrorKind::RecordFailed, RunErrorKind::Infrastructure]);
    assert!(run.error_log.iter().all(|entry| entry.error_id.is_some()));
    assert!(matches!(
        engine.run_output(run_id),
        Err(EngineError::Pipeline(PipelineError::OutputUnavailable { .. }))
    ));
    assert_eq!(engine.active_run(&pipeline_id()), None);

    // Both entries reach the store once it is back.
    assert_eq!(engine.errors().pending_len(), 2);
    down.store(false, Ordering::SeqCst);
    assert_eq!(engine.errors().flush(), 0);
    assert_eq!(inner.lock().unwrap().entries().unwrap().len(), 2);
}

#[test]
fn clean_run_completes_while_the_store_is_down() {
    let (sink, _inner, _down) = offline_sink(2);
    let engine = populate(Engine::with_sink(test_config(), Arc::new(sink)).unwrap());
    let run_id = engine
        .submit_run(&pipeline_id(), vec![respondent("a", 30.0)])
        .unwrap();
    assert_eq!(engine.wait_run(run_id).unwrap().status, RunStatus::Completed);
    assert_eq!(engine.errors().pending_len(), 0);
}
