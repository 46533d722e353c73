//! Error sink: resolvable error entries behind a pluggable store.
//!
//! Writes never fail from the caller's point of view. A store write is retried
//! with the sink's [`RetryPolicy`]; when every attempt fails the entry is
//! parked in a bounded pending buffer and written again on the next `record`
//! or `flush`. [`ErrorSink::record_outcome`] tells callers which happened.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use survey_model::{ErrorEntry, ErrorId, NewErrorEntry};
use tracing::{debug, error};

use crate::{RetryPolicy, StoreError};

/// Parked entries kept while the store is down.
pub const DEFAULT_PENDING_LIMIT: usize = 10_000;

/// Backing storage for error entries.
pub trait ErrorStore: Send {
    fn write(&mut self, entry: &ErrorEntry) -> Result<(), StoreError>;

    /// Sets `resolved_at`; [`StoreError::NotFound`] for unknown ids.
    fn mark_resolved(&mut self, id: ErrorId, at: DateTime<Utc>) -> Result<(), StoreError>;

    fn get(&self, id: ErrorId) -> Result<Option<ErrorEntry>, StoreError>;

    /// Every stored entry, oldest first.
    fn entries(&self) -> Result<Vec<ErrorEntry>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryErrorStore {
    entries: Vec<ErrorEntry>,
}

impl InMemoryErrorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ErrorStore for InMemoryErrorStore {
    fn write(&mut self, entry: &ErrorEntry) -> Result<(), StoreError> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn mark_resolved(&mut self, id: ErrorId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(StoreError::NotFound(id))?;
        entry.resolved_at.get_or_insert(at);
        Ok(())
    }

    fn get(&self, id: ErrorId) -> Result<Option<ErrorEntry>, StoreError> {
        Ok(self.entries.iter().find(|entry| entry.id == id).cloned())
    }

    fn entries(&self) -> Result<Vec<ErrorEntry>, StoreError> {
        Ok(self.entries.clone())
    }
}

/// Filter for [`ErrorSink::query`]; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorQuery {
    pub source: Option<String>,
    pub source_id: Option<String>,
    pub error_type: Option<String>,
    pub unresolved_only: bool,
}

impl ErrorQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    #[must_use]
    pub fn error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    #[must_use]
    pub fn unresolved(mut self) -> Self {
        self.unresolved_only = true;
        self
    }

    pub fn matches(&self, entry: &ErrorEntry) -> bool {
        self.source.as_deref().is_none_or(|s| entry.source == s)
            && self
                .source_id
                .as_deref()
                .is_none_or(|id| entry.source_id.as_deref() == Some(id))
            && self
                .error_type
                .as_deref()
                .is_none_or(|t| entry.error_type == t)
            && !(self.unresolved_only && entry.is_resolved())
    }
}

/// Where a recorded entry ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkWrite {
    Stored,
    /// Every write attempt failed; the entry waits in the pending buffer.
    Parked,
}

impl SinkWrite {
    pub fn is_stored(self) -> bool {
        self == Self::Stored
    }
}

struct SinkState {
    store: Box<dyn ErrorStore>,
    pending: VecDeque<ErrorEntry>,
    pending_limit: usize,
    dropped: usize,
}

impl SinkState {
    /// Writes parked entries once each; keeps the ones that still fail.
    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let parked = std::mem::take(&mut self.pending);
        for entry in parked {
            if self.store.write(&entry).is_err() {
                self.pending.push_back(entry);
            }
        }
        debug!(remaining = self.pending.len(), "flushed pending error entries");
    }

    /// Parks an entry, dropping the oldest parked one when the buffer is full.
    fn park(&mut self, entry: ErrorEntry) {
        while self.pending.len() >= self.pending_limit.max(1) {
            let Some(oldest) = self.pending.pop_front() else {
                break;
            };
            self.dropped += 1;
            error!(
                error_id = %oldest.id,
                source = %oldest.source,
                error_type = %oldest.error_type,
                dropped = self.dropped,
                "pending error buffer full; oldest entry dropped"
            );
        }
        self.pending.push_back(entry);
    }
}

pub struct ErrorSink {
    state: Mutex<SinkState>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorSink")
            .field("pending", &self.pending_len())
            .field("dropped", &self.dropped())
            .field("retry", &self.retry)
            .finish()
    }
}

impl Default for ErrorSink {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ErrorSink {
    pub fn new(store: Box<dyn ErrorStore>, retry: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(SinkState {
                store,
                pending: VecDeque::new(),
                pending_limit: DEFAULT_PENDING_LIMIT,
                dropped: 0,
            }),
            retry,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryErrorStore::new()), RetryPolicy::default())
    }

    /// Caps the pending buffer; at least one entry is always kept.
    #[must_use]
    pub fn with_pending_limit(self, limit: usize) -> Self {
        self.lock().pending_limit = limit.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Stores an entry and returns its id. Never fails.
    pub fn record(&self, entry: NewErrorEntry) -> ErrorId {
        self.record_outcome(entry).0
    }

    /// Like [`record`](Self::record), also reporting whether the store
    /// accepted the entry or it was parked.
    pub fn record_outcome(&self, entry: NewErrorEntry) -> (ErrorId, SinkWrite) {
        let entry = entry.into_entry(ErrorId::new_v4(), Utc::now());
        let id = entry.id;
        self.lock().flush_pending();
        // The lock is taken per attempt and released across backoff sleeps.
        let written = self
            .retry
            .run("error sink write", || self.lock().store.write(&entry));
        match written {
            Ok(()) => (id, SinkWrite::Stored),
            Err(err) => {
                error!(
                    error_id = %id,
                    source = %entry.source,
                    error_type = %entry.error_type,
                    message = %entry.message,
                    error = %err,
                    "error store unavailable; entry parked"
                );
                self.lock().park(entry);
                (id, SinkWrite::Parked)
            }
        }
    }

    pub fn resolve(&self, id: ErrorId) -> Result<(), StoreError> {
        let now = Utc::now();
        if let Some(entry) = self.lock().pending.iter_mut().find(|entry| entry.id == id) {
            entry.resolved_at.get_or_insert(now);
            return Ok(());
        }
        self.retry
            .run("error sink resolve", || match self.lock().store.mark_resolved(id, now) {
                Err(StoreError::NotFound(id)) => Ok(Err(StoreError::NotFound(id))),
                other => other.map(Ok),
            })?
    }

    pub fn get(&self, id: ErrorId) -> Option<ErrorEntry> {
        let state = self.lock();
        if let Some(entry) = state.pending.iter().find(|entry| entry.id == id) {
            return Some(entry.clone());
        }
        state.store.get(id).unwrap_or_else(|err| {
            error!(error_id = %id, error = %err, "error store lookup failed");
            None
        })
    }

    /// Matching entries, stored and parked, oldest first.
    pub fn query(&self, query: &ErrorQuery) -> Vec<ErrorEntry> {
        let state = self.lock();
        let mut entries = state.store.entries().unwrap_or_else(|err| {
            error!(error = %err, "error store query failed");
            Vec::new()
        });
        entries.extend(state.pending.iter().cloned());
        entries.retain(|entry| query.matches(entry));
        entries.sort_by_key(|entry| entry.created_at);
        entries
    }

    /// Retries parked entries; returns how many are still parked.
    pub fn flush(&self) -> usize {
        let mut state = self.lock();
        state.flush_pending();
        state.pending.len()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Parked entries discarded because the pending buffer was full.
    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }
}
