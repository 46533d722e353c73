//! Error sink entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ErrorId;

/// A stored, individually resolvable error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub id: ErrorId,
    /// Component that reported the error (e.g. `pipeline`, `configuration`).
    pub source: String,
    /// Identifier of the failing object within `source` (run id, rule id...).
    pub source_id: Option<String>,
    pub error_type: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub context: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ErrorEntry {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// An entry before the sink has assigned it an id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewErrorEntry {
    pub source: String,
    pub source_id: Option<String>,
    pub error_type: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub context: BTreeMap<String, String>,
}

impl NewErrorEntry {
    pub fn new(
        source: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_id: None,
            error_type: error_type.into(),
            message: message.into(),
            stack_trace: None,
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    pub fn into_entry(self, id: ErrorId, created_at: DateTime<Utc>) -> ErrorEntry {
        ErrorEntry {
            id,
            source: self.source,
            source_id: self.source_id,
            error_type: self.error_type,
            message: self.message,
            stack_trace: self.stack_trace,
            context: self.context,
            created_at,
            resolved_at: None,
        }
    }
}
