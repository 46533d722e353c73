//! Pipelines, pipeline runs and the run status state machine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ErrorId, PipelineId, RuleId, RunId};
use crate::{ModelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineType {
    Etl,
    Aggregation,
    Export,
    Sync,
    Transformation,
}

/// Source/destination description plus the fields the engine reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfiguration {
    /// Opaque to the engine.
    pub source: serde_json::Value,
    /// Opaque to the engine.
    pub destination: serde_json::Value,
    /// Wall-clock budget for one run; exceeding it cancels the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Records per worker chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPipeline {
    pub id: PipelineId,
    pub name: String,
    #[serde(rename = "type")]
    pub pipeline_type: PipelineType,
    #[serde(default)]
    pub configuration: PipelineConfiguration,
    /// Cron-like expression; `None` runs on demand only.
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl DataPipeline {
    pub fn new(id: PipelineId, name: impl Into<String>, pipeline_type: PipelineType) -> Self {
        Self {
            id,
            name: name.into(),
            pipeline_type,
            configuration: PipelineConfiguration::default(),
            schedule: None,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// PENDING -> RUNNING -> {COMPLETED | FAILED}; nothing else.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    RecordFailed,
    /// A `warning` rule fired on a record that was still accepted.
    RecordWarning,
    AggregateViolation,
    Cancelled,
    TimedOut,
    Infrastructure,
    /// Summarizes record entries dropped by the error log bound.
    Truncated,
}

impl RunErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordFailed => "record_failed",
            Self::RecordWarning => "record_warning",
            Self::AggregateViolation => "aggregate_violation",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::Infrastructure => "infrastructure",
            Self::Truncated => "truncated",
        }
    }

    /// Record-level entries count against the error log bounds.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::RecordFailed | Self::RecordWarning)
    }
}

impl fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunErrorEntry {
    pub kind: RunErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<RuleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    pub message: String,
    /// Matching entry in the error sink, when one was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_id: Option<ErrorId>,
}

impl RunErrorEntry {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            record_index: None,
            rule_id: None,
            attribute: None,
            message: message.into(),
            error_id: None,
        }
    }

    #[must_use]
    pub fn with_record(mut self, index: usize) -> Self {
        self.record_index = Some(index);
        self
    }

    #[must_use]
    pub fn with_rule(mut self, rule_id: RuleId) -> Self {
        self.rule_id = Some(rule_id);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }
}

/// One execution of a pipeline over a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub pipeline_id: PipelineId,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Size of the batch once it has been read.
    pub batch_size: usize,
    pub records_processed: usize,
    pub records_failed: usize,
    pub error_log: Vec<RunErrorEntry>,
    /// Record-level entries dropped by the error log bound.
    pub errors_truncated: usize,
    pub metrics: BTreeMap<String, f64>,
}

impl PipelineRun {
    pub fn new(pipeline_id: PipelineId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new_v4(),
            pipeline_id,
            status: RunStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            batch_size: 0,
            records_processed: 0,
            records_failed: 0,
            error_log: Vec::new(),
            errors_truncated: 0,
            metrics: BTreeMap::new(),
        }
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(RunStatus::Running)?;
        self.started_at = Some(at);
        Ok(())
    }

    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(RunStatus::Completed)?;
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(RunStatus::Failed)?;
        self.completed_at = Some(at);
        Ok(())
    }

    fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }
}
