//! Error types for pipeline execution and the engine facade.

use std::path::PathBuf;

use survey_map::MappingError;
use survey_model::{ErrorId, ModelError, PipelineId, RunId, RunStatus};
use survey_taxonomy::TaxonomyError;
use survey_validate::ValidationConfigError;
use thiserror::Error;

/// Errors from submitting and inspecting runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("pipeline {pipeline_id} already has run {run_id} in flight")]
    AlreadyRunning { pipeline_id: PipelineId, run_id: RunId },

    #[error("pipeline not found: {0}")]
    PipelineNotFound(PipelineId),

    #[error("pipeline is inactive: {0}")]
    PipelineInactive(PipelineId),

    #[error("duplicate pipeline id: {0}")]
    DuplicatePipeline(PipelineId),

    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("run {run_id} has no output in status {status}")]
    OutputUnavailable { run_id: RunId, status: RunStatus },

    #[error("failed to start run worker: {0}")]
    Spawn(String),
}

impl PipelineError {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::AlreadyRunning { .. } => "AlreadyRunning",
            Self::PipelineNotFound(_) => "PipelineNotFound",
            Self::PipelineInactive(_) => "PipelineInactive",
            Self::DuplicatePipeline(_) => "DuplicatePipeline",
            Self::RunNotFound(_) => "RunNotFound",
            Self::OutputUnavailable { .. } => "OutputUnavailable",
            Self::Spawn(_) => "Infrastructure",
        }
    }
}

/// A batch source could not be read.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("batch source {source_name} failed: {message}")]
pub struct SourceError {
    pub source_name: String,
    pub message: String,
}

impl SourceError {
    pub fn new(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// The backing error store rejected an operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("error store unavailable: {0}")]
    Unavailable(String),

    #[error("error entry not found: {0}")]
    NotFound(ErrorId),
}

/// Errors loading engine configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid engine configuration: {0}")]
    Invalid(String),
}

/// Every error the [`crate::Engine`] facade can return.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Validation(#[from] ValidationConfigError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Short, stable name used as the error sink `error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Taxonomy(err) => err.error_type(),
            Self::Mapping(err) => err.error_type(),
            Self::Validation(err) => err.error_type(),
            Self::Model(ModelError::UnknownRuleType { .. }) => "UnknownRuleType",
            Self::Model(ModelError::InvalidRuleBody { .. }) => "InvalidRuleBody",
            Self::Model(_) => "InvalidConfiguration",
            Self::Pipeline(err) => err.error_type(),
            Self::Store(StoreError::NotFound(_)) => "NotFound",
            Self::Store(StoreError::Unavailable(_)) => "Infrastructure",
            Self::Config(_) => "InvalidConfiguration",
        }
    }
}
