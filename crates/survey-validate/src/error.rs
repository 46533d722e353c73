use survey_model::{ModelError, PipelineId, RuleId};
use survey_taxonomy::TaxonomyError;
use thiserror::Error;

/// Errors from registering validation rules.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ValidationConfigError {
    #[error("invalid {kind} body for rule {rule_id}: {message}")]
    InvalidRuleBody {
        rule_id: RuleId,
        kind: &'static str,
        message: String,
    },

    #[error("duplicate validation rule id: {0}")]
    DuplicateRuleId(RuleId),

    #[error("validation rule not found: {0}")]
    RuleNotFound(RuleId),

    #[error("rule {rule_id} belongs to pipeline {found}, not {expected}")]
    PipelineMismatch {
        rule_id: RuleId,
        expected: PipelineId,
        found: PipelineId,
    },

    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl ValidationConfigError {
    /// Short, stable name used as the error sink `error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRuleBody { .. } | Self::Model(ModelError::InvalidRuleBody { .. }) => {
                "InvalidRuleBody"
            }
            Self::DuplicateRuleId(_) => "DuplicateRuleId",
            Self::RuleNotFound(_) => "RuleNotFound",
            Self::PipelineMismatch { .. } => "PipelineMismatch",
            Self::Taxonomy(err) => err.error_type(),
            Self::Model(_) => "InvalidConfiguration",
        }
    }
}
