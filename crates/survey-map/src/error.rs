//! Error types for mapping rule registration.

use survey_model::{AttributeKey, ModelError, RuleId};
use survey_taxonomy::TaxonomyError;
use thiserror::Error;

/// Errors from registering or updating mapping rules.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum MappingError {
    /// An active rule with the same source field, target and priority exists.
    #[error("rule {rule_id} conflicts with {existing} on {attribute}")]
    Conflict {
        rule_id: RuleId,
        existing: RuleId,
        attribute: AttributeKey,
    },

    #[error("duplicate mapping rule id: {0}")]
    DuplicateRuleId(RuleId),

    #[error("mapping rule not found: {0}")]
    RuleNotFound(RuleId),

    /// The transformation cannot produce values of the attribute's type.
    #[error("rule {rule_id} ({kind}) cannot target {attribute}: {message}")]
    TypeMismatch {
        rule_id: RuleId,
        kind: &'static str,
        attribute: AttributeKey,
        message: String,
    },

    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

impl MappingError {
    /// Short, stable name used as the error sink `error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Conflict { .. } => "Conflict",
            Self::DuplicateRuleId(_) => "DuplicateRuleId",
            Self::RuleNotFound(_) => "RuleNotFound",
            Self::TypeMismatch { .. } => "TypeMismatch",
            Self::Taxonomy(err) => err.error_type(),
            Self::Model(ModelError::InvalidRuleBody { .. }) => "InvalidRuleBody",
            Self::Model(_) => "InvalidConfiguration",
        }
    }
}
