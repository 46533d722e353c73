use thiserror::Error;

use crate::pipeline::RunStatus;

/// Errors raised while building or decoding model records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("invalid code: {0:?}")]
    InvalidCode(String),

    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("invalid attribute key {0:?} (expected `category.attribute`)")]
    InvalidAttributeKey(String),

    #[error("unknown rule type `{kind}` (expected one of: {expected})")]
    UnknownRuleType { kind: String, expected: &'static str },

    #[error("invalid `{kind}` rule body: {message}")]
    InvalidRuleBody { kind: String, message: String },

    #[error("constraints do not match data type {data_type}: {message}")]
    InvalidConstraints { data_type: String, message: String },

    #[error("invalid run transition {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },
}

impl ModelError {
    pub(crate) fn body(kind: &str, message: impl Into<String>) -> Self {
        Self::InvalidRuleBody {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
