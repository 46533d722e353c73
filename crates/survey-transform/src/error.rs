use thiserror::Error;

/// Record-level transformation failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("value {value} falls in no configured range")]
    UnmappedRange { value: f64 },

    #[error("unknown lookup key {key:?}")]
    UnknownKey { key: String },

    #[error("value {value:?} failed validation: {reason}")]
    ValidationFailed { value: String, reason: String },

    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl TransformError {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::UnmappedRange { .. } => "UnmappedRange",
            Self::UnknownKey { .. } => "UnknownKey",
            Self::ValidationFailed { .. } => "ValidationFailed",
            Self::TypeMismatch { .. } => "TypeMismatch",
        }
    }
}
