use survey_model::ModelError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum TaxonomyError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("duplicate {scope} code: {code}")]
    DuplicateCode { scope: &'static str, code: String },

    #[error("parent category not found: {0}")]
    ParentNotFound(String),

    #[error("parent category is inactive: {0}")]
    ParentInactive(String),

    #[error("placing {code} under {parent} would create a cycle")]
    CycleDetected { code: String, parent: String },

    #[error("category not found: {0}")]
    CategoryNotFound(String),

    #[error("category is inactive: {0}")]
    CategoryInactive(String),

    #[error("attribute not found: {category}.{attribute}")]
    AttributeNotFound { category: String, attribute: String },

    #[error("invalid constraints for {attribute}: {message}")]
    InvalidConstraints { attribute: String, message: String },
}

impl TaxonomyError {
    /// Short, stable name used as the error sink `error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Model(_) => "InvalidConfiguration",
            Self::DuplicateCode { .. } => "DuplicateCode",
            Self::ParentNotFound(_) => "ParentNotFound",
            Self::ParentInactive(_) => "ParentInactive",
            Self::CycleDetected { .. } => "CycleDetected",
            Self::CategoryNotFound(_) => "CategoryNotFound",
            Self::CategoryInactive(_) => "CategoryInactive",
            Self::AttributeNotFound { .. } => "AttributeNotFound",
            Self::InvalidConstraints { .. } => "InvalidConstraints",
        }
    }
}
