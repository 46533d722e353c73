//! Survey taxonomy data model.
//!
//! Logical record shapes shared by every engine crate:
//!
//! - **taxonomy**: categories, attributes and the `category.attribute` key
//! - **rule**: mapping rules and their tagged transformation bodies
//! - **validation**: per-record and threshold validation rules
//! - **pipeline**: pipelines, runs and the run status state machine
//! - **entry**: error sink entries
//! - **value**: raw record fields and transformed attribute values

#![deny(unsafe_code)]

pub mod entry;
pub mod error;
pub mod ids;
pub mod payload;
pub mod pipeline;
pub mod rule;
pub mod taxonomy;
pub mod validation;
pub mod value;

pub use entry::{ErrorEntry, NewErrorEntry};
pub use error::{ModelError, Result};
pub use ids::{AttributeId, CategoryId, ErrorId, PipelineId, RuleId, RunId};
pub use payload::RulePayload;
pub use pipeline::{
    DataPipeline, PipelineConfiguration, PipelineRun, PipelineType, RunErrorEntry, RunErrorKind,
    RunStatus,
};
pub use rule::{
    CaseNormalization, LookupBody, MappingRule, NumericBody, PassThroughBody, RangeBand,
    RangeMapBody, TransformationRule,
};
pub use taxonomy::{
    AttributeConstraints, AttributeKey, DataType, TaxonomyAttribute, TaxonomyCategory,
};
pub use validation::{
    NotNullBody, PipelineValidationRule, RangeBody, RegexBody, Severity, ThresholdMetric,
    ValidationBody,
};
pub use value::{RawRecord, Value};
