//! Strategy implementations and the compiled dispatcher.

mod lookup;
mod numeric;
mod pass_through;
mod range_map;

pub use lookup::LookupTable;
pub use numeric::NumericNormalizer;
pub use pass_through::PassThroughCheck;
pub use range_map::RangeMapper;

use survey_model::{ModelError, TransformationRule, Value};

use crate::TransformError;

/// A transformation body ready for the hot path.
#[derive(Debug, Clone)]
pub enum CompiledTransform {
    RangeMap(RangeMapper),
    Lookup(LookupTable),
    PassThrough(PassThroughCheck),
    Numeric(NumericNormalizer),
}

impl CompiledTransform {
    pub fn compile(rule: &TransformationRule) -> Result<Self, ModelError> {
        rule.validate()?;
        Ok(match rule {
            TransformationRule::RangeMap(body) => Self::RangeMap(RangeMapper::new(body)),
            TransformationRule::Lookup(body) => Self::Lookup(LookupTable::new(body)),
            TransformationRule::PassThrough(body) => {
                Self::PassThrough(PassThroughCheck::new(body)?)
            }
            TransformationRule::Numeric(body) => Self::Numeric(NumericNormalizer::new(body)),
        })
    }

    pub fn apply(&self, raw: &Value) -> Result<Value, TransformError> {
        match self {
            Self::RangeMap(mapper) => mapper.apply(raw),
            Self::Lookup(table) => table.apply(raw),
            Self::PassThrough(check) => check.apply(raw),
            Self::Numeric(normalizer) => normalizer.apply(raw),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RangeMap(_) => "range_map",
            Self::Lookup(_) => "lookup",
            Self::PassThrough(_) => "pass_through",
            Self::Numeric(_) => "numeric",
        }
    }
}

/// Text form of a scalar used as a lookup key or pattern subject.
pub(crate) fn key_text(raw: &Value) -> Option<String> {
    match raw {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(_) => Some(raw.to_string()),
        Value::Text(text) => Some(text.clone()),
    }
}

pub(crate) fn numeric_input(raw: &Value) -> Result<f64, TransformError> {
    raw.as_f64().ok_or(TransformError::TypeMismatch {
        expected: "number",
        found: raw.type_name(),
    })
}
