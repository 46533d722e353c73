//! Pipeline validation rules.

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::ids::{PipelineId, RuleId};
use crate::payload::RulePayload;
use crate::taxonomy::AttributeKey;
use crate::{ModelError, Result};

const VALIDATION_KINDS: &str = "not_null, range, regex, threshold";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fails the record (per-record rules) or the run (threshold rules).
    #[default]
    Error,
    /// Logged only.
    Warning,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineValidationRule {
    pub id: RuleId,
    pub pipeline_id: PipelineId,
    pub rule: ValidationBody,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl PipelineValidationRule {
    pub fn new(id: RuleId, pipeline_id: PipelineId, rule: ValidationBody, severity: Severity) -> Self {
        Self {
            id,
            pipeline_id,
            rule,
            severity,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotNullBody {
    pub attribute: AttributeKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeBody {
    pub attribute: AttributeKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexBody {
    pub attribute: AttributeKey,
    pub pattern: String,
}

/// Aggregate metric checked once per batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum ThresholdMetric {
    /// Every observed value of `attribute` among accepted records must
    /// occur at least `min_count` times.
    MinGroupSize {
        attribute: AttributeKey,
        min_count: usize,
    },
    /// Share of submitted records whose `source_field` repeats an earlier
    /// record must not exceed `max_rate`.
    MaxDuplicateRate { source_field: String, max_rate: f64 },
}

impl ThresholdMetric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MinGroupSize { .. } => "min_group_size",
            Self::MaxDuplicateRate { .. } => "max_duplicate_rate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RulePayload")]
pub enum ValidationBody {
    NotNull(NotNullBody),
    Range(RangeBody),
    Regex(RegexBody),
    Threshold(ThresholdMetric),
}

impl ValidationBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotNull(_) => "not_null",
            Self::Range(_) => "range",
            Self::Regex(_) => "regex",
            Self::Threshold(_) => "threshold",
        }
    }

    /// Threshold rules run once per batch; the rest run per record.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Threshold(_))
    }

    /// The attribute a per-record rule inspects.
    pub fn attribute(&self) -> Option<&AttributeKey> {
        match self {
            Self::NotNull(body) => Some(&body.attribute),
            Self::Range(body) => Some(&body.attribute),
            Self::Regex(body) => Some(&body.attribute),
            Self::Threshold(ThresholdMetric::MinGroupSize { attribute, .. }) => Some(attribute),
            Self::Threshold(ThresholdMetric::MaxDuplicateRate { .. }) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        match self {
            Self::NotNull(_) => Ok(()),
            Self::Range(body) => match (body.min, body.max) {
                (None, None) => Err(ModelError::body(kind, "min or max is required")),
                (Some(min), Some(max)) if min > max => {
                    Err(ModelError::body(kind, format!("min {min} exceeds max {max}")))
                }
                _ => Ok(()),
            },
            Self::Regex(body) if body.pattern.is_empty() => {
                Err(ModelError::body(kind, "pattern must not be empty"))
            }
            Self::Regex(_) => Ok(()),
            Self::Threshold(ThresholdMetric::MinGroupSize { min_count, .. }) if *min_count == 0 => {
                Err(ModelError::body(kind, "min_count must be at least 1"))
            }
            Self::Threshold(ThresholdMetric::MaxDuplicateRate {
                source_field,
                max_rate,
            }) => {
                if source_field.trim().is_empty() {
                    return Err(ModelError::body(kind, "source_field must not be blank"));
                }
                if !(0.0..=1.0).contains(max_rate) {
                    return Err(ModelError::body(kind, "max_rate must be within [0, 1]"));
                }
                Ok(())
            }
            Self::Threshold(_) => Ok(()),
        }
    }
}

impl TryFrom<RulePayload> for ValidationBody {
    type Error = ModelError;

    fn try_from(payload: RulePayload) -> Result<Self> {
        let body = match payload.kind.as_str() {
            "not_null" => Self::NotNull(payload.decode_body()?),
            "range" => Self::Range(payload.decode_body()?),
            "regex" => Self::Regex(payload.decode_body()?),
            "threshold" => Self::Threshold(payload.decode_body()?),
            _ => {
                return Err(ModelError::UnknownRuleType {
                    kind: payload.kind,
                    expected: VALIDATION_KINDS,
                });
            }
        };
        body.validate()?;
        Ok(body)
    }
}

impl Serialize for ValidationBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ValidationBody", 2)?;
        state.serialize_field("type", self.kind())?;
        match self {
            Self::NotNull(body) => state.serialize_field("body", body)?,
            Self::Range(body) => state.serialize_field("body", body)?,
            Self::Regex(body) => state.serialize_field("body", body)?,
            Self::Threshold(metric) => state.serialize_field("body", metric)?,
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_round_trips() {
        let body = ValidationBody::Threshold(ThresholdMetric::MaxDuplicateRate {
            source_field: "respondent_id".to_string(),
            max_rate: 0.05,
        });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "threshold");
        assert_eq!(json["body"]["metric"], "max_duplicate_rate");
        let back: ValidationBody = serde_json::from_value(json).unwrap();
        assert_eq!(back, body);
        assert!(back.is_aggregate());
    }

    #[test]
    fn unknown_validation_type_is_rejected() {
        let err = ValidationBody::try_from(RulePayload::new("checksum", serde_json::json!({})))
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownRuleType { .. }));
    }

    #[test]
    fn range_needs_a_bound() {
        let payload = RulePayload::new(
            "range",
            serde_json::json!({"attribute": "demographics.age"}),
        );
        assert!(ValidationBody::try_from(payload).is_err());
    }

    #[test]
    fn duplicate_rate_must_be_a_fraction() {
        let payload = RulePayload::new(
            "threshold",
            serde_json::json!({"metric": "max_duplicate_rate", "source_field": "id", "max_rate": 5}),
        );
        assert!(ValidationBody::try_from(payload).is_err());
    }

    #[test]
    fn severity_parses_loosely() {
        assert_eq!(Severity::parse(" Warning "), Some(Severity::Warning));
        assert_eq!(Severity::parse("fatal"), None);
    }
}
