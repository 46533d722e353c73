//! Mapping rules and their transformation bodies.

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::ids::RuleId;
use crate::payload::RulePayload;
use crate::taxonomy::AttributeKey;
use crate::validation::Severity;
use crate::{ModelError, Result};

const TRANSFORM_KINDS: &str = "range_map, lookup, pass_through, numeric";
const MAX_PRECISION: u32 = 12;

fn default_true() -> bool {
    true
}

/// Maps one raw source field onto one taxonomy attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    pub id: RuleId,
    pub source_field: String,
    pub target_category_code: String,
    pub target_attribute_code: String,
    pub transformation: TransformationRule,
    /// Lower values are evaluated first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// What a transformation failure does to the record.
    #[serde(default)]
    pub on_error: Severity,
}

impl MappingRule {
    pub fn new(
        id: RuleId,
        source_field: impl Into<String>,
        target: &AttributeKey,
        transformation: TransformationRule,
        priority: i32,
    ) -> Self {
        Self {
            id,
            source_field: source_field.into(),
            target_category_code: target.category.clone(),
            target_attribute_code: target.attribute.clone(),
            transformation,
            priority,
            is_active: true,
            on_error: Severity::Error,
        }
    }

    pub fn target(&self) -> Result<AttributeKey> {
        AttributeKey::new(&self.target_category_code, &self.target_attribute_code)
    }
}

/// How lookup keys are case-normalized before matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseNormalization {
    #[default]
    Upper,
    Lower,
    None,
}

impl CaseNormalization {
    pub fn apply(&self, key: &str) -> String {
        let trimmed = key.trim();
        match self {
            Self::Upper => trimmed.to_uppercase(),
            Self::Lower => trimmed.to_lowercase(),
            Self::None => trimmed.to_string(),
        }
    }
}

/// One inclusive numeric band `[min, max]` and its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeBand {
    pub min: f64,
    pub max: f64,
    pub label: String,
}

impl RangeBand {
    pub fn new(min: f64, max: f64, label: impl Into<String>) -> Self {
        Self {
            min,
            max,
            label: label.into(),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeMapBody {
    pub ranges: Vec<RangeBand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupBody {
    pub table: BTreeMap<String, String>,
    #[serde(default)]
    pub normalize: CaseNormalization,
    /// Returned for keys missing from the table instead of failing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PassThroughBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NumericBody {
    /// Decimal places kept after rounding.
    pub precision: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Tagged transformation body, one variant per strategy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RulePayload")]
pub enum TransformationRule {
    RangeMap(RangeMapBody),
    Lookup(LookupBody),
    PassThrough(PassThroughBody),
    Numeric(NumericBody),
}

impl TransformationRule {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RangeMap(_) => "range_map",
            Self::Lookup(_) => "lookup",
            Self::PassThrough(_) => "pass_through",
            Self::Numeric(_) => "numeric",
        }
    }

    /// Schema checks that do not depend on the taxonomy.
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind();
        match self {
            Self::RangeMap(body) => validate_ranges(&body.ranges),
            Self::Lookup(body) => {
                if body.table.is_empty() {
                    return Err(ModelError::body(kind, "lookup table is empty"));
                }
                let mut seen = BTreeSet::new();
                for key in body.table.keys() {
                    if !seen.insert(body.normalize.apply(key)) {
                        return Err(ModelError::body(
                            kind,
                            format!("key {key:?} collides with another key after normalization"),
                        ));
                    }
                }
                Ok(())
            }
            Self::PassThrough(body) => check_bounds(kind, body.min, body.max),
            Self::Numeric(body) => {
                if body.precision > MAX_PRECISION {
                    return Err(ModelError::body(
                        kind,
                        format!("precision {} exceeds {MAX_PRECISION}", body.precision),
                    ));
                }
                check_bounds(kind, body.min, body.max)
            }
        }
    }

    /// Labels this rule can emit, when the output set is closed.
    pub fn output_labels(&self) -> Option<Vec<&str>> {
        match self {
            Self::RangeMap(body) => Some(body.ranges.iter().map(|r| r.label.as_str()).collect()),
            Self::Lookup(body) => Some(
                body.table
                    .values()
                    .chain(body.default.iter())
                    .map(String::as_str)
                    .collect(),
            ),
            Self::PassThrough(_) | Self::Numeric(_) => None,
        }
    }
}

fn check_bounds(kind: &str, min: Option<f64>, max: Option<f64>) -> Result<()> {
    if let (Some(min), Some(max)) = (min, max)
        && min > max
    {
        return Err(ModelError::body(kind, format!("min {min} exceeds max {max}")));
    }
    Ok(())
}

fn validate_ranges(ranges: &[RangeBand]) -> Result<()> {
    let kind = "range_map";
    if ranges.is_empty() {
        return Err(ModelError::body(kind, "at least one range is required"));
    }
    for band in ranges {
        if !band.min.is_finite() || !band.max.is_finite() {
            return Err(ModelError::body(kind, "range bounds must be finite"));
        }
        if band.min > band.max {
            return Err(ModelError::body(
                kind,
                format!("range [{}, {}] is inverted", band.min, band.max),
            ));
        }
        if band.label.trim().is_empty() {
            return Err(ModelError::body(kind, "range labels must not be blank"));
        }
    }
    for pair in ranges.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.min < prev.min {
            return Err(ModelError::body(
                kind,
                "ranges must be sorted ascending by lower bound",
            ));
        }
        if next.min <= prev.max {
            return Err(ModelError::body(
                kind,
                format!(
                    "ranges [{}, {}] and [{}, {}] overlap",
                    prev.min, prev.max, next.min, next.max
                ),
            ));
        }
    }
    Ok(())
}

impl TryFrom<RulePayload> for TransformationRule {
    type Error = ModelError;

    fn try_from(payload: RulePayload) -> Result<Self> {
        let rule = match payload.kind.as_str() {
            "range_map" => Self::RangeMap(payload.decode_body()?),
            "lookup" => Self::Lookup(payload.decode_body()?),
            "pass_through" => Self::PassThrough(payload.decode_body()?),
            "numeric" => Self::Numeric(payload.decode_body()?),
            _ => {
                return Err(ModelError::UnknownRuleType {
                    kind: payload.kind,
                    expected: TRANSFORM_KINDS,
                });
            }
        };
        rule.validate()?;
        Ok(rule)
    }
}

impl Serialize for TransformationRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TransformationRule", 2)?;
        state.serialize_field("type", self.kind())?;
        match self {
            Self::RangeMap(body) => state.serialize_field("body", body)?,
            Self::Lookup(body) => state.serialize_field("body", body)?,
            Self::PassThrough(body) => state.serialize_field("body", body)?,
            Self::Numeric(body) => state.serialize_field("body", body)?,
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generations() -> TransformationRule {
        TransformationRule::RangeMap(RangeMapBody {
            ranges: vec![
                RangeBand::new(16.0, 24.0, "Gen Z"),
                RangeBand::new(25.0, 40.0, "Millennials"),
                RangeBand::new(41.0, 56.0, "Gen X"),
            ],
        })
    }

    #[test]
    fn transformation_round_trips_through_tagged_payload() {
        let rule = generations();
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["type"], "range_map");
        assert_eq!(json["body"]["ranges"][1]["label"], "Millennials");
        let back: TransformationRule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = TransformationRule::try_from(RulePayload::new(
            "fuzzy_match",
            serde_json::json!({}),
        ))
        .unwrap_err();
        assert!(matches!(err, ModelError::UnknownRuleType { ref kind, .. } if kind == "fuzzy_match"));
    }

    #[test]
    fn body_must_match_kind_schema() {
        let err = TransformationRule::try_from(RulePayload::new(
            "numeric",
            serde_json::json!({"precision": 2, "clamp": true}),
        ))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidRuleBody { .. }));
    }

    #[test]
    fn overlapping_or_unsorted_ranges_are_rejected() {
        let overlap = RulePayload::new(
            "range_map",
            serde_json::json!({"ranges": [
                {"min": 0, "max": 10, "label": "a"},
                {"min": 10, "max": 20, "label": "b"}
            ]}),
        );
        assert!(TransformationRule::try_from(overlap).is_err());

        let unsorted = RulePayload::new(
            "range_map",
            serde_json::json!({"ranges": [
                {"min": 20, "max": 30, "label": "b"},
                {"min": 0, "max": 10, "label": "a"}
            ]}),
        );
        assert!(TransformationRule::try_from(unsorted).is_err());
    }

    #[test]
    fn lookup_keys_must_stay_unique_after_normalization() {
        let payload = RulePayload::new(
            "lookup",
            serde_json::json!({"table": {"yes": "Y", "YES": "Y"}, "normalize": "upper"}),
        );
        assert!(TransformationRule::try_from(payload).is_err());
    }

    #[test]
    fn mapping_rule_defaults_from_toml() {
        let rule: MappingRule = toml::from_str(
            r#"
            id = "age-band"
            source_field = "age"
            target_category_code = "demographics"
            target_attribute_code = "generation"
            [transformation]
            type = "numeric"
            body = { precision = 0 }
            "#,
        )
        .unwrap();
        assert_eq!(rule.priority, 0);
        assert!(rule.is_active);
        assert_eq!(rule.on_error, Severity::Error);
        assert_eq!(rule.target().unwrap().to_string(), "demographics.generation");
    }
}
