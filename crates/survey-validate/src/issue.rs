//! Validation issue types.
//!
//! Each [`Issue`] variant carries only the data its message needs. A
//! [`Violation`] pairs an issue with the rule that raised it and the
//! severity it carries.

use serde::Serialize;
use survey_model::{AttributeKey, RuleId, Severity};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Issue {
    // Taxonomy checks
    /// A required attribute of a populated category has no value.
    RequiredMissing { attribute: AttributeKey },
    /// The value does not fit the attribute's data type.
    DataTypeMismatch {
        attribute: AttributeKey,
        expected: &'static str,
        value: String,
    },
    /// The value breaks the attribute's constraints.
    ConstraintViolated {
        attribute: AttributeKey,
        value: String,
        reason: String,
    },

    // Pipeline rules, per record
    NullValue { attribute: AttributeKey },
    OutOfRange {
        attribute: AttributeKey,
        value: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    PatternMismatch {
        attribute: AttributeKey,
        value: String,
        pattern: String,
    },

    // Pipeline rules, per batch
    GroupTooSmall {
        attribute: AttributeKey,
        min_count: usize,
        /// Offending values with their counts, in value order.
        groups: Vec<(String, usize)>,
    },
    DuplicateRateExceeded {
        source_field: String,
        duplicates: usize,
        total: usize,
        rate: f64,
        max_rate: f64,
    },
}

impl Issue {
    /// Name of the check that raised the issue.
    pub fn check(&self) -> &'static str {
        match self {
            Issue::RequiredMissing { .. } => "required",
            Issue::DataTypeMismatch { .. } => "data_type",
            Issue::ConstraintViolated { .. } => "constraint",
            Issue::NullValue { .. } => "not_null",
            Issue::OutOfRange { .. } => "range",
            Issue::PatternMismatch { .. } => "regex",
            Issue::GroupTooSmall { .. } => "min_group_size",
            Issue::DuplicateRateExceeded { .. } => "max_duplicate_rate",
        }
    }

    pub fn attribute(&self) -> Option<&AttributeKey> {
        match self {
            Issue::RequiredMissing { attribute }
            | Issue::DataTypeMismatch { attribute, .. }
            | Issue::ConstraintViolated { attribute, .. }
            | Issue::NullValue { attribute }
            | Issue::OutOfRange { attribute, .. }
            | Issue::PatternMismatch { attribute, .. }
            | Issue::GroupTooSmall { attribute, .. } => Some(attribute),
            Issue::DuplicateRateExceeded { .. } => None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Issue::GroupTooSmall { .. } | Issue::DuplicateRateExceeded { .. }
        )
    }

    pub fn message(&self) -> String {
        match self {
            Issue::RequiredMissing { attribute } => {
                format!("Required attribute {attribute} is missing")
            }
            Issue::DataTypeMismatch {
                attribute,
                expected,
                value,
            } => format!("Attribute {attribute} expects {expected}, got {value:?}"),
            Issue::ConstraintViolated {
                attribute,
                value,
                reason,
            } => format!("Attribute {attribute} value {value:?} {reason}"),
            Issue::NullValue { attribute } => format!("Attribute {attribute} is null"),
            Issue::OutOfRange {
                attribute,
                value,
                min,
                max,
            } => format!(
                "Attribute {attribute} value {value} is outside [{}, {}]",
                bound(*min),
                bound(*max)
            ),
            Issue::PatternMismatch {
                attribute,
                value,
                pattern,
            } => format!("Attribute {attribute} value {value:?} does not match /{pattern}/"),
            Issue::GroupTooSmall {
                attribute,
                min_count,
                groups,
            } => {
                let listed: Vec<String> = groups
                    .iter()
                    .map(|(value, count)| format!("{value}={count}"))
                    .collect();
                format!(
                    "Attribute {attribute} has groups below {min_count}: {}",
                    listed.join(", ")
                )
            }
            Issue::DuplicateRateExceeded {
                source_field,
                duplicates,
                total,
                rate,
                max_rate,
            } => format!(
                "Field {source_field} duplicate rate {rate:.4} ({duplicates}/{total}) exceeds {max_rate}"
            ),
        }
    }
}

fn bound(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// An issue raised by a rule (or a built-in check when `rule_id` is `None`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub rule_id: Option<RuleId>,
    pub severity: Severity,
    pub issue: Issue,
}

impl Violation {
    pub fn builtin(issue: Issue) -> Self {
        Self {
            rule_id: None,
            severity: Severity::Error,
            issue,
        }
    }

    pub fn from_rule(rule_id: &RuleId, severity: Severity, issue: Issue) -> Self {
        Self {
            rule_id: Some(rule_id.clone()),
            severity,
            issue,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Message prefixed with the rule id, when there is one.
    pub fn message(&self) -> String {
        match &self.rule_id {
            Some(rule_id) => format!("[{rule_id}] {}", self.issue.message()),
            None => self.issue.message(),
        }
    }
}

/// True when any violation carries `error` severity.
pub fn fails(violations: &[Violation]) -> bool {
    violations.iter().any(Violation::is_error)
}
