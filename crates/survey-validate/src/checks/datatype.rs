//! Data type and constraint checks against the taxonomy definition.

use survey_model::{AttributeKey, DataType, Value};

use super::RecordValues;
use crate::schema::AttributeSpec;
use crate::{AttributeSchema, Issue};

pub(crate) fn check(values: &RecordValues, schema: &AttributeSchema) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (key, value) in values {
        if value.is_missing() {
            continue;
        }
        let Some(spec) = schema.spec(key) else {
            continue;
        };
        if let Some(issue) = check_value(key, value, spec) {
            issues.push(issue);
        }
    }
    issues
}

fn check_value(key: &AttributeKey, value: &Value, spec: &AttributeSpec) -> Option<Issue> {
    let mismatch = |expected: &'static str| Issue::DataTypeMismatch {
        attribute: key.clone(),
        expected,
        value: value.to_string(),
    };
    let violated = |reason: String| Issue::ConstraintViolated {
        attribute: key.clone(),
        value: value.to_string(),
        reason,
    };
    let constraints = &spec.constraints;

    match spec.data_type {
        DataType::Number => {
            let Some(number) = value.as_f64() else {
                return Some(mismatch("number"));
            };
            if let Some(min) = constraints.min
                && number < min
            {
                return Some(violated(format!("is below minimum {min}")));
            }
            if let Some(max) = constraints.max
                && number > max
            {
                return Some(violated(format!("is above maximum {max}")));
            }
            None
        }
        DataType::Boolean => match value {
            Value::Bool(_) => None,
            Value::Text(text) if matches!(text.trim(), "true" | "false") => None,
            _ => Some(mismatch("boolean")),
        },
        DataType::String => {
            let Value::Text(text) = value else {
                return Some(mismatch("string"));
            };
            if let Some(max_length) = constraints.max_length
                && text.chars().count() > max_length
            {
                return Some(violated(format!("is longer than {max_length} characters")));
            }
            if let Some(pattern) = &spec.pattern
                && !pattern.is_match(text)
            {
                return Some(violated(format!("does not match {}", pattern.as_str())));
            }
            None
        }
        DataType::ClosedSet => {
            let Value::Text(text) = value else {
                return Some(mismatch("closed_set"));
            };
            (!constraints.allows(text)).then(|| violated("is not an allowed value".to_string()))
        }
    }
}
