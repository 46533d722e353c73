use survey_model::AttributeKey;

use super::RecordValues;
use crate::Issue;

/// Missing values are left to `not_null`; non-numeric values are out of range.
pub(crate) fn check(
    values: &RecordValues,
    attribute: &AttributeKey,
    min: Option<f64>,
    max: Option<f64>,
) -> Option<Issue> {
    let value = values.get(attribute).filter(|value| !value.is_missing())?;
    let in_range = value.as_f64().is_some_and(|number| {
        min.is_none_or(|min| number >= min) && max.is_none_or(|max| number <= max)
    });
    (!in_range).then(|| Issue::OutOfRange {
        attribute: attribute.clone(),
        value: value.to_string(),
        min,
        max,
    })
}
