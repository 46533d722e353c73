use survey_model::AttributeKey;

use super::RecordValues;
use crate::Issue;

/// Absent and blank values both count as null.
pub(crate) fn check(values: &RecordValues, attribute: &AttributeKey) -> Option<Issue> {
    values
        .get(attribute)
        .is_none_or(|value| value.is_missing())
        .then(|| Issue::NullValue {
            attribute: attribute.clone(),
        })
}
