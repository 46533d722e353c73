use regex::Regex;
use survey_model::AttributeKey;

use super::RecordValues;
use crate::Issue;

/// Matches against the text form of the value; missing values are skipped.
pub(crate) fn check(values: &RecordValues, attribute: &AttributeKey, regex: &Regex) -> Option<Issue> {
    let value = values.get(attribute).filter(|value| !value.is_missing())?;
    let text = value.to_string();
    (!regex.is_match(&text)).then(|| Issue::PatternMismatch {
        attribute: attribute.clone(),
        value: text,
        pattern: regex.as_str().to_string(),
    })
}
