//! Required attribute checks.
//!
//! A category counts as populated once the record carries a value for any of
//! its attributes; every required attribute of a populated category must then
//! have a non-missing value.

use std::collections::BTreeSet;

use super::RecordValues;
use crate::{AttributeSchema, Issue};

pub(crate) fn check(values: &RecordValues, schema: &AttributeSchema) -> Vec<Issue> {
    let populated: BTreeSet<&str> = values
        .iter()
        .filter(|(_, value)| !value.is_missing())
        .map(|(key, _)| key.category.as_str())
        .collect();

    populated
        .into_iter()
        .flat_map(|category| schema.required_in(category))
        .filter(|key| values.get(*key).is_none_or(|value| value.is_missing()))
        .map(|key| Issue::RequiredMissing {
            attribute: key.clone(),
        })
        .collect()
}
