//! Mergeable batch statistics for threshold rules.

use std::collections::BTreeMap;

use serde::Serialize;
use survey_model::{AttributeKey, RawRecord, Value};

/// Counts gathered while a batch is processed.
///
/// Chunks each fill their own tally; the coordinator merges them once all
/// chunks are done, so the result does not depend on chunk order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchTally {
    /// Records submitted, accepted or not.
    pub submitted: usize,
    /// Records that passed mapping and per-record validation.
    pub accepted: usize,
    /// Tracked source field -> raw value text -> occurrences.
    source_values: BTreeMap<String, BTreeMap<String, usize>>,
    /// Tracked attribute -> value text -> occurrences among accepted records.
    attribute_values: BTreeMap<AttributeKey, BTreeMap<String, usize>>,
}

impl BatchTally {
    pub fn new<F, A>(source_fields: F, attributes: A) -> Self
    where
        F: IntoIterator<Item = String>,
        A: IntoIterator<Item = AttributeKey>,
    {
        Self {
            submitted: 0,
            accepted: 0,
            source_values: source_fields
                .into_iter()
                .map(|field| (field, BTreeMap::new()))
                .collect(),
            attribute_values: attributes
                .into_iter()
                .map(|key| (key, BTreeMap::new()))
                .collect(),
        }
    }

    /// Same tracked keys, zero counts.
    pub fn empty_like(&self) -> Self {
        Self::new(
            self.source_values.keys().cloned(),
            self.attribute_values.keys().cloned(),
        )
    }

    /// Counts a submitted record's tracked source fields.
    pub fn observe_submitted(&mut self, record: &RawRecord) {
        self.submitted += 1;
        for (field, counts) in &mut self.source_values {
            if let Some(value) = record.present(field) {
                *counts.entry(value.to_string()).or_default() += 1;
            }
        }
    }

    /// Counts an accepted record's tracked attribute values.
    pub fn observe_accepted(&mut self, values: &BTreeMap<AttributeKey, Value>) {
        self.accepted += 1;
        for (key, counts) in &mut self.attribute_values {
            if let Some(value) = values.get(key).filter(|value| !value.is_missing()) {
                *counts.entry(value.to_string()).or_default() += 1;
            }
        }
    }

    pub fn merge(&mut self, other: BatchTally) {
        self.submitted += other.submitted;
        self.accepted += other.accepted;
        for (field, counts) in other.source_values {
            let target = self.source_values.entry(field).or_default();
            for (value, count) in counts {
                *target.entry(value).or_default() += count;
            }
        }
        for (key, counts) in other.attribute_values {
            let target = self.attribute_values.entry(key).or_default();
            for (value, count) in counts {
                *target.entry(value).or_default() += count;
            }
        }
    }

    /// Records whose `field` repeats a value seen on an earlier record.
    pub fn duplicates(&self, field: &str) -> usize {
        self.source_values
            .get(field)
            .map(|counts| counts.values().map(|count| count - 1).sum())
            .unwrap_or(0)
    }

    /// Duplicates over submitted records; zero for an empty batch.
    pub fn duplicate_rate(&self, field: &str) -> f64 {
        if self.submitted == 0 {
            return 0.0;
        }
        self.duplicates(field) as f64 / self.submitted as f64
    }

    /// Occurrences of each value of `key` among accepted records.
    pub fn groups(&self, key: &AttributeKey) -> Option<&BTreeMap<String, usize>> {
        self.attribute_values.get(key)
    }
}
