//! Aggregate threshold checks over a merged [`BatchTally`].

use survey_model::ThresholdMetric;

use crate::{BatchTally, Issue};

pub(crate) fn check(metric: &ThresholdMetric, tally: &BatchTally) -> Option<Issue> {
    match metric {
        ThresholdMetric::MinGroupSize {
            attribute,
            min_count,
        } => {
            let groups: Vec<(String, usize)> = tally
                .groups(attribute)?
                .iter()
                .filter(|(_, count)| **count < *min_count)
                .map(|(value, count)| (value.clone(), *count))
                .collect();
            (!groups.is_empty()).then(|| Issue::GroupTooSmall {
                attribute: attribute.clone(),
                min_count: *min_count,
                groups,
            })
        }
        ThresholdMetric::MaxDuplicateRate {
            source_field,
            max_rate,
        } => {
            let rate = tally.duplicate_rate(source_field);
            (rate > *max_rate).then(|| Issue::DuplicateRateExceeded {
                source_field: source_field.clone(),
                duplicates: tally.duplicates(source_field),
                total: tally.submitted,
                rate,
                max_rate: *max_rate,
            })
        }
    }
}
