//! Processing of one chunk of records on a pool thread.

use survey_map::RuleFailure;
use survey_model::{RawRecord, RunErrorEntry, RunErrorKind, Severity};
use survey_validate::Violation;
use tracing::warn;

use crate::{ChunkOutcome, MappedRecord, RunContext};

/// Maps and validates `records`, whose first element sits at `offset` in the
/// batch. Touches nothing outside the returned outcome.
pub(crate) fn process_chunk(ctx: &RunContext, offset: usize, records: &[RawRecord]) -> ChunkOutcome {
    let mut outcome = ChunkOutcome {
        offset,
        tally: ctx.tally.empty_like(),
        ..ChunkOutcome::default()
    };

    for (i, record) in records.iter().enumerate() {
        let index = offset + i;
        outcome.tally.observe_submitted(record);

        let evaluation = ctx.rules.evaluate(record);
        outcome.shadowed += evaluation.shadowed.len();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for failure in &evaluation.failures {
            match failure.severity {
                Severity::Error => {
                    errors.push(failure_entry(RunErrorKind::RecordFailed, index, failure));
                }
                Severity::Warning => {
                    warnings.push(failure_entry(RunErrorKind::RecordWarning, index, failure));
                }
            }
        }

        if errors.is_empty() {
            let violations =
                ctx.validation
                    .validate_record(&ctx.pipeline_id, &evaluation.values, &ctx.schema);
            for violation in &violations {
                if violation.is_error() {
                    errors.push(violation_entry(RunErrorKind::RecordFailed, index, violation));
                } else {
                    warnings.push(violation_entry(RunErrorKind::RecordWarning, index, violation));
                }
            }
        }

        // Messages can quote raw values; they go to the run log and sink only.
        for entry in &warnings {
            warn!(
                record = index,
                rule_id = entry.rule_id.as_ref().map(|id| id.as_str()),
                attribute = entry.attribute.as_deref(),
                "record warning"
            );
        }

        if errors.is_empty() {
            outcome.processed += 1;
            if !warnings.is_empty() {
                outcome.warned += 1;
            }
            outcome.tally.observe_accepted(&evaluation.values);
            outcome.accepted.push(MappedRecord {
                index,
                values: evaluation.values,
            });
        } else {
            outcome.failed += 1;
            outcome.errors.extend(errors);
        }
        outcome.errors.extend(warnings);
    }
    outcome
}

fn failure_entry(kind: RunErrorKind, index: usize, failure: &RuleFailure) -> RunErrorEntry {
    RunErrorEntry::new(
        kind,
        format!(
            "{} on field {}: {}",
            failure.error.error_type(),
            failure.source_field,
            failure.error
        ),
    )
    .with_record(index)
    .with_rule(failure.rule_id.clone())
    .with_attribute(failure.attribute.to_string())
}

fn violation_entry(kind: RunErrorKind, index: usize, violation: &Violation) -> RunErrorEntry {
    let mut entry = RunErrorEntry::new(kind, violation.message()).with_record(index);
    if let Some(rule_id) = &violation.rule_id {
        entry = entry.with_rule(rule_id.clone());
    }
    if let Some(attribute) = violation.issue.attribute() {
        entry = entry.with_attribute(attribute.to_string());
    }
    entry
}
