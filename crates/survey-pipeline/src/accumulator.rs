//! Per-chunk outcomes and the per-run accumulator they merge into.

use std::collections::BTreeMap;

use survey_model::{RunErrorEntry, RunErrorKind};
use survey_validate::BatchTally;

use crate::MappedRecord;

/// What one worker produced for one chunk of the batch.
#[derive(Debug, Clone, Default)]
pub struct ChunkOutcome {
    /// Index of the chunk's first record in the batch.
    pub offset: usize,
    pub processed: usize,
    pub failed: usize,
    /// Accepted records whose mapping or validation raised warnings.
    pub warned: usize,
    pub shadowed: usize,
    /// Failure and warning entries, grouped by record.
    pub errors: Vec<RunErrorEntry>,
    pub accepted: Vec<MappedRecord>,
    pub tally: BatchTally,
}

/// Caps how many distinct records get entries in the run log.
///
/// A record's entries arrive together, so only the last admitted record is
/// remembered.
#[derive(Debug, Clone)]
struct RecordBound {
    limit: usize,
    kept: usize,
    truncated: usize,
    last: Option<(usize, bool)>,
}

impl RecordBound {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            kept: 0,
            truncated: 0,
            last: None,
        }
    }

    fn admit(&mut self, record: Option<usize>) -> bool {
        if let (Some(record), Some((last, kept))) = (record, self.last)
            && record == last
        {
            return kept;
        }
        let kept = self.kept < self.limit;
        if kept {
            self.kept += 1;
        } else {
            self.truncated += 1;
        }
        if let Some(record) = record {
            self.last = Some((record, kept));
        }
        kept
    }
}

/// Counters and logs for a run, owned by the coordinator thread.
#[derive(Debug, Clone)]
pub struct RunAccumulator {
    max_error_entries: usize,
    failures: RecordBound,
    warnings: RecordBound,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub warned: usize,
    pub shadowed: usize,
    pub chunks: usize,
    pub error_log: Vec<RunErrorEntry>,
    /// Failed records left out of the error log.
    pub errors_truncated: usize,
    /// Warned records left out of the error log.
    pub warnings_truncated: usize,
    pub accepted: Vec<MappedRecord>,
    pub tally: BatchTally,
}

impl RunAccumulator {
    pub fn new(max_error_entries: usize, tally: BatchTally) -> Self {
        Self {
            max_error_entries,
            failures: RecordBound::new(max_error_entries),
            warnings: RecordBound::new(max_error_entries),
            processed: 0,
            failed: 0,
            skipped: 0,
            warned: 0,
            shadowed: 0,
            chunks: 0,
            error_log: Vec::new(),
            errors_truncated: 0,
            warnings_truncated: 0,
            accepted: Vec::new(),
            tally,
        }
    }

    /// Merges a chunk. Record entries past the bounds are only counted.
    pub fn merge(&mut self, chunk: ChunkOutcome) {
        self.chunks += 1;
        self.processed += chunk.processed;
        self.failed += chunk.failed;
        self.warned += chunk.warned;
        self.shadowed += chunk.shadowed;
        for entry in chunk.errors {
            self.push(entry);
        }
        self.accepted.extend(chunk.accepted);
        self.tally.merge(chunk.tally);
    }

    /// Appends an entry. Failures and warnings are each bounded by the
    /// number of distinct records they name; run-level entries are always
    /// kept.
    pub fn push(&mut self, entry: RunErrorEntry) {
        let kept = match entry.kind {
            RunErrorKind::RecordFailed => self.failures.admit(entry.record_index),
            RunErrorKind::RecordWarning => self.warnings.admit(entry.record_index),
            _ => true,
        };
        self.errors_truncated = self.failures.truncated;
        self.warnings_truncated = self.warnings.truncated;
        if kept {
            self.error_log.push(entry);
        }
    }

    /// Counts every record not yet processed as failed.
    pub fn skip_remaining(&mut self, batch_size: usize) {
        let remaining = batch_size.saturating_sub(self.processed + self.failed);
        self.skipped += remaining;
        self.failed += remaining;
    }

    /// Adds overflow summary entries when records were left out.
    pub fn finish_log(&mut self) {
        if self.errors_truncated > 0 {
            self.error_log.push(RunErrorEntry::new(
                RunErrorKind::Truncated,
                format!(
                    "{} further failed records omitted (limit {})",
                    self.errors_truncated, self.max_error_entries
                ),
            ));
        }
        if self.warnings_truncated > 0 {
            self.error_log.push(RunErrorEntry::new(
                RunErrorKind::Truncated,
                format!(
                    "{} further warned records omitted (limit {})",
                    self.warnings_truncated, self.max_error_entries
                ),
            ));
        }
    }

    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        metrics.insert("records_accepted".to_string(), self.accepted.len() as f64);
        metrics.insert("records_warned".to_string(), self.warned as f64);
        metrics.insert("records_skipped".to_string(), self.skipped as f64);
        metrics.insert("rules_shadowed".to_string(), self.shadowed as f64);
        metrics.insert("chunks".to_string(), self.chunks as f64);
        metrics.insert("errors_truncated".to_string(), self.errors_truncated as f64);
        metrics.insert("warnings_truncated".to_string(), self.warnings_truncated as f64);
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(index: usize) -> RunErrorEntry {
        RunErrorEntry::new(RunErrorKind::RecordFailed, "bad").with_record(index)
    }

    #[test]
    fn record_errors_are_bounded_but_run_errors_are_kept() {
        let mut acc = RunAccumulator::new(2, BatchTally::default());
        acc.merge(ChunkOutcome {
            failed: 3,
            errors: (0..3).map(failure).collect(),
            ..ChunkOutcome::default()
        });
        acc.push(RunErrorEntry::new(RunErrorKind::Cancelled, "cancelled"));
        acc.finish_log();

        let kinds: Vec<RunErrorKind> = acc.error_log.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [
                RunErrorKind::RecordFailed,
                RunErrorKind::RecordFailed,
                RunErrorKind::Cancelled,
                RunErrorKind::Truncated
            ]
        );
        assert_eq!(acc.errors_truncated, 1);
    }

    #[test]
    fn bound_counts_records_not_entries() {
        let mut acc = RunAccumulator::new(2, BatchTally::default());
        // Record 0 breaks three rules, record 1 two, record 2 one.
        let errors = [0, 0, 0, 1, 1, 2].into_iter().map(failure).collect();
        acc.merge(ChunkOutcome {
            failed: 3,
            errors,
            ..ChunkOutcome::default()
        });
        acc.finish_log();

        let kept: Vec<Option<usize>> = acc
            .error_log
            .iter()
            .filter(|e| e.kind == RunErrorKind::RecordFailed)
            .map(|e| e.record_index)
            .collect();
        assert_eq!(kept, [Some(0), Some(0), Some(0), Some(1), Some(1)]);
        assert_eq!(acc.errors_truncated, 1);
        assert!(acc.error_log.last().unwrap().message.starts_with("1 further failed"));
    }

    #[test]
    fn warnings_have_their_own_bound() {
        let mut acc = RunAccumulator::new(1, BatchTally::default());
        acc.push(failure(0));
        for index in 1..4 {
            acc.push(
                RunErrorEntry::new(RunErrorKind::RecordWarning, "soft").with_record(index),
            );
        }
        acc.finish_log();

        assert_eq!(acc.errors_truncated, 0);
        assert_eq!(acc.warnings_truncated, 2);
        let kinds: Vec<RunErrorKind> = acc.error_log.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [
                RunErrorKind::RecordFailed,
                RunErrorKind::RecordWarning,
                RunErrorKind::Truncated
            ]
        );
        assert_eq!(acc.metrics()["warnings_truncated"], 2.0);
    }

    #[test]
    fn skipped_records_count_as_failed() {
        let mut acc = RunAccumulator::new(10, BatchTally::default());
        acc.merge(ChunkOutcome {
            processed: 4,
            failed: 1,
            ..ChunkOutcome::default()
        });
        acc.skip_remaining(20);
        assert_eq!(acc.processed + acc.failed, 20);
        assert_eq!(acc.skipped, 15);
    }
}
