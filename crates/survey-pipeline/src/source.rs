//! Where a run's batch comes from.

use survey_model::RawRecord;

use crate::SourceError;

/// Supplies the records of one run.
///
/// `read` is called on the run's worker thread and retried with the engine's
/// retry policy, so it should be safe to call again after a failure.
pub trait BatchSource: Send {
    /// Short description used in logs and error entries.
    fn describe(&self) -> String;

    fn read(&mut self) -> Result<Vec<RawRecord>, SourceError>;
}

impl BatchSource for Vec<RawRecord> {
    fn describe(&self) -> String {
        format!("in-memory batch of {} records", self.len())
    }

    fn read(&mut self) -> Result<Vec<RawRecord>, SourceError> {
        Ok(self.clone())
    }
}

impl<S: BatchSource + ?Sized> BatchSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn read(&mut self) -> Result<Vec<RawRecord>, SourceError> {
        (**self).read()
    }
}
