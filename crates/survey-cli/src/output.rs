//! Mapped output of a completed run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use survey_model::{PipelineId, PipelineRun, RunId};
use survey_pipeline::MappedRecord;

/// File written by `survey run --output`.
#[derive(Debug, Serialize)]
pub struct RunOutput<'a> {
    pub run_id: RunId,
    pub pipeline_id: &'a PipelineId,
    /// SHA-256 of the records; equal batches and rules give equal fingerprints.
    pub fingerprint: String,
    pub records: &'a [MappedRecord],
}

impl<'a> RunOutput<'a> {
    pub fn new(run: &'a PipelineRun, records: &'a [MappedRecord]) -> Result<Self> {
        Ok(Self {
            run_id: run.id,
            pipeline_id: &run.pipeline_id,
            fingerprint: fingerprint(records)?,
            records,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .with_context(|| format!("write {}", path.display()))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Hex SHA-256 over the compact JSON encoding of the records.
pub fn fingerprint(records: &[MappedRecord]) -> Result<String> {
    let bytes = serde_json::to_vec(records).context("encode mapped records")?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
