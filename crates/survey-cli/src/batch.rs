//! Batch files read by `survey run`.

use std::fs;
use std::path::{Path, PathBuf};

use survey_model::{RawRecord, Value};
use survey_pipeline::{BatchSource, SourceError};
use tracing::{Level, debug, trace};

use crate::logging::redact_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFormat {
    /// A JSON array of objects.
    Json,
    /// One JSON object per line.
    JsonLines,
    /// Header row plus one record per row; empty cells are null.
    Csv,
}

impl BatchFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "json" => Some(Self::Json),
            "jsonl" | "ndjson" => Some(Self::JsonLines),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

/// Reads a batch from disk each time the run asks for it.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    format: BatchFormat,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let format = BatchFormat::from_path(&path).ok_or_else(|| {
            SourceError::new(
                path.display().to_string(),
                "unsupported batch file extension (expected .json, .jsonl or .csv)",
            )
        })?;
        Ok(Self { path, format })
    }

    pub fn format(&self) -> BatchFormat {
        self.format
    }

    fn error(&self, message: impl std::fmt::Display) -> SourceError {
        SourceError::new(self.path.display().to_string(), message.to_string())
    }

    fn parse_json(&self, text: &str) -> Result<Vec<RawRecord>, SourceError> {
        serde_json::from_str(text).map_err(|err| self.error(err))
    }

    fn parse_json_lines(&self, text: &str) -> Result<Vec<RawRecord>, SourceError> {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str(line)
                    .map_err(|err| self.error(format!("line {}: {err}", number + 1)))
            })
            .collect()
    }

    fn parse_csv(&self, text: &str) -> Result<Vec<RawRecord>, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let headers = reader.headers().map_err(|err| self.error(err))?.clone();
        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|err| self.error(err))?;
            let record: RawRecord = headers
                .iter()
                .zip(row.iter())
                .map(|(field, cell)| (field, csv_value(cell)))
                .collect();
            records.push(record);
        }
        Ok(records)
    }
}

fn csv_value(cell: &str) -> Value {
    if cell.is_empty() {
        Value::Null
    } else {
        Value::text(cell)
    }
}

impl BatchSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&mut self) -> Result<Vec<RawRecord>, SourceError> {
        let text = fs::read_to_string(&self.path).map_err(|err| self.error(err))?;
        let records = match self.format {
            BatchFormat::Json => self.parse_json(&text)?,
            BatchFormat::JsonLines => self.parse_json_lines(&text)?,
            BatchFormat::Csv => self.parse_csv(&text)?,
        };
        debug!(path = %self.path.display(), records = records.len(), "batch read");
        if tracing::enabled!(Level::TRACE) {
            for (index, record) in records.iter().enumerate() {
                let fields = serde_json::to_string(record).unwrap_or_default();
                trace!(index, fields = redact_value(&fields), "batch record");
            }
        }
        Ok(records)
    }
}
