use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, info_span};

use survey_cli::batch::FileSource;
use survey_cli::logging::redact_value;
use survey_cli::output::RunOutput;
use survey_model::{PipelineId, PipelineRun, RunStatus};
use survey_pipeline::{Engine, EngineDocument};

use crate::cli::{ConfigArgs, RunArgs};

pub struct RunResult {
    pub run: PipelineRun,
    /// Present for completed runs only.
    pub fingerprint: Option<String>,
}

impl RunResult {
    pub fn failed(&self) -> bool {
        self.run.status != RunStatus::Completed
    }
}

pub fn load_engine(path: &Path) -> Result<Engine> {
    let document = EngineDocument::load(path)?;
    Engine::from_config(document)
        .with_context(|| format!("configure engine from {}", path.display()))
}

pub fn run_check(args: &ConfigArgs) -> Result<Engine> {
    let engine = load_engine(&args.config)?;
    info!(config = %args.config.display(), "configuration is valid");
    Ok(engine)
}

pub fn run_pipeline(args: &RunArgs) -> Result<RunResult> {
    let engine = load_engine(&args.config)?;
    let pipeline_id = PipelineId::new(args.pipeline.as_str()).context("pipeline id")?;
    let source = FileSource::new(args.batch.clone())?;
    let span = info_span!("cli_run", pipeline_id = %pipeline_id);
    let _guard = span.enter();

    let run_id = engine.submit_run(&pipeline_id, source)?;
    info!(%run_id, batch = %args.batch.display(), "run submitted");
    let run = engine.wait_run(run_id)?;
    for entry in &run.error_log {
        debug!(
            kind = %entry.kind,
            record = ?entry.record_index,
            message = redact_value(&entry.message),
            "run error"
        );
    }

    let fingerprint = if run.status == RunStatus::Completed {
        let records = engine.run_output(run_id)?;
        let output = RunOutput::new(&run, records.as_slice())?;
        if let Some(path) = &args.output {
            output.write(path)?;
            info!(path = %path.display(), records = records.len(), "output written");
        }
        Some(output.fingerprint)
    } else {
        None
    };
    Ok(RunResult { run, fingerprint })
}
