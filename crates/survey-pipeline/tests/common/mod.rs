#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;

use survey_model::{
    AttributeConstraints, AttributeKey, DataPipeline, DataType, MappingRule, PipelineId,
    PipelineType, RangeBand, RangeMapBody, RawRecord, RuleId, TransformationRule,
};
use survey_pipeline::{BatchSource, Engine, EngineConfig, RetryPolicy, SourceError};

pub const PIPELINE: &str = "weekly-panel";

pub fn pipeline_id() -> PipelineId {
    PipelineId::new(PIPELINE).unwrap()
}

pub fn key(category: &str, attribute: &str) -> AttributeKey {
    AttributeKey::new(category, attribute).unwrap()
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 1,
        multiplier: 2.0,
        max_delay_ms: 5,
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        default_chunk_size: 8,
        worker_threads: Some(2),
        retry: fast_retry(2),
        ..EngineConfig::default()
    }
}

pub fn generations() -> TransformationRule {
    TransformationRule::RangeMap(RangeMapBody {
        ranges: vec![
            RangeBand::new(16.0, 24.0, "Gen Z"),
            RangeBand::new(25.0, 40.0, "Millennials"),
            RangeBand::new(41.0, 56.0, "Gen X"),
            RangeBand::new(57.0, 75.0, "Boomers"),
        ],
    })
}

/// Taxonomy `demo.generation`, an age rule and one active pipeline.
pub fn engine_with(config: EngineConfig) -> Engine {
    populate(Engine::new(config).unwrap())
}

/// Same setup as [`engine_with`] over an engine built elsewhere.
pub fn populate(mut engine: Engine) -> Engine {
    engine.register_category(None, "demo", "Demographics").unwrap();
    engine
        .register_attribute(
            "demo",
            "generation",
            DataType::ClosedSet,
            AttributeConstraints::closed_set(["Gen Z", "Millennials", "Gen X", "Boomers"]),
            false,
        )
        .unwrap();
    engine
        .register_mapping_rule(MappingRule::new(
            RuleId::new("age-to-generation").unwrap(),
            "age",
            &key("demo", "generation"),
            generations(),
            1,
        ))
        .unwrap();
    engine
        .register_pipeline(DataPipeline::new(
            pipeline_id(),
            "Weekly panel",
            PipelineType::Etl,
        ))
        .unwrap();
    engine
}

pub fn engine() -> Engine {
    engine_with(test_config())
}

pub fn respondent(id: impl Into<String>, age: f64) -> RawRecord {
    RawRecord::new()
        .with("respondent_id", id.into())
        .with("age", age)
}

/// `n` respondents aged 16..=75 with distinct ids.
pub fn batch(n: usize) -> Vec<RawRecord> {
    (0..n)
        .map(|i| respondent(format!("r-{i}"), 16.0 + (i % 60) as f64))
        .collect()
}

/// Blocks `read` until the test sends on the gate.
pub struct GatedSource {
    pub records: Vec<RawRecord>,
    pub gate: Receiver<()>,
}

impl BatchSource for GatedSource {
    fn describe(&self) -> String {
        "gated test batch".to_string()
    }

    fn read(&mut self) -> Result<Vec<RawRecord>, SourceError> {
        self.gate
            .recv()
            .map_err(|e| SourceError::new("gated", e.to_string()))?;
        Ok(self.records.clone())
    }
}

/// Fails the first `failures` reads, then returns the records.
pub struct FlakySource {
    pub records: Vec<RawRecord>,
    pub failures: usize,
    pub calls: Arc<AtomicUsize>,
}

impl BatchSource for FlakySource {
    fn describe(&self) -> String {
        "flaky test batch".to_string()
    }

    fn read(&mut self) -> Result<Vec<RawRecord>, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(SourceError::new("flaky", "connection reset"));
        }
        Ok(self.records.clone())
    }
}
