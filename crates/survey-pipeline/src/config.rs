//! Engine settings and whole-engine TOML documents.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use survey_model::{
    AttributeConstraints, DataPipeline, DataType, MappingRule, PipelineValidationRule,
};

use crate::{ConfigError, RetryPolicy};

/// Runtime settings of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Record-level entries kept per run error log.
    pub max_error_entries: usize,
    /// Records per chunk unless the pipeline sets `chunk_size`.
    pub default_chunk_size: usize,
    /// Run timeout unless the pipeline sets `timeout_ms`.
    pub default_timeout_ms: Option<u64>,
    /// Worker pool size; defaults to the number of CPUs.
    pub worker_threads: Option<usize>,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_error_entries: 100,
            default_chunk_size: 256,
            default_timeout_ms: None,
            worker_threads: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "default_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(ConfigError::Invalid(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be a finite number >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryDefinition {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeDefinition {
    pub category: String,
    pub code: String,
    pub data_type: DataType,
    #[serde(default)]
    pub constraints: AttributeConstraints,
    #[serde(default)]
    pub is_required: bool,
}

fn default_true() -> bool {
    true
}

/// A complete engine setup: settings, taxonomy, rules and pipelines.
///
/// Categories are applied in order, so parents must be listed before their
/// children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineDocument {
    pub engine: EngineConfig,
    pub categories: Vec<CategoryDefinition>,
    pub attributes: Vec<AttributeDefinition>,
    pub mapping_rules: Vec<MappingRule>,
    pub pipelines: Vec<DataPipeline>,
    pub validation_rules: Vec<PipelineValidationRule>,
}

impl EngineDocument {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use survey_model::{Severity, TransformationRule, ValidationBody};

    use super::*;

    const DOCUMENT: &str = r#"
[engine]
max_error_entries = 50
default_chunk_size = 10

[engine.retry]
max_attempts = 2
base_delay_ms = 1

[[categories]]
code = "demo"
name = "Demographics"

[[attributes]]
category = "demo"
code = "generation"
data_type = "closed_set"
constraints = { allowed_values = ["Gen Z", "Millennials"] }
is_required = true

[[mapping_rules]]
id = "age-to-generation"
source_field = "age"
target_category_code = "demo"
target_attribute_code = "generation"
priority = 1

[mapping_rules.transformation]
type = "range_map"
body = { ranges = [
    { min = 16, max = 24, label = "Gen Z" },
    { min = 25, max = 40, label = "Millennials" },
] }

[[pipelines]]
id = "weekly"
name = "Weekly panel"
type = "ETL"
configuration = { timeout_ms = 60000 }

[[validation_rules]]
id = "dedupe"
pipeline_id = "weekly"
severity = "error"
rule = { type = "threshold", body = { metric = "max_duplicate_rate", source_field = "respondent_id", max_rate = 0.05 } }
"#;

    #[test]
    fn parses_full_document() {
        let doc = EngineDocument::from_toml_str(DOCUMENT).unwrap();
        assert_eq!(doc.engine.max_error_entries, 50);
        assert_eq!(doc.engine.retry.max_attempts, 2);
        assert_eq!(doc.engine.retry.multiplier, 2.0);
        assert_eq!(doc.attributes[0].data_type, DataType::ClosedSet);
        assert!(matches!(
            doc.mapping_rules[0].transformation,
            TransformationRule::RangeMap(_)
        ));
        assert_eq!(doc.pipelines[0].configuration.timeout_ms, Some(60_000));
        assert_eq!(doc.validation_rules[0].severity, Severity::Error);
        assert!(matches!(
            doc.validation_rules[0].rule,
            ValidationBody::Threshold(_)
        ));
        doc.engine.validate().unwrap();
    }

    #[test]
    fn unknown_rule_type_is_a_parse_error() {
        let text = DOCUMENT.replace("type = \"range_map\"", "type = \"regex_map\"");
        let err = EngineDocument::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("regex_map"));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config = EngineConfig {
            default_chunk_size: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
