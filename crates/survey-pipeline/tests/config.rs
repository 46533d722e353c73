use std::io::Write;

use survey_model::{AttributeKey, RawRecord, RunStatus, Value};
use survey_pipeline::{Engine, EngineDocument, ErrorQuery};

const ENGINE_TOML: &str = r#"
[engine]
max_error_entries = 20
default_chunk_size = 4
worker_threads = 2

[[categories]]
code = "demo"
name = "Demographics"

[[categories]]
code = "legacy"
name = "Legacy panel"
parent = "demo"
is_active = false

[[attributes]]
category = "demo"
code = "generation"
data_type = "closed_set"
constraints = { allowed_values = ["Gen Z", "Millennials", "Gen X"] }

[[attributes]]
category = "demo"
code = "region"
data_type = "string"

[[pipelines]]
id = "weekly"
name = "Weekly panel"
type = "ETL"

[[mapping_rules]]
id = "age-to-generation"
source_field = "age"
target_category_code = "demo"
target_attribute_code = "generation"
transformation = { type = "range_map", body = { ranges = [
    { min = 16, max = 24, label = "Gen Z" },
    { min = 25, max = 40, label = "Millennials" },
    { min = 41, max = 56, label = "Gen X" },
] } }

[[mapping_rules]]
id = "region-lookup"
source_field = "region"
target_category_code = "demo"
target_attribute_code = "region"
transformation = { type = "lookup", body = { table = { n = "NORTH", s = "SOUTH" }, default = "OTHER" } }

[[validation_rules]]
id = "region-present"
pipeline_id = "weekly"
rule = { type = "not_null", body = { attribute = "demo.region" } }
"#;

#[test]
fn engine_loads_from_a_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(ENGINE_TOML.as_bytes()).unwrap();
    let document = EngineDocument::load(file.path()).unwrap();
    let engine = Engine::from_config(document).unwrap();

    assert_eq!(engine.taxonomy().category_count(), 2);
    assert!(!engine.taxonomy().category("legacy").unwrap().is_active);
    assert_eq!(engine.mapping_rules().len(), 2);

    let pipeline = survey_model::PipelineId::new("weekly").unwrap();
    let run_id = engine
        .submit_run(
            &pipeline,
            vec![
                RawRecord::new().with("age", 33.0).with("region", "n"),
                RawRecord::new().with("age", 19.0),
            ],
        )
        .unwrap();
    let run = engine.wait_run(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_processed, 1);
    assert_eq!(run.records_failed, 1);
    assert_eq!(
        run.error_log[0].rule_id.as_ref().map(|id| id.as_str()),
        Some("region-present")
    );

    let output = engine.run_output(run_id).unwrap();
    let region = AttributeKey::parse("demo.region").unwrap();
    assert_eq!(output[0].values.get(&region), Some(&Value::text("NORTH")));
}

#[test]
fn rule_against_missing_pipeline_is_rejected_and_logged() {
    let text = ENGINE_TOML.replace("pipeline_id = \"weekly\"", "pipeline_id = \"monthly\"");
    let document = EngineDocument::from_toml_str(&text).unwrap();
    let err = Engine::from_config(document).unwrap_err();
    assert_eq!(err.error_type(), "PipelineNotFound");
}

#[test]
fn unknown_validation_type_fails_to_parse() {
    let text = ENGINE_TOML.replace("type = \"not_null\"", "type = \"not_empty\"");
    let err = EngineDocument::from_toml_str(&text).unwrap_err();
    assert!(err.to_string().contains("not_empty"));
}

#[test]
fn config_errors_reach_the_sink() {
    let document = EngineDocument::from_toml_str(ENGINE_TOML).unwrap();
    let mut engine = Engine::from_config(document).unwrap();
    assert!(engine.register_category(Some("missing"), "child", "Child").is_err());
    let logged = engine
        .errors()
        .query(&ErrorQuery::new().error_type("ParentNotFound"));
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].source_id.as_deref(), Some("child"));
}
