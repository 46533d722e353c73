//! Persisted shapes decoded from TOML and JSON.

use serde::Deserialize;
use survey_model::{
    MappingRule, ModelError, PipelineRun, PipelineValidationRule, RunStatus, Severity,
    ThresholdMetric, TransformationRule, ValidationBody,
};

#[derive(Debug, Deserialize)]
struct Rules {
    mapping_rules: Vec<MappingRule>,
    validation_rules: Vec<PipelineValidationRule>,
}

const RULES_TOML: &str = r#"
[[mapping_rules]]
id = "age-to-generation"
source_field = "age"
target_category_code = "demographics"
target_attribute_code = "generation"
priority = 1
transformation = { type = "range_map", body = { ranges = [
    { min = 16, max = 24, label = "Gen Z" },
    { min = 25, max = 40, label = "Millennials" },
] } }

[[mapping_rules]]
id = "income-raw"
source_field = "income"
target_category_code = "finance"
target_attribute_code = "income"
is_active = false
on_error = "warning"
transformation = { type = "numeric", body = { precision = 2, min = 0 } }

[[validation_rules]]
id = "dup-rate"
pipeline_id = "weekly"
severity = "error"
rule = { type = "threshold", body = { metric = "max_duplicate_rate", source_field = "respondent_id", max_rate = 0.05 } }

[[validation_rules]]
id = "postcode-format"
pipeline_id = "weekly"
severity = "warning"
rule = { type = "regex", body = { attribute = "geo.postcode", pattern = "^[0-9]{5}$" } }
"#;

#[test]
fn rules_decode_from_toml_with_defaults() {
    let rules: Rules = toml::from_str(RULES_TOML).unwrap();

    let generation = &rules.mapping_rules[0];
    assert_eq!(generation.priority, 1);
    assert!(generation.is_active);
    assert_eq!(generation.on_error, Severity::Error);
    assert_eq!(generation.target().unwrap().to_string(), "demographics.generation");
    match &generation.transformation {
        TransformationRule::RangeMap(body) => assert_eq!(body.ranges[1].label, "Millennials"),
        other => panic!("unexpected transformation {}", other.kind()),
    }

    let income = &rules.mapping_rules[1];
    assert!(!income.is_active);
    assert_eq!(income.priority, 0);
    assert_eq!(income.on_error, Severity::Warning);

    match &rules.validation_rules[0].rule {
        ValidationBody::Threshold(ThresholdMetric::MaxDuplicateRate {
            source_field,
            max_rate,
        }) => {
            assert_eq!(source_field, "respondent_id");
            assert!((max_rate - 0.05).abs() < f64::EPSILON);
        }
        other => panic!("unexpected rule {}", other.kind()),
    }
    assert_eq!(rules.validation_rules[1].severity, Severity::Warning);
}

#[test]
fn rules_survive_a_json_round_trip() {
    let rules: Rules = toml::from_str(RULES_TOML).unwrap();
    for rule in &rules.mapping_rules {
        let json = serde_json::to_value(rule).unwrap();
        assert!(json["transformation"]["type"].is_string());
        let back: MappingRule = serde_json::from_value(json).unwrap();
        assert_eq!(&back, rule);
    }
    for rule in &rules.validation_rules {
        let json = serde_json::to_string(rule).unwrap();
        let back: PipelineValidationRule = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, rule);
    }
}

#[test]
fn overlapping_ranges_are_rejected_while_decoding() {
    let text = RULES_TOML.replace("{ min = 25, max = 40", "{ min = 24, max = 40");
    let err = toml::from_str::<Rules>(&text).unwrap_err();
    assert!(err.to_string().contains("range_map"), "{err}");
}

#[test]
fn unknown_transformation_type_is_named() {
    let json = serde_json::json!({"type": "fuzzy_match", "body": {}});
    let err = serde_json::from_value::<TransformationRule>(json).unwrap_err();
    assert!(err.to_string().contains("fuzzy_match"), "{err}");
    assert!(matches!(
        TransformationRule::try_from(survey_model::RulePayload::new(
            "fuzzy_match",
            serde_json::json!({})
        )),
        Err(ModelError::UnknownRuleType { .. })
    ));
}

#[test]
fn runs_persist_status_in_uppercase() {
    let run = PipelineRun::new(
        survey_model::PipelineId::new("weekly").unwrap(),
        chrono::Utc::now(),
    );
    let json = serde_json::to_value(&run).unwrap();
    assert_eq!(json["status"], "PENDING");
    let back: PipelineRun = serde_json::from_value(json).unwrap();
    assert_eq!(back.status, RunStatus::Pending);
    assert_eq!(back.id, run.id);
}
