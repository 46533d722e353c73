//! Validation rule registry and execution.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use regex::Regex;
use survey_model::{
    AttributeKey, PipelineId, PipelineValidationRule, RuleId, ThresholdMetric, Value,
    ValidationBody,
};
use survey_taxonomy::TaxonomyTree;
use tracing::debug;

use crate::checks::{datatype, not_null, pattern, range, required, threshold};
use crate::{AttributeSchema, BatchTally, ValidationConfigError, Violation};

#[derive(Debug, Clone)]
enum CompiledCheck {
    NotNull(AttributeKey),
    Range {
        attribute: AttributeKey,
        min: Option<f64>,
        max: Option<f64>,
    },
    Regex {
        attribute: AttributeKey,
        regex: Regex,
    },
    Threshold(ThresholdMetric),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: PipelineValidationRule,
    check: CompiledCheck,
}

/// Validation rules per pipeline, compiled at registration.
#[derive(Debug, Clone, Default)]
pub struct ValidationEngine {
    rules: BTreeMap<PipelineId, Vec<CompiledRule>>,
    ids: HashSet<RuleId>,
}

impl ValidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `rule` for `pipeline_id`.
    ///
    /// Attribute references must resolve in the taxonomy and regex patterns
    /// must compile.
    pub fn register_rule(
        &mut self,
        pipeline_id: &PipelineId,
        rule: PipelineValidationRule,
        taxonomy: &TaxonomyTree,
    ) -> Result<(), ValidationConfigError> {
        if &rule.pipeline_id != pipeline_id {
            return Err(ValidationConfigError::PipelineMismatch {
                rule_id: rule.id,
                expected: pipeline_id.clone(),
                found: rule.pipeline_id,
            });
        }
        if self.ids.contains(&rule.id) {
            return Err(ValidationConfigError::DuplicateRuleId(rule.id));
        }
        rule.rule.validate()?;
        if let Some(attribute) = rule.rule.attribute() {
            taxonomy.resolve_key(attribute)?;
        }
        let check = compile(&rule)?;

        debug!(
            rule_id = %rule.id,
            pipeline_id = %pipeline_id,
            kind = rule.rule.kind(),
            severity = %rule.severity,
            "validation rule registered"
        );
        self.ids.insert(rule.id.clone());
        self.rules
            .entry(pipeline_id.clone())
            .or_default()
            .push(CompiledRule { rule, check });
        Ok(())
    }

    pub fn deactivate_rule(&mut self, id: &RuleId) -> Result<(), ValidationConfigError> {
        let compiled = self
            .rules
            .values_mut()
            .flatten()
            .find(|compiled| &compiled.rule.id == id)
            .ok_or_else(|| ValidationConfigError::RuleNotFound(id.clone()))?;
        compiled.rule.is_active = false;
        Ok(())
    }

    /// Rules registered for a pipeline, in registration order.
    pub fn rules_for(&self, pipeline_id: &PipelineId) -> Vec<&PipelineValidationRule> {
        self.rules
            .get(pipeline_id)
            .map(|rules| rules.iter().map(|compiled| &compiled.rule).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn active(&self, pipeline_id: &PipelineId) -> impl Iterator<Item = &CompiledRule> {
        self.rules
            .get(pipeline_id)
            .into_iter()
            .flatten()
            .filter(|compiled| compiled.rule.is_active)
    }

    /// Built-in taxonomy checks followed by the pipeline's per-record rules.
    pub fn validate_record(
        &self,
        pipeline_id: &PipelineId,
        values: &BTreeMap<AttributeKey, Value>,
        schema: &AttributeSchema,
    ) -> Vec<Violation> {
        let mut violations: Vec<Violation> = required::check(values, schema)
            .into_iter()
            .chain(datatype::check(values, schema))
            .map(Violation::builtin)
            .collect();

        for compiled in self.active(pipeline_id) {
            let issue = match &compiled.check {
                CompiledCheck::NotNull(attribute) => not_null::check(values, attribute),
                CompiledCheck::Range {
                    attribute,
                    min,
                    max,
                } => range::check(values, attribute, *min, *max),
                CompiledCheck::Regex { attribute, regex } => {
                    pattern::check(values, attribute, regex)
                }
                CompiledCheck::Threshold(_) => None,
            };
            violations.extend(
                issue.map(|issue| {
                    Violation::from_rule(&compiled.rule.id, compiled.rule.severity, issue)
                }),
            );
        }
        violations
    }

    /// Threshold rules against the merged tally of a finished batch.
    pub fn validate_aggregate(&self, pipeline_id: &PipelineId, tally: &BatchTally) -> Vec<Violation> {
        self.active(pipeline_id)
            .filter_map(|compiled| match &compiled.check {
                CompiledCheck::Threshold(metric) => threshold::check(metric, tally).map(|issue| {
                    Violation::from_rule(&compiled.rule.id, compiled.rule.severity, issue)
                }),
                _ => None,
            })
            .collect()
    }

    /// An empty tally tracking what the pipeline's threshold rules need.
    pub fn tally_for(&self, pipeline_id: &PipelineId) -> BatchTally {
        let mut fields = BTreeSet::new();
        let mut attributes = BTreeSet::new();
        for compiled in self.active(pipeline_id) {
            match &compiled.check {
                CompiledCheck::Threshold(ThresholdMetric::MaxDuplicateRate {
                    source_field, ..
                }) => {
                    fields.insert(source_field.clone());
                }
                CompiledCheck::Threshold(ThresholdMetric::MinGroupSize { attribute, .. }) => {
                    attributes.insert(attribute.clone());
                }
                _ => {}
            }
        }
        BatchTally::new(fields, attributes)
    }
}

fn compile(rule: &PipelineValidationRule) -> Result<CompiledCheck, ValidationConfigError> {
    Ok(match &rule.rule {
        ValidationBody::NotNull(body) => CompiledCheck::NotNull(body.attribute.clone()),
        ValidationBody::Range(body) => CompiledCheck::Range {
            attribute: body.attribute.clone(),
            min: body.min,
            max: body.max,
        },
        ValidationBody::Regex(body) => CompiledCheck::Regex {
            attribute: body.attribute.clone(),
            regex: Regex::new(&body.pattern).map_err(|e| {
                ValidationConfigError::InvalidRuleBody {
                    rule_id: rule.id.clone(),
                    kind: "regex",
                    message: e.to_string(),
                }
            })?,
        },
        ValidationBody::Threshold(metric) => CompiledCheck::Threshold(metric.clone()),
    })
}

#[cfg(test)]
mod tests {
    use survey_model::{AttributeConstraints, DataType, RegexBody, Severity};

    use super::*;

    fn taxonomy() -> TaxonomyTree {
        let mut tree = TaxonomyTree::new();
        tree.add_category(None, "contact", "Contact").unwrap();
        tree.add_attribute(
            "contact",
            "postcode",
            DataType::String,
            AttributeConstraints::default(),
            false,
        )
        .unwrap();
        tree
    }

    fn pipeline() -> PipelineId {
        PipelineId::new("p1").unwrap()
    }

    fn regex_rule(pattern: &str) -> PipelineValidationRule {
        PipelineValidationRule::new(
            RuleId::new("postcode-format").unwrap(),
            pipeline(),
            ValidationBody::Regex(RegexBody {
                attribute: AttributeKey::new("contact", "postcode").unwrap(),
                pattern: pattern.to_string(),
            }),
            Severity::Warning,
        )
    }

    #[test]
    fn invalid_regex_is_rejected_at_registration() {
        let mut engine = ValidationEngine::new();
        let err = engine
            .register_rule(&pipeline(), regex_rule("([0-9"), &taxonomy())
            .unwrap_err();
        assert_eq!(err.error_type(), "InvalidRuleBody");
        assert!(engine.is_empty());
    }

    #[test]
    fn warning_violation_does_not_fail() {
        let mut engine = ValidationEngine::new();
        engine
            .register_rule(&pipeline(), regex_rule(r"^\d{5}$"), &taxonomy())
            .unwrap();
        let schema = AttributeSchema::from_taxonomy(&taxonomy()).unwrap();
        let mut values = BTreeMap::new();
        values.insert(
            AttributeKey::new("contact", "postcode").unwrap(),
            Value::text("ABC"),
        );

        let violations = engine.validate_record(&pipeline(), &values, &schema);
        assert_eq!(violations.len(), 1);
        assert!(!crate::fails(&violations));
        assert_eq!(violations[0].issue.check(), "regex");
    }

    #[test]
    fn rule_for_other_pipeline_is_rejected() {
        let mut engine = ValidationEngine::new();
        let err = engine
            .register_rule(&PipelineId::new("p2").unwrap(), regex_rule("x"), &taxonomy())
            .unwrap_err();
        assert!(matches!(err, ValidationConfigError::PipelineMismatch { .. }));
    }
}
