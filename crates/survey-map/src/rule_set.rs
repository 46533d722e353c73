use std::collections::{BTreeMap, HashMap};

use survey_model::{
    AttributeKey, DataType, MappingRule, RawRecord, RuleId, Severity, TaxonomyAttribute,
    TransformationRule, Value,
};
use survey_taxonomy::TaxonomyTree;
use survey_transform::{CompiledTransform, TransformError};
use tracing::debug;

use crate::MappingError;

#[derive(Debug, Clone)]
struct RegisteredRule {
    rule: MappingRule,
    target: AttributeKey,
    compiled: CompiledTransform,
}

/// Registered mapping rules, indexed by target attribute.
#[derive(Debug, Clone, Default)]
pub struct MappingRuleSet {
    /// Registration order.
    rules: Vec<RegisteredRule>,
    ids: HashMap<RuleId, usize>,
    /// Indexes into `rules`, sorted by (priority, registration order).
    by_target: BTreeMap<AttributeKey, Vec<usize>>,
}

/// An active rule ranked after the applied one whose source field was also
/// present.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowedRule {
    pub rule_id: RuleId,
    pub attribute: AttributeKey,
    pub by: RuleId,
}

/// The applied rule's transformation failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFailure {
    pub rule_id: RuleId,
    pub attribute: AttributeKey,
    pub source_field: String,
    pub error: TransformError,
    pub severity: Severity,
}

/// Result of mapping one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingEvaluation {
    pub values: BTreeMap<AttributeKey, Value>,
    pub shadowed: Vec<ShadowedRule>,
    pub failures: Vec<RuleFailure>,
}

impl MappingEvaluation {
    /// True when at least one failure carries `error` severity.
    pub fn has_errors(&self) -> bool {
        self.failures
            .iter()
            .any(|failure| failure.severity == Severity::Error)
    }
}

impl MappingRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule against the current taxonomy.
    ///
    /// The target must resolve to an attribute of an active category and the
    /// transformation must be able to produce values of its data type.
    pub fn register_rule(
        &mut self,
        rule: MappingRule,
        taxonomy: &TaxonomyTree,
    ) -> Result<(), MappingError> {
        if self.ids.contains_key(&rule.id) {
            return Err(MappingError::DuplicateRuleId(rule.id));
        }
        let target = rule.target()?;
        let attribute = taxonomy.resolve_active(&target.category, &target.attribute)?;
        let compiled = CompiledTransform::compile(&rule.transformation)?;
        check_compatibility(&rule, &target, attribute)?;

        if rule.is_active
            && let Some(existing) = self.conflicting(&rule, &target)
        {
            return Err(MappingError::Conflict {
                rule_id: rule.id,
                existing: existing.clone(),
                attribute: target,
            });
        }

        debug!(
            rule_id = %rule.id,
            target = %target,
            kind = compiled.kind(),
            priority = rule.priority,
            "mapping rule registered"
        );
        let index = self.rules.len();
        self.ids.insert(rule.id.clone(), index);
        let group = self.by_target.entry(target.clone()).or_default();
        group.push(index);
        let rules = &self.rules;
        let priority_of = |i: usize| {
            if i == index {
                rule.priority
            } else {
                rules[i].rule.priority
            }
        };
        group.sort_by_key(|&i| (priority_of(i), i));
        self.rules.push(RegisteredRule {
            rule,
            target,
            compiled,
        });
        Ok(())
    }

    fn conflicting(&self, rule: &MappingRule, target: &AttributeKey) -> Option<&RuleId> {
        self.by_target
            .get(target)?
            .iter()
            .map(|&i| &self.rules[i].rule)
            .find(|existing| {
                existing.is_active
                    && existing.priority == rule.priority
                    && existing.source_field == rule.source_field
            })
            .map(|existing| &existing.id)
    }

    /// Marks a rule inactive; it stays registered but no longer applies.
    pub fn deactivate_rule(&mut self, id: &RuleId) -> Result<&MappingRule, MappingError> {
        let index = *self
            .ids
            .get(id)
            .ok_or_else(|| MappingError::RuleNotFound(id.clone()))?;
        let registered = &mut self.rules[index];
        registered.rule.is_active = false;
        debug!(rule_id = %id, "mapping rule deactivated");
        Ok(&registered.rule)
    }

    pub fn get(&self, id: &RuleId) -> Option<&MappingRule> {
        self.ids.get(id).map(|&i| &self.rules[i].rule)
    }

    /// Rules targeting `attribute`, in evaluation order.
    pub fn rules_for(&self, attribute: &AttributeKey) -> Vec<&MappingRule> {
        self.by_target
            .get(attribute)
            .map(|group| group.iter().map(|&i| &self.rules[i].rule).collect())
            .unwrap_or_default()
    }

    /// Rules in registration order.
    pub fn rules(&self) -> impl Iterator<Item = &MappingRule> {
        self.rules.iter().map(|registered| &registered.rule)
    }

    /// Attributes with at least one registered rule.
    pub fn targets(&self) -> impl Iterator<Item = &AttributeKey> {
        self.by_target.keys()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Maps one record. Pure: depends only on the record and the rules.
    pub fn evaluate(&self, record: &RawRecord) -> MappingEvaluation {
        let mut evaluation = MappingEvaluation::default();
        for (target, group) in &self.by_target {
            let active: Vec<&RegisteredRule> = group
                .iter()
                .map(|&i| &self.rules[i])
                .filter(|registered| registered.rule.is_active)
                .collect();
            let Some((applied_at, applied, raw)) =
                active.iter().enumerate().find_map(|(pos, registered)| {
                    record
                        .present(&registered.rule.source_field)
                        .map(|raw| (pos, *registered, raw))
                })
            else {
                continue;
            };

            match applied.compiled.apply(raw) {
                Ok(value) => {
                    evaluation.values.insert(target.clone(), value);
                }
                Err(error) => evaluation.failures.push(RuleFailure {
                    rule_id: applied.rule.id.clone(),
                    attribute: target.clone(),
                    source_field: applied.rule.source_field.clone(),
                    error,
                    severity: applied.rule.on_error,
                }),
            }

            // Only later rules that could have applied count as shadowed.
            evaluation.shadowed.extend(
                active[applied_at + 1..]
                    .iter()
                    .filter(|registered| record.present(&registered.rule.source_field).is_some())
                    .map(|registered| ShadowedRule {
                        rule_id: registered.rule.id.clone(),
                        attribute: registered.target.clone(),
                        by: applied.rule.id.clone(),
                    }),
            );
        }
        evaluation
    }
}

fn check_compatibility(
    rule: &MappingRule,
    target: &AttributeKey,
    attribute: &TaxonomyAttribute,
) -> Result<(), MappingError> {
    let mismatch = |message: String| MappingError::TypeMismatch {
        rule_id: rule.id.clone(),
        kind: rule.transformation.kind(),
        attribute: target.clone(),
        message,
    };
    match (&rule.transformation, attribute.data_type) {
        (TransformationRule::PassThrough(_), _) => Ok(()),
        (TransformationRule::Numeric(_), DataType::Number) => Ok(()),
        (TransformationRule::RangeMap(_) | TransformationRule::Lookup(_), DataType::String) => {
            Ok(())
        }
        (TransformationRule::RangeMap(_) | TransformationRule::Lookup(_), DataType::ClosedSet) => {
            let labels = rule.transformation.output_labels().unwrap_or_default();
            match labels
                .into_iter()
                .find(|label| !attribute.constraints.allows(label))
            {
                Some(label) => Err(mismatch(format!(
                    "output {label:?} is not an allowed value"
                ))),
                None => Ok(()),
            }
        }
        (_, data_type) => Err(mismatch(format!(
            "produces values incompatible with {data_type} attributes"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use survey_model::{
        AttributeConstraints, CaseNormalization, LookupBody, NumericBody, PassThroughBody,
    };

    use super::*;

    fn taxonomy() -> TaxonomyTree {
        let mut tree = TaxonomyTree::new();
        tree.add_category(None, "demo", "Demographics").unwrap();
        tree.add_attribute(
            "demo",
            "region",
            DataType::ClosedSet,
            AttributeConstraints::closed_set(["NORTH", "SOUTH"]),
            false,
        )
        .unwrap();
        tree.add_attribute(
            "demo",
            "age",
            DataType::Number,
            AttributeConstraints::default(),
            false,
        )
        .unwrap();
        tree
    }

    fn key(attribute: &str) -> AttributeKey {
        AttributeKey::new("demo", attribute).unwrap()
    }

    fn lookup(pairs: &[(&str, &str)]) -> TransformationRule {
        TransformationRule::Lookup(LookupBody {
            table: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
            normalize: CaseNormalization::Upper,
            default: None,
        })
    }

    fn rule(id: &str, field: &str, attribute: &str, t: TransformationRule, p: i32) -> MappingRule {
        MappingRule::new(RuleId::new(id).unwrap(), field, &key(attribute), t, p)
    }

    #[test]
    fn numeric_rule_cannot_target_closed_set() {
        let mut set = MappingRuleSet::new();
        let err = set
            .register_rule(
                rule("r1", "reg", "region", TransformationRule::Numeric(NumericBody::default()), 0),
                &taxonomy(),
            )
            .unwrap_err();
        assert_eq!(err.error_type(), "TypeMismatch");
    }

    #[test]
    fn lookup_outputs_must_be_allowed_values() {
        let mut set = MappingRuleSet::new();
        let err = set
            .register_rule(
                rule("r1", "reg", "region", lookup(&[("n", "NORTH"), ("w", "WEST")]), 0),
                &taxonomy(),
            )
            .unwrap_err();
        assert!(matches!(err, MappingError::TypeMismatch { .. }));
    }

    #[test]
    fn identical_active_rule_conflicts() {
        let tree = taxonomy();
        let mut set = MappingRuleSet::new();
        set.register_rule(rule("a", "reg", "region", lookup(&[("n", "NORTH")]), 1), &tree)
            .unwrap();
        let err = set
            .register_rule(rule("b", "reg", "region", lookup(&[("s", "SOUTH")]), 1), &tree)
            .unwrap_err();
        assert_eq!(err.error_type(), "Conflict");

        set.deactivate_rule(&RuleId::new("a").unwrap()).unwrap();
        set.register_rule(rule("b", "reg", "region", lookup(&[("s", "SOUTH")]), 1), &tree)
            .unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn missing_target_is_reported() {
        let mut set = MappingRuleSet::new();
        let err = set
            .register_rule(
                rule("r", "x", "height", TransformationRule::PassThrough(PassThroughBody::default()), 0),
                &taxonomy(),
            )
            .unwrap_err();
        assert_eq!(err.error_type(), "AttributeNotFound");
    }

    #[test]
    fn first_present_source_wins() {
        let tree = taxonomy();
        let mut set = MappingRuleSet::new();
        set.register_rule(
            rule("primary", "age_v2", "age", TransformationRule::Numeric(NumericBody::default()), 1),
            &tree,
        )
        .unwrap();
        set.register_rule(
            rule("fallback", "age", "age", TransformationRule::Numeric(NumericBody::default()), 2),
            &tree,
        )
        .unwrap();

        let eval = set.evaluate(&RawRecord::new().with("age", 41.4));
        assert_eq!(eval.values.get(&key("age")), Some(&Value::Number(41.0)));
        // The primary rule had nothing to read, so it was not shadowed.
        assert!(eval.shadowed.is_empty());

        let eval = set.evaluate(&RawRecord::new().with("age", 41.4).with("age_v2", 39.0));
        assert_eq!(eval.values.get(&key("age")), Some(&Value::Number(39.0)));
        assert_eq!(eval.shadowed.len(), 1);
        assert_eq!(eval.shadowed[0].rule_id.as_str(), "fallback");
        assert_eq!(eval.shadowed[0].by.as_str(), "primary");
    }

    #[test]
    fn equal_priority_uses_registration_order() {
        let tree = taxonomy();
        let mut set = MappingRuleSet::new();
        set.register_rule(rule("first", "r1", "region", lookup(&[("n", "NORTH")]), 0), &tree)
            .unwrap();
        set.register_rule(rule("second", "r2", "region", lookup(&[("n", "SOUTH")]), 0), &tree)
            .unwrap();
        let order: Vec<&str> = set
            .rules_for(&key("region"))
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(order, ["first", "second"]);

        let eval = set.evaluate(&RawRecord::new().with("r1", "n").with("r2", "n"));
        assert_eq!(eval.values.get(&key("region")), Some(&Value::text("NORTH")));
    }

    #[test]
    fn warning_failures_do_not_count_as_errors() {
        let tree = taxonomy();
        let mut set = MappingRuleSet::new();
        let mut soft = rule("soft", "reg", "region", lookup(&[("n", "NORTH")]), 0);
        soft.on_error = Severity::Warning;
        set.register_rule(soft, &tree).unwrap();

        let eval = set.evaluate(&RawRecord::new().with("reg", "east"));
        assert_eq!(eval.failures.len(), 1);
        assert!(!eval.has_errors());
        assert!(eval.values.is_empty());
    }
}
