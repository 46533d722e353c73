//! Attribute definitions prepared for per-record checks.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use survey_model::{AttributeConstraints, AttributeKey, DataType};
use survey_taxonomy::{TaxonomyError, TaxonomyTree};

use crate::ValidationConfigError;

#[derive(Debug, Clone)]
pub(crate) struct AttributeSpec {
    pub data_type: DataType,
    pub constraints: AttributeConstraints,
    /// Anchored form of `constraints.pattern`.
    pub pattern: Option<Regex>,
}

/// Snapshot of the taxonomy's attributes with patterns compiled.
///
/// Built once per run so a record never recompiles a pattern.
#[derive(Debug, Clone, Default)]
pub struct AttributeSchema {
    attributes: BTreeMap<AttributeKey, AttributeSpec>,
    required: BTreeMap<String, BTreeSet<AttributeKey>>,
}

impl AttributeSchema {
    pub fn from_taxonomy(taxonomy: &TaxonomyTree) -> Result<Self, ValidationConfigError> {
        let mut schema = Self::default();
        for attribute in taxonomy.attributes() {
            let key = attribute.key();
            let pattern = attribute
                .constraints
                .pattern
                .as_deref()
                .map(|pattern| Regex::new(&format!("^(?:{pattern})$")))
                .transpose()
                .map_err(|e| TaxonomyError::InvalidConstraints {
                    attribute: key.to_string(),
                    message: e.to_string(),
                })?;
            if attribute.is_required {
                schema
                    .required
                    .entry(attribute.category_code.clone())
                    .or_default()
                    .insert(key.clone());
            }
            schema.attributes.insert(
                key,
                AttributeSpec {
                    data_type: attribute.data_type,
                    constraints: attribute.constraints.clone(),
                    pattern,
                },
            );
        }
        Ok(schema)
    }

    pub(crate) fn spec(&self, key: &AttributeKey) -> Option<&AttributeSpec> {
        self.attributes.get(key)
    }

    /// Required attributes of `category`.
    pub fn required_in(&self, category: &str) -> impl Iterator<Item = &AttributeKey> {
        self.required.get(category).into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}
