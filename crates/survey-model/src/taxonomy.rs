//! Taxonomy categories and attributes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{AttributeId, CategoryId};
use crate::{ModelError, Result};

/// Validates a category or attribute code: ASCII alphanumerics, `_` and `-`.
pub fn validate_code(code: &str) -> Result<String> {
    let trimmed = code.trim();
    let valid = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(ModelError::InvalidCode(code.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyCategory {
    pub id: CategoryId,
    pub code: String,
    pub name: String,
    pub parent_code: Option<String>,
    pub is_active: bool,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Number,
    Boolean,
    ClosedSet,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::ClosedSet => "closed_set",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-dependent constraints attached to an attribute.
///
/// - `closed_set`: `allowed_values` (required, non-empty)
/// - `number`: optional `min` / `max`
/// - `string`: optional `max_length` / `pattern`
/// - `boolean`: none
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttributeConstraints {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl AttributeConstraints {
    pub fn closed_set<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_values: values.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Checks that the payload shape fits `data_type`.
    pub fn check_shape(&self, data_type: DataType) -> Result<()> {
        let fail = |message: &str| {
            Err(ModelError::InvalidConstraints {
                data_type: data_type.to_string(),
                message: message.to_string(),
            })
        };
        let has_bounds = self.min.is_some() || self.max.is_some();
        let has_text = self.max_length.is_some() || self.pattern.is_some();
        match data_type {
            DataType::ClosedSet => {
                if self.allowed_values.is_empty() {
                    return fail("allowed_values must not be empty");
                }
                if has_bounds || has_text {
                    return fail("only allowed_values may be set");
                }
            }
            DataType::Number => {
                if !self.allowed_values.is_empty() || has_text {
                    return fail("only min/max may be set");
                }
                if let (Some(min), Some(max)) = (self.min, self.max)
                    && min > max
                {
                    return fail("min is greater than max");
                }
            }
            DataType::String => {
                if !self.allowed_values.is_empty() || has_bounds {
                    return fail("only max_length/pattern may be set");
                }
            }
            DataType::Boolean => {
                if *self != Self::default() {
                    return fail("boolean attributes take no constraints");
                }
            }
        }
        Ok(())
    }

    pub fn allows(&self, value: &str) -> bool {
        self.allowed_values.iter().any(|allowed| allowed == value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyAttribute {
    pub id: AttributeId,
    pub category_code: String,
    pub code: String,
    pub data_type: DataType,
    #[serde(default)]
    pub constraints: AttributeConstraints,
    #[serde(default)]
    pub is_required: bool,
}

impl TaxonomyAttribute {
    pub fn key(&self) -> AttributeKey {
        AttributeKey {
            category: self.category_code.clone(),
            attribute: self.code.clone(),
        }
    }
}

/// Fully qualified attribute reference, rendered `category.attribute`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttributeKey {
    pub category: String,
    pub attribute: String,
}

impl AttributeKey {
    pub fn new(category: &str, attribute: &str) -> Result<Self> {
        Ok(Self {
            category: validate_code(category)?,
            attribute: validate_code(attribute)?,
        })
    }

    pub fn parse(value: &str) -> Result<Self> {
        let (category, attribute) = value
            .split_once('.')
            .ok_or_else(|| ModelError::InvalidAttributeKey(value.to_string()))?;
        Self::new(category, attribute)
            .map_err(|_| ModelError::InvalidAttributeKey(value.to_string()))
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.attribute)
    }
}

impl TryFrom<String> for AttributeKey {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AttributeKey> for String {
    fn from(value: AttributeKey) -> Self {
        value.to_string()
    }
}
