//! Discriminated payload shared by transformation and validation bodies.
//!
//! Persisted as `{"type": "<kind>", "body": {...}}`. Decoding always goes
//! through [`RulePayload`] so that an unknown `type` is reported as such
//! instead of being coerced into some other kind.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{ModelError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulePayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_body")]
    pub body: serde_json::Value,
}

fn empty_body() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl RulePayload {
    pub fn new(kind: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            body,
        }
    }

    /// Decodes the body against the typed schema for this kind.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| ModelError::InvalidRuleBody {
            kind: self.kind.clone(),
            message: e.to_string(),
        })
    }
}
