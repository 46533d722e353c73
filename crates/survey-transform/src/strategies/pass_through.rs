use regex::Regex;
use survey_model::{ModelError, PassThroughBody, Value};

use super::key_text;
use crate::TransformError;

/// Identity transform guarded by optional bounds, length and pattern.
#[derive(Debug, Clone)]
pub struct PassThroughCheck {
    min: Option<f64>,
    max: Option<f64>,
    max_length: Option<usize>,
    pattern: Option<Regex>,
}

impl PassThroughCheck {
    /// Patterns must match the whole value.
    pub fn new(body: &PassThroughBody) -> Result<Self, ModelError> {
        let pattern = body
            .pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})$")).map_err(|e| ModelError::InvalidRuleBody {
                    kind: "pass_through".to_string(),
                    message: format!("invalid pattern: {e}"),
                })
            })
            .transpose()?;
        Ok(Self {
            min: body.min,
            max: body.max,
            max_length: body.max_length,
            pattern,
        })
    }

    pub fn apply(&self, raw: &Value) -> Result<Value, TransformError> {
        let fail = |reason: String| TransformError::ValidationFailed {
            value: raw.to_string(),
            reason,
        };
        if self.min.is_some() || self.max.is_some() {
            let value = raw
                .as_f64()
                .ok_or_else(|| fail("value is not numeric".to_string()))?;
            if let Some(min) = self.min
                && value < min
            {
                return Err(fail(format!("below minimum {min}")));
            }
            if let Some(max) = self.max
                && value > max
            {
                return Err(fail(format!("above maximum {max}")));
            }
        }
        if self.max_length.is_some() || self.pattern.is_some() {
            let text = key_text(raw).ok_or_else(|| fail("value is null".to_string()))?;
            if let Some(max_length) = self.max_length
                && text.chars().count() > max_length
            {
                return Err(fail(format!("longer than {max_length} characters")));
            }
            if let Some(pattern) = &self.pattern
                && !pattern.is_match(&text)
            {
                return Err(fail(format!("does not match {}", pattern.as_str())));
            }
        }
        Ok(raw.clone())
    }
}
