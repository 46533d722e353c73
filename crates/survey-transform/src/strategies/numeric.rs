use survey_model::{NumericBody, Value};

use super::numeric_input;
use crate::TransformError;

/// Rounds to a fixed precision, then clamps into `[min, max]`.
#[derive(Debug, Clone)]
pub struct NumericNormalizer {
    factor: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl NumericNormalizer {
    pub fn new(body: &NumericBody) -> Self {
        Self {
            factor: 10f64.powi(body.precision as i32),
            min: body.min,
            max: body.max,
        }
    }

    /// Fails only when the input is not numeric.
    pub fn apply(&self, raw: &Value) -> Result<Value, TransformError> {
        let value = numeric_input(raw)?;
        let scaled = value * self.factor;
        // Past the scaling range every finite f64 is already integral.
        let mut out = if scaled.is_finite() {
            scaled.round() / self.factor
        } else {
            value
        };
        if let Some(min) = self.min {
            out = out.max(min);
        }
        if let Some(max) = self.max {
            out = out.min(max);
        }
        // Keep -0.0 out of the output so equal inputs serialize identically.
        if out == 0.0 {
            out = 0.0;
        }
        Ok(Value::Number(out))
    }
}
