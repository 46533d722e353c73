use survey_model::{RangeBand, RangeMapBody, Value};

use super::numeric_input;
use crate::TransformError;

/// Inclusive, disjoint bands sorted by lower bound.
#[derive(Debug, Clone)]
pub struct RangeMapper {
    bands: Vec<RangeBand>,
}

impl RangeMapper {
    /// The body must already have passed `TransformationRule::validate`.
    pub fn new(body: &RangeMapBody) -> Self {
        Self {
            bands: body.ranges.clone(),
        }
    }

    pub fn apply(&self, raw: &Value) -> Result<Value, TransformError> {
        let value = numeric_input(raw)?;
        self.label_for(value)
            .map(|label| Value::Text(label.to_string()))
            .ok_or(TransformError::UnmappedRange { value })
    }

    /// Binary search for the last band starting at or below `value`.
    pub fn label_for(&self, value: f64) -> Option<&str> {
        let idx = self.bands.partition_point(|band| band.min <= value);
        let band = self.bands.get(idx.checked_sub(1)?)?;
        band.contains(value).then_some(band.label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generations() -> RangeMapper {
        RangeMapper::new(&RangeMapBody {
            ranges: vec![
                RangeBand::new(16.0, 24.0, "Gen Z"),
                RangeBand::new(25.0, 40.0, "Millennials"),
                RangeBand::new(41.0, 56.0, "Gen X"),
            ],
        })
    }

    #[test]
    fn maps_value_inside_a_band() {
        let mapper = generations();
        assert_eq!(
            mapper.apply(&Value::Number(30.0)),
            Ok(Value::text("Millennials"))
        );
        assert_eq!(mapper.apply(&Value::text("16")), Ok(Value::text("Gen Z")));
        assert_eq!(mapper.apply(&Value::Number(56.0)), Ok(Value::text("Gen X")));
    }

    #[test]
    fn values_outside_or_between_bands_are_unmapped() {
        let mapper = generations();
        assert_eq!(
            mapper.apply(&Value::Number(15.0)),
            Err(TransformError::UnmappedRange { value: 15.0 })
        );
        assert!(mapper.apply(&Value::Number(24.5)).is_err());
        assert!(mapper.apply(&Value::Number(57.0)).is_err());
    }

    #[test]
    fn non_numeric_input_is_a_type_mismatch() {
        assert!(matches!(
            generations().apply(&Value::text("thirty")),
            Err(TransformError::TypeMismatch { .. })
        ));
    }
}
