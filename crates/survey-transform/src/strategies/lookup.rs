use std::collections::HashMap;

use survey_model::{CaseNormalization, LookupBody, Value};

use super::key_text;
use crate::TransformError;

/// Lookup table with keys normalized up front.
#[derive(Debug, Clone)]
pub struct LookupTable {
    normalize: CaseNormalization,
    entries: HashMap<String, String>,
    default: Option<String>,
}

impl LookupTable {
    pub fn new(body: &LookupBody) -> Self {
        let entries = body
            .table
            .iter()
            .map(|(key, value)| (body.normalize.apply(key), value.clone()))
            .collect();
        Self {
            normalize: body.normalize,
            entries,
            default: body.default.clone(),
        }
    }

    pub fn apply(&self, raw: &Value) -> Result<Value, TransformError> {
        let key = key_text(raw).ok_or(TransformError::TypeMismatch {
            expected: "scalar",
            found: raw.type_name(),
        })?;
        let normalized = self.normalize.apply(&key);
        match self.entries.get(&normalized).or(self.default.as_ref()) {
            Some(value) => Ok(Value::Text(value.clone())),
            None => Err(TransformError::UnknownKey { key: normalized }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn body(normalize: CaseNormalization) -> LookupBody {
        let mut table = BTreeMap::new();
        table.insert("Under 25k".to_string(), "LOW".to_string());
        table.insert("25k-75k".to_string(), "MID".to_string());
        table.insert("1".to_string(), "YES".to_string());
        LookupBody {
            table,
            normalize,
            default: None,
        }
    }

    #[test]
    fn upper_normalization_ignores_case_and_padding() {
        let table = LookupTable::new(&body(CaseNormalization::Upper));
        assert_eq!(table.apply(&Value::text("  under 25K ")), Ok(Value::text("LOW")));
    }

    #[test]
    fn no_normalization_is_exact() {
        let table = LookupTable::new(&body(CaseNormalization::None));
        assert_eq!(table.apply(&Value::text("Under 25k")), Ok(Value::text("LOW")));
        assert_eq!(
            table.apply(&Value::text("under 25k")),
            Err(TransformError::UnknownKey {
                key: "under 25k".to_string()
            })
        );
    }

    #[test]
    fn numeric_inputs_use_their_text_form() {
        let table = LookupTable::new(&body(CaseNormalization::Lower));
        assert_eq!(table.apply(&Value::Number(1.0)), Ok(Value::text("YES")));
    }

    #[test]
    fn default_replaces_unknown_key() {
        let mut body = body(CaseNormalization::Upper);
        body.default = Some("OTHER".to_string());
        let table = LookupTable::new(&body);
        assert_eq!(table.apply(&Value::text("???")), Ok(Value::text("OTHER")));
    }
}
