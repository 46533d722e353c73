//! Validation check modules.
//!
//! Each module performs one kind of check and returns the issues it found.

pub(crate) mod datatype;
pub(crate) mod not_null;
pub(crate) mod pattern;
pub(crate) mod range;
pub(crate) mod required;
pub(crate) mod threshold;

use std::collections::BTreeMap;

use survey_model::{AttributeKey, Value};

/// Attribute values produced for one record.
pub(crate) type RecordValues = BTreeMap<AttributeKey, Value>;
