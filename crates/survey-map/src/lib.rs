//! Mapping rule set: raw record fields to taxonomy attribute values.
//!
//! Rules are grouped by target attribute. Within a group the active rules are
//! ordered by priority (lower first), ties broken by registration order, and
//! the first rule whose source field is present on the record produces the
//! attribute. Active rules ranked after it whose source field is also present
//! are reported as shadowed.

#![deny(unsafe_code)]

mod error;
mod rule_set;

pub use error::MappingError;
pub use rule_set::{MappingEvaluation, MappingRuleSet, RuleFailure, ShadowedRule};
