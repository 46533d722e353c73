//! Validation of mapped records and whole batches.
//!
//! Per-record checks run on each record's attribute values: the built-in
//! taxonomy checks (required attributes, data types, allowed values) plus the
//! pipeline's `not_null`, `range` and `regex` rules. Threshold rules run once
//! per batch against a [`BatchTally`] after every record has been processed.

#![deny(unsafe_code)]

mod checks;
mod engine;
mod error;
mod issue;
mod schema;
mod tally;

pub use engine::ValidationEngine;
pub use error::ValidationConfigError;
pub use issue::{Issue, Violation, fails};
pub use schema::AttributeSchema;
pub use tally::BatchTally;
