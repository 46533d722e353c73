//! Transformation strategies for mapping rules.
//!
//! One strategy per rule kind:
//!
//! - **range_map**: numeric value to the label of the band containing it
//! - **lookup**: case-normalized key to a table value
//! - **pass_through**: identity, guarded by bounds and a pattern
//! - **numeric**: round to a precision, then clamp
//!
//! Bodies are compiled once (regexes built, lookup keys normalized) into a
//! [`CompiledTransform`]. Applying it has no side effects and depends only on
//! the input value and the body.

#![deny(unsafe_code)]

mod error;
pub mod strategies;

pub use error::TransformError;
pub use strategies::{
    CompiledTransform, LookupTable, NumericNormalizer, PassThroughCheck, RangeMapper,
};
