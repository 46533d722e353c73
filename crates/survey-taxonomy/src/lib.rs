//! Taxonomy tree: categories, attributes and their hierarchy invariants.
//!
//! Categories live in an arena keyed by their unique code, with explicit
//! parent-code and children indexes. Nothing outside the tree holds
//! references into it; every lookup goes through a code.

#![deny(unsafe_code)]

mod error;
mod tree;

pub use error::TaxonomyError;
pub use tree::{TaxonomySnapshot, TaxonomyTree};
