//! CLI library components for the survey mapping engine.

pub mod batch;
pub mod logging;
pub mod output;
pub mod summary;
