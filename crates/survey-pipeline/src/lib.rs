//! Pipeline execution for the survey mapping engine.
//!
//! - [`PipelineRunCoordinator`] drives runs: single-flight per pipeline,
//!   chunked parallel processing, barrier, aggregate validation
//! - [`ErrorSink`] stores resolvable error entries with retried writes
//! - [`Engine`] is the facade tying taxonomy, rules, pipelines and runs
//!   together, loadable from a TOML [`EngineDocument`]

#![deny(unsafe_code)]

mod accumulator;
pub mod config;
mod coordinator;
mod engine;
mod error;
mod retry;
pub mod sink;
pub mod source;
mod worker;

pub use accumulator::{ChunkOutcome, RunAccumulator};
pub use config::{AttributeDefinition, CategoryDefinition, EngineConfig, EngineDocument};
pub use coordinator::{MappedRecord, PipelineRunCoordinator, RunContext, RunStatusReport};
pub use engine::Engine;
pub use error::{ConfigError, EngineError, PipelineError, SourceError, StoreError};
pub use retry::RetryPolicy;
pub use sink::{
    DEFAULT_PENDING_LIMIT, ErrorQuery, ErrorSink, ErrorStore, InMemoryErrorStore, SinkWrite,
};
pub use source::BatchSource;
