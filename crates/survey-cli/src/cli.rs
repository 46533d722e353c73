//! CLI argument definitions for the survey mapping engine.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "survey",
    version,
    about = "Survey taxonomy mapping engine",
    long_about = "Map raw survey records onto a managed category/attribute taxonomy.\n\n\
                  Loads an engine configuration (taxonomy, mapping rules, pipelines and\n\
                  validation rules) from TOML and runs batches of JSON or CSV records\n\
                  through a pipeline."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for debug, -vv for trace, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Allow raw respondent values in log output.
    #[arg(long = "log-data", global = true)]
    pub log_data: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a batch of records through a pipeline.
    Run(RunArgs),

    /// Load and validate an engine configuration.
    Check(ConfigArgs),

    /// Print the category tree of an engine configuration.
    Taxonomy(ConfigArgs),
}

#[derive(Parser)]
pub struct ConfigArgs {
    /// Engine configuration file (TOML).
    #[arg(long = "config", short = 'c', value_name = "PATH")]
    pub config: PathBuf,
}

#[derive(Parser)]
pub struct RunArgs {
    /// Engine configuration file (TOML).
    #[arg(long = "config", short = 'c', value_name = "PATH")]
    pub config: PathBuf,

    /// Pipeline to run.
    #[arg(long = "pipeline", short = 'p', value_name = "ID")]
    pub pipeline: String,

    /// Batch of raw records (.json, .jsonl or .csv).
    #[arg(long = "batch", short = 'b', value_name = "PATH")]
    pub batch: PathBuf,

    /// Write the mapped records of a completed run to this file.
    #[arg(long = "output", short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
