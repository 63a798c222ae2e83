//! Command-line interface for engagement-pipeline.
//!
//! Provides commands for full pipeline runs, single-stage runs, and data
//! directory archival.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
