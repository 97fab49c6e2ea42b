//! CLI module for the stratum tool.
//!
//! This module provides the command-line interface for planning,
//! applying and destroying resources.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
