//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stratum - dependency-ordered infrastructure reconciler.
#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the desired-state document.
    #[arg(short, long, global = true, env = "STRATUM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the desired-state document and its resource graph.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what apply would change.
    Plan {
        /// Show attribute-level changes.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Converge recorded state to the document.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Operations in flight per wave, overriding the document.
        #[arg(long)]
        parallelism: Option<usize>,
    },

    /// Destroy every recorded resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Operations in flight per wave, overriding the document.
        #[arg(long)]
        parallelism: Option<usize>,
    },

    /// Print the resource graph in Graphviz DOT format.
    Graph,

    /// Manage recorded state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show recorded resources and recent history.
    Show,

    /// Release the state lock.
    Unlock {
        /// Lock ID to release.
        #[arg(long)]
        lock_id: Option<String>,

        /// Release whatever lock is held.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "stratum",
            "--output",
            "json",
            "apply",
            "--yes",
            "--parallelism",
            "4",
        ])
        .expect("parses");

        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Apply {
                yes: true,
                parallelism: Some(4)
            }
        ));
    }

    #[test]
    fn test_state_unlock_flags() {
        let cli = Cli::try_parse_from(["stratum", "state", "unlock", "--force"]).expect("parses");
        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::Unlock { lock_id: None, force: true }
            }
        ));
    }
}
