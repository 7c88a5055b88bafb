//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Replay command arguments.
#[derive(Debug, Args)]
pub struct ReplayCommand {
    /// JSON-lines file of recorded events. A trip left in flight by an
    /// earlier replay is continued before the file is applied.
    pub file: PathBuf,

    /// Touch nothing on disk: no history, no in-flight snapshot
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Trip history commands.
#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// List recent trips, newest first
    List {
        /// Maximum number of trips to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show one trip
    Show {
        /// Trip identifier
        id: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete one trip
    Delete {
        /// Trip identifier
        id: String,
    },

    /// Delete every trip
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_command_debug() {
        let cmd = StatusCommand { json: true };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("json"));
    }

    #[test]
    fn test_replay_command_debug() {
        let cmd = ReplayCommand {
            file: PathBuf::from("ride.jsonl"),
            dry_run: true,
            json: false,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("ride.jsonl"));
        assert!(debug_str.contains("dry_run: true"));
    }

    #[test]
    fn test_history_command_debug() {
        let cmd = HistoryCommand::Clear { yes: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Clear"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
