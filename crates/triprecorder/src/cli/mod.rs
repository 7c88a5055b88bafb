//! Command-line interface for triprecorder.
//!
//! This module provides the CLI structure and command handlers for the
//! `triprec` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, HistoryCommand, ReplayCommand, StatusCommand};

/// triprec - Record, resume and review cycling trips
///
/// Replays recorded location streams through the trip engine and manages
/// the local trip history.
#[derive(Debug, Parser)]
#[command(name = "triprec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replay a recorded event file through the engine
    Replay(ReplayCommand),

    /// Browse and manage finished trips
    #[command(subcommand)]
    History(HistoryCommand),

    /// Show database and in-flight trip status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}
