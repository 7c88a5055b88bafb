//! Error types for triprecorder.
//!
//! This module defines all error types used throughout the triprecorder crate.
//! Domain errors (`TripTooShort`, `HistorySave`) are recoverable by the caller;
//! the engine never aborts a live trip because of them.

use std::path::PathBuf;
use thiserror::Error;

use crate::trip::{Trip, TripState};

/// The main error type for triprecorder operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Trip Errors ===
    /// `finish()` was called before the trip covered the minimum distance.
    #[error("trip too short to save: {distance_km:.3} km recorded")]
    TripTooShort {
        /// Distance recorded so far.
        distance_km: f64,
    },

    /// An operation was requested in a state that does not allow it.
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        /// State the engine was in.
        state: TripState,
        /// The rejected operation.
        operation: &'static str,
    },

    /// The sealed trip could not be handed to the history store.
    ///
    /// The engine has already released the trip; it is carried here so the
    /// caller can retry the save.
    #[error("failed to save trip {} to history: {source}", trip.id)]
    HistorySave {
        /// The sealed trip that was not saved.
        trip: Box<Trip>,
        /// The underlying error.
        #[source]
        source: Box<Error>,
    },

    /// A stored snapshot could not be decoded.
    #[error("corrupt snapshot: {message}")]
    SnapshotCorrupt {
        /// Description of what went wrong.
        message: String,
    },

    /// A replay file line could not be parsed.
    #[error("invalid replay event on line {line}: {message}")]
    ReplayParse {
        /// 1-based line number.
        line: usize,
        /// Description of what went wrong.
        message: String,
    },

    // === Location Errors ===
    /// A location source could not hand out a subscription.
    #[error("failed to subscribe to location source '{name}': {message}")]
    Subscribe {
        /// Name of the location source.
        name: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for triprecorder operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a snapshot corruption error.
    #[must_use]
    pub fn snapshot_corrupt(message: impl Into<String>) -> Self {
        Self::SnapshotCorrupt {
            message: message.into(),
        }
    }

    /// Create an invalid transition error.
    #[must_use]
    pub fn invalid_transition(state: TripState, operation: &'static str) -> Self {
        Self::InvalidTransition { state, operation }
    }

    /// Create a subscription error.
    #[must_use]
    pub fn subscribe(name: &'static str, message: impl Into<String>) -> Self {
        Self::Subscribe {
            name,
            message: message.into(),
        }
    }

    /// Check if this error is the recoverable "trip too short" outcome.
    #[must_use]
    pub fn is_trip_too_short(&self) -> bool {
        matches!(self, Self::TripTooShort { .. })
    }

    /// Take back the sealed trip from a failed history save.
    ///
    /// Returns `None` for every other error.
    #[must_use]
    pub fn into_unsaved_trip(self) -> Option<Trip> {
        match self {
            Self::HistorySave { trip, .. } => Some(*trip),
            _ => None,
        }
    }
}
