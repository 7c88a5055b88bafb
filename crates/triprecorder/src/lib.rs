//! `triprecorder` - A resumable cycling trip recorder
//!
//! This library turns a stream of GPS fixes into a trip: filtered, measured,
//! pausable and finished into a persistent history. An in-flight trip is
//! snapshotted as it grows so it survives the process being killed.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod distance;
pub mod engine;
pub mod error;
pub mod filter;
pub mod history;
pub mod logging;
pub mod replay;
pub mod sample;
pub mod session;
pub mod snapshot;
pub mod storage;
pub mod trip;

pub use clock::{Clock, Durations, ManualClock, SystemClock};
pub use config::Config;
pub use engine::{EngineOptions, Lifecycle, RestoreOutcome, SampleOutcome, TripEngine, TripView};
pub use error::{Error, Result};
pub use history::{MemoryTripHistory, TripHistoryStore};
pub use logging::init_logging;
pub use sample::{LocationHints, LocationSample, LocationSource, Subscription};
pub use session::{run_session, SessionEnd, Signal};
pub use snapshot::{MemorySnapshotStore, Snapshot, SnapshotStore};
pub use storage::{Storage, StorageStats};
pub use trip::{Coordinate, Trip, TripId, TripState};
