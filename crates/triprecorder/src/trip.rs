//! Trip data model.
//!
//! A [`Trip`] is the aggregate the engine builds while tracking. It is a plain
//! value: the engine replaces it on every transition and readers only ever see
//! snapshots of it.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{self, Durations};

static TRIP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Lifecycle state of the trip engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripState {
    /// No trip in progress.
    #[default]
    Idle,
    /// Recording samples.
    Active,
    /// Trip open but not recording.
    Paused,
    /// Trip sealed and handed to history.
    Finished,
}

impl std::fmt::Display for TripState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Opaque trip identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(String);

impl TripId {
    /// Generate a fresh identifier for a trip starting at `start`.
    #[must_use]
    pub fn generate(start: DateTime<Utc>) -> Self {
        let seq = TRIP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("trip_{}_{seq}", start.timestamp_millis()))
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TripId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TripId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for TripId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A point on the recorded path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A recorded ride.
///
/// `duration_seconds` and `active_duration_seconds` are the values last derived
/// from the wall clock. While a trip is live they are recomputed on every
/// mutation and on rehydration; they are only final once the trip is sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    /// Unique identifier assigned at start.
    pub id: TripId,

    /// Display name, assigned when the trip is finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// When tracking started.
    pub start_time: DateTime<Utc>,

    /// When the trip was finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Accepted positions in chronological order.
    #[serde(default)]
    pub coordinates: Vec<Coordinate>,

    /// Counted distance in kilometres.
    #[serde(default)]
    pub distance_km: f64,

    /// Sum of closed pause intervals.
    #[serde(default)]
    pub paused_seconds: i64,

    /// Start of the currently open pause interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_started_at: Option<DateTime<Utc>>,

    /// Wall-clock time since start.
    #[serde(default)]
    pub duration_seconds: i64,

    /// Time spent not paused.
    #[serde(default)]
    pub active_duration_seconds: i64,

    /// Highest speed reading above the noise floor.
    #[serde(default)]
    pub max_speed_kmh: f64,

    /// Distance over active duration.
    #[serde(default)]
    pub avg_speed_kmh: f64,

    /// Estimated energy expenditure.
    #[serde(default)]
    pub calories_kcal: u32,
}

impl Trip {
    /// Create an empty trip starting at `start_time`.
    #[must_use]
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            id: TripId::generate(start_time),
            name: None,
            start_time,
            end_time: None,
            coordinates: Vec::new(),
            distance_km: 0.0,
            paused_seconds: 0,
            pause_started_at: None,
            duration_seconds: 0,
            active_duration_seconds: 0,
            max_speed_kmh: 0.0,
            avg_speed_kmh: 0.0,
            calories_kcal: 0,
        }
    }

    /// Last recorded position, if any.
    #[must_use]
    pub fn last_coordinate(&self) -> Option<Coordinate> {
        self.coordinates.last().copied()
    }

    /// Whether a pause interval is currently open.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause_started_at.is_some()
    }

    /// Whether the trip has been sealed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Durations as of `now`.
    #[must_use]
    pub fn durations_at(&self, now: DateTime<Utc>) -> Durations {
        clock::measure(
            self.start_time,
            now,
            self.paused_seconds,
            self.pause_started_at,
        )
    }

    /// Recompute the derived duration fields as of `now`.
    pub fn refresh_durations(&mut self, now: DateTime<Utc>) {
        let durations = self.durations_at(now);
        self.duration_seconds = durations.elapsed_seconds;
        self.active_duration_seconds = durations.active_seconds;
    }

    /// Average speed over `active_seconds`, zero when no active time has accrued.
    #[must_use]
    pub fn average_speed_kmh(&self, active_seconds: i64) -> f64 {
        if active_seconds > 0 {
            #[allow(clippy::cast_precision_loss)]
            let hours = active_seconds as f64 / 3600.0;
            self.distance_km / hours
        } else {
            0.0
        }
    }
}
