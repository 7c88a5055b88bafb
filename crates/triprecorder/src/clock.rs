//! Wall-clock source and duration bookkeeping.
//!
//! Durations are always derived from absolute timestamps, never accumulated
//! from ticks, so time during which the process was suspended or dead is
//! accounted for as soon as the clock is read again.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current wall-clock instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Jump to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }

    /// Move forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Elapsed and active time of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Durations {
    /// Whole seconds since the trip started.
    pub elapsed_seconds: i64,
    /// Elapsed seconds minus paused seconds, floored at zero.
    pub active_seconds: i64,
}

/// Whole seconds from `start` to `now`, floored at zero.
#[must_use]
pub fn elapsed_seconds(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - start).num_seconds().max(0)
}

/// Derive durations for a trip.
///
/// While a pause interval is open, active time is measured up to the moment
/// the pause began and stays frozen there.
#[must_use]
pub fn measure(
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    paused_seconds: i64,
    pause_started_at: Option<DateTime<Utc>>,
) -> Durations {
    let active_until = pause_started_at.map_or(now, |paused_at| paused_at.min(now));
    Durations {
        elapsed_seconds: elapsed_seconds(start, now),
        active_seconds: (elapsed_seconds(start, active_until) - paused_seconds).max(0),
    }
}
