//! Recorded ride replay.
//!
//! A replay file is JSON lines, one [`ReplayEvent`] per line. Blank lines and
//! lines starting with `#` are skipped. Every event carries its own
//! timestamp, which drives a [`ManualClock`] so a replay reproduces the
//! original durations exactly.
//!
//! ```text
//! {"type":"start","at":"2026-05-01T08:00:00Z"}
//! {"type":"sample","latitude":13.0386,"longitude":77.6191,"accuracy_m":8.0,"timestamp":"2026-05-01T08:00:02Z"}
//! {"type":"pause","at":"2026-05-01T08:10:00Z"}
//! {"type":"finish","at":"2026-05-01T08:30:00Z","name":"Lake loop"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::ManualClock;
use crate::engine::{Lifecycle, SampleOutcome, TripEngine};
use crate::error::{Error, Result};
use crate::sample::LocationSample;
use crate::trip::Trip;

/// One line of a replay file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    /// Start a trip.
    Start {
        /// When.
        at: DateTime<Utc>,
    },
    /// A location fix.
    Sample(LocationSample),
    /// Pause the trip.
    Pause {
        /// When.
        at: DateTime<Utc>,
    },
    /// Resume the trip.
    Resume {
        /// When.
        at: DateTime<Utc>,
    },
    /// App went to the background.
    Background {
        /// When.
        at: DateTime<Utc>,
    },
    /// App came back to the foreground.
    Foreground {
        /// When.
        at: DateTime<Utc>,
    },
    /// Finish the trip.
    Finish {
        /// When.
        at: DateTime<Utc>,
        /// Optional display name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Discard the trip.
    Discard {
        /// When.
        at: DateTime<Utc>,
    },
}

impl ReplayEvent {
    /// When the event happened.
    #[must_use]
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Sample(sample) => sample.timestamp,
            Self::Start { at }
            | Self::Pause { at }
            | Self::Resume { at }
            | Self::Background { at }
            | Self::Foreground { at }
            | Self::Finish { at, .. }
            | Self::Discard { at } => *at,
        }
    }
}

/// Parse a replay file.
///
/// # Errors
///
/// Returns [`Error::ReplayParse`] for the first line that is not a valid
/// event.
pub fn parse_events(input: &str) -> Result<Vec<ReplayEvent>> {
    input
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line, text)| {
            serde_json::from_str(text).map_err(|e| Error::ReplayParse {
                line,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Tally of a replay run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaySummary {
    /// Trips sealed and saved to history.
    pub finished: Vec<Trip>,
    /// `finish` events refused because the trip was too short.
    pub too_short: usize,
    /// Trips discarded.
    pub discarded: usize,
    /// Samples appended to a path.
    pub accepted_samples: usize,
    /// Samples dropped by the filter.
    pub rejected_samples: usize,
    /// Samples that arrived with no trip recording, or late.
    pub ignored_samples: usize,
    /// Control events the engine refused.
    pub skipped_events: usize,
}

/// Feed `events` through `engine`, moving `clock` to each event's time.
///
/// Invalid transitions are logged and counted, not fatal.
///
/// # Errors
///
/// Returns [`Error::HistorySave`] if a finished trip could not be saved.
pub async fn replay_events(
    engine: &mut TripEngine,
    clock: &ManualClock,
    events: impl IntoIterator<Item = ReplayEvent>,
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for event in events {
        clock.set(event.at());
        let outcome = match event {
            ReplayEvent::Start { .. } => engine.start().map(drop),
            ReplayEvent::Sample(sample) => {
                match engine.on_sample(&sample) {
                    SampleOutcome::Accepted { .. } => summary.accepted_samples += 1,
                    SampleOutcome::Rejected(_) => summary.rejected_samples += 1,
                    SampleOutcome::Ignored | SampleOutcome::Stale => summary.ignored_samples += 1,
                }
                Ok(())
            }
            ReplayEvent::Pause { .. } => engine.pause(),
            ReplayEvent::Resume { .. } => engine.resume(),
            ReplayEvent::Background { .. } => {
                engine.on_lifecycle(Lifecycle::Background);
                Ok(())
            }
            ReplayEvent::Foreground { .. } => {
                engine.on_lifecycle(Lifecycle::Foreground);
                Ok(())
            }
            ReplayEvent::Discard { .. } => engine.discard().map(|()| summary.discarded += 1),
            ReplayEvent::Finish { name, .. } => match engine.finish(name.as_deref()).await {
                Ok(trip) => {
                    debug!(trip_id = %trip.id, "Replayed trip finished");
                    summary.finished.push(trip);
                    Ok(())
                }
                Err(e) if e.is_trip_too_short() => {
                    summary.too_short += 1;
                    Ok(())
                }
                Err(e @ Error::HistorySave { .. }) => {
                    engine.flush().await;
                    return Err(e);
                }
                Err(e) => Err(e),
            },
        };

        if let Err(e) = outcome {
            warn!(error = %e, "Replay event skipped");
            summary.skipped_events += 1;
        }
    }

    engine.flush().await;
    Ok(summary)
}
