//! The trip recording engine.
//!
//! [`TripEngine`] owns the trip lifecycle. It is a single-writer state
//! machine: every mutation goes through `&mut self`, so callers serialize
//! access by construction (see [`crate::session`] for the event loop that
//! drives it). Readers never touch the live trip; they receive [`TripView`]s
//! through a `watch` channel, each holding an immutable `Arc<Trip>`.
//!
//! The engine must be created inside a tokio runtime because its snapshot
//! writer runs as a background task.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::distance::{
    round_km, DistanceAccumulator, SpeedReading, DEFAULT_MIN_DELTA_KM, DEFAULT_NOISE_SPEED_KMH,
};
use crate::error::{Error, Result};
use crate::filter::{FilterConfig, FilterResult, RejectReason, SampleFilter};
use crate::history::TripHistoryStore;
use crate::sample::{LocationHints, LocationSample};
use crate::snapshot::{Snapshot, SnapshotBridge, SnapshotStore};
use crate::trip::{Coordinate, Trip, TripId, TripState};

/// Tunable parameters of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Sample filter settings.
    pub filter: FilterConfig,
    /// Smallest movement counted towards distance.
    pub min_delta_km: f64,
    /// Distance below which `finish` refuses to seal the trip.
    pub min_finish_distance_km: f64,
    /// Speed readings below this are noise.
    pub noise_speed_kmh: f64,
    /// Calorie estimate per kilometre.
    pub calories_per_km: f64,
    /// Save a snapshot after this many accepted samples.
    pub snapshot_every: u32,
    /// Snapshots whose trip started longer ago than this are abandoned.
    pub max_resume_age: Duration,
    /// Hints passed to the location source.
    pub location_hints: LocationHints,
    /// Prefix of the default trip name.
    pub default_name_prefix: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            filter: FilterConfig::default(),
            min_delta_km: DEFAULT_MIN_DELTA_KM,
            min_finish_distance_km: 0.01,
            noise_speed_kmh: DEFAULT_NOISE_SPEED_KMH,
            calories_per_km: 45.0,
            snapshot_every: 5,
            max_resume_age: Duration::hours(24),
            location_hints: LocationHints::default(),
            default_name_prefix: "Ride".to_string(),
        }
    }
}

/// App lifecycle transitions reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// The app became visible again.
    Foreground,
    /// The app is about to be suspended.
    Background,
}

/// What happened to a sample handed to [`TripEngine::on_sample`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// No trip is being recorded.
    Ignored,
    /// The fix was taken before the current recording interval began.
    Stale,
    /// The filter dropped the sample.
    Rejected(RejectReason),
    /// The sample was appended to the path.
    Accepted {
        /// Distance added by this sample; zero for jitter.
        counted_km: f64,
    },
}

/// Result of [`TripEngine::restore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// A trip is already in memory; the snapshot was not consulted.
    AlreadyTracking,
    /// There was nothing to restore.
    NoSnapshot,
    /// The stored trip was too old and has been cleared.
    Abandoned {
        /// The abandoned trip.
        trip_id: TripId,
    },
    /// The snapshot could not be decoded and has been cleared.
    Corrupt,
    /// The snapshot store could not be read.
    Unreadable,
    /// The trip was rehydrated.
    Restored {
        /// The restored trip.
        trip_id: TripId,
        /// Whether it came back paused.
        is_paused: bool,
    },
}

/// Read model published after every mutation.
#[derive(Debug, Clone, Default)]
pub struct TripView {
    /// Engine state. `Finished` is only ever seen here, right after a
    /// successful seal.
    pub state: TripState,
    /// The trip as of this view.
    pub trip: Option<Arc<Trip>>,
    /// Most recent accepted position.
    pub latest_position: Option<Coordinate>,
    /// Counted distance.
    pub distance_km: f64,
    /// Wall-clock time since start.
    pub duration_seconds: i64,
    /// Time spent not paused.
    pub active_duration_seconds: i64,
    /// Speed of the most recent accepted sample, zero under the noise floor.
    pub current_speed_kmh: f64,
    /// Whether the trip is paused.
    pub is_paused: bool,
}

impl TripView {
    fn of(state: TripState, trip: Option<Arc<Trip>>, current_speed_kmh: f64) -> Self {
        let Some(t) = trip.as_deref() else {
            return Self {
                state,
                ..Self::default()
            };
        };
        Self {
            state,
            latest_position: t.last_coordinate(),
            distance_km: t.distance_km,
            duration_seconds: t.duration_seconds,
            active_duration_seconds: t.active_duration_seconds,
            current_speed_kmh,
            is_paused: state == TripState::Paused,
            trip,
        }
    }

    /// The recorded path.
    #[must_use]
    pub fn path(&self) -> &[Coordinate] {
        self.trip.as_deref().map_or(&[], |t| &t.coordinates)
    }
}

/// The trip state machine.
#[derive(Debug)]
pub struct TripEngine {
    options: EngineOptions,
    clock: Arc<dyn Clock>,
    history: Arc<dyn TripHistoryStore>,
    snapshots: SnapshotBridge,
    filter: SampleFilter,
    accumulator: DistanceAccumulator,
    state: TripState,
    trip: Option<Arc<Trip>>,
    /// When the latest pause ended. Fixes stamped earlier were taken while
    /// paused. `None` until the trip has been resumed.
    resumed_at: Option<DateTime<Utc>>,
    accepted_since_snapshot: u32,
    current_speed_kmh: f64,
    view: watch::Sender<TripView>,
}

impl TripEngine {
    /// Create an idle engine with its collaborators.
    #[must_use]
    pub fn new(
        options: EngineOptions,
        clock: Arc<dyn Clock>,
        snapshots: Arc<dyn SnapshotStore>,
        history: Arc<dyn TripHistoryStore>,
    ) -> Self {
        let (view, _) = watch::channel(TripView::default());
        Self {
            filter: SampleFilter::with_config(options.filter),
            accumulator: DistanceAccumulator::new(options.min_delta_km),
            options,
            clock,
            history,
            snapshots: SnapshotBridge::new(snapshots),
            state: TripState::Idle,
            trip: None,
            resumed_at: None,
            accepted_since_snapshot: 0,
            current_speed_kmh: 0.0,
            view,
        }
    }

    /// Current state. Never `Finished`: a sealed trip is released at once.
    #[must_use]
    pub fn state(&self) -> TripState {
        self.state
    }

    /// The trip being recorded, if any.
    #[must_use]
    pub fn trip(&self) -> Option<Arc<Trip>> {
        self.trip.clone()
    }

    /// Engine options.
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Whether a trip is open.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        matches!(self.state, TripState::Active | TripState::Paused)
    }

    /// The latest published view.
    #[must_use]
    pub fn view(&self) -> TripView {
        self.view.borrow().clone()
    }

    /// Receive every view published from now on.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TripView> {
        self.view.subscribe()
    }

    /// Wait for queued snapshot writes to land.
    pub async fn flush(&self) {
        self.snapshots.flush().await;
    }

    /// Number of snapshot writes that failed so far.
    #[must_use]
    pub fn failed_snapshot_writes(&self) -> u64 {
        self.snapshots.failed_writes()
    }

    /// Begin recording a new trip.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless the engine is idle.
    pub fn start(&mut self) -> Result<TripId> {
        if self.state != TripState::Idle {
            return Err(Error::invalid_transition(self.state, "start"));
        }

        let now = self.clock.now();
        let trip = Trip::new(now);
        let id = trip.id.clone();

        self.accumulator.reseed(None);
        self.resumed_at = None;
        self.accepted_since_snapshot = 0;
        self.current_speed_kmh = 0.0;
        self.trip = Some(Arc::new(trip));
        self.state = TripState::Active;

        self.save_snapshot(now);
        self.publish();
        info!(trip_id = %id, "Trip started");
        Ok(id)
    }

    /// Apply a location sample.
    pub fn on_sample(&mut self, sample: &LocationSample) -> SampleOutcome {
        if self.state != TripState::Active {
            debug!(state = %self.state, "Sample ignored");
            return SampleOutcome::Ignored;
        }
        if self.resumed_at.is_some_and(|since| sample.timestamp < since) {
            debug!(timestamp = %sample.timestamp, "Stale sample dropped");
            return SampleOutcome::Stale;
        }
        if let FilterResult::Rejected(reason) = self.filter.check(sample) {
            debug!(%reason, "Sample rejected");
            return SampleOutcome::Rejected(reason);
        }
        let Some(trip) = self.trip.as_mut() else {
            return SampleOutcome::Ignored;
        };

        let now = self.clock.now();
        let point = sample.coordinate();
        let counted_km = self.accumulator.advance(point);
        let speed = SpeedReading::from_mps(sample.speed_mps, self.options.noise_speed_kmh);

        let trip = Arc::make_mut(trip);
        trip.coordinates.push(point);
        if counted_km > 0.0 {
            trip.distance_km = round_km(trip.distance_km + counted_km);
        }
        if speed.counts_for_max() {
            trip.max_speed_kmh = trip.max_speed_kmh.max(speed.display_kmh());
        }
        trip.refresh_durations(now);
        trip.avg_speed_kmh = trip.average_speed_kmh(trip.active_duration_seconds);
        debug!(
            counted_km,
            distance_km = trip.distance_km,
            points = trip.coordinates.len(),
            "Sample accepted"
        );

        self.current_speed_kmh = speed.display_kmh();
        self.accepted_since_snapshot += 1;
        if self.accepted_since_snapshot >= self.options.snapshot_every {
            self.accepted_since_snapshot = 0;
            self.save_snapshot(now);
        }
        self.publish();

        SampleOutcome::Accepted { counted_km }
    }

    /// Stop recording without closing the trip. A no-op when already paused.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] when no trip is open.
    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            TripState::Paused => return Ok(()),
            TripState::Active => {}
            state => return Err(Error::invalid_transition(state, "pause")),
        }
        let now = self.clock.now();
        let trip = self.trip_mut("pause")?;
        trip.pause_started_at = Some(now);
        trip.refresh_durations(now);

        self.state = TripState::Paused;
        self.current_speed_kmh = 0.0;
        self.save_snapshot(now);
        self.publish();
        info!("Trip paused");
        Ok(())
    }

    /// Resume recording. A no-op when already active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] when no trip is open.
    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            TripState::Active => return Ok(()),
            TripState::Paused => {}
            state => return Err(Error::invalid_transition(state, "resume")),
        }
        let now = self.clock.now();
        let trip = self.trip_mut("resume")?;
        close_pause(trip, now);
        trip.refresh_durations(now);
        trip.avg_speed_kmh = trip.average_speed_kmh(trip.active_duration_seconds);
        let paused_seconds = trip.paused_seconds;

        self.state = TripState::Active;
        self.resumed_at = Some(now);
        self.save_snapshot(now);
        self.publish();
        info!(paused_seconds, "Trip resumed");
        Ok(())
    }

    /// Seal the trip and hand it to the history store.
    ///
    /// A blank `name` counts as no name. On success the engine is idle and
    /// the sealed trip is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTransition`] when no trip is open.
    /// - [`Error::TripTooShort`] when the trip has not covered the minimum
    ///   distance; nothing changes and tracking continues.
    /// - [`Error::HistorySave`] when the history store fails. The engine is
    ///   already idle; the sealed trip travels in the error.
    pub async fn finish(&mut self, name: Option<&str>) -> Result<Trip> {
        if !self.is_tracking() {
            return Err(Error::invalid_transition(self.state, "finish"));
        }
        let Some(current) = self.trip.as_ref() else {
            return Err(Error::internal("tracking without a trip"));
        };
        if current.distance_km < self.options.min_finish_distance_km {
            info!(distance_km = current.distance_km, "Trip too short to finish");
            return Err(Error::TripTooShort {
                distance_km: current.distance_km,
            });
        }

        let now = self.clock.now();
        let mut trip = self
            .trip
            .take()
            .map(|t| Arc::try_unwrap(t).unwrap_or_else(|shared| (*shared).clone()))
            .ok_or_else(|| Error::internal("tracking without a trip"))?;

        close_pause(&mut trip, now);
        trip.refresh_durations(now);
        trip.avg_speed_kmh = trip.average_speed_kmh(trip.active_duration_seconds);
        trip.calories_kcal = estimate_calories(trip.distance_km, self.options.calories_per_km);
        trip.end_time = Some(now);
        trip.name = Some(match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => self.default_name(&trip),
        });

        self.reset();
        self.snapshots.clear();

        let sealed = Arc::new(trip);
        self.view.send_replace(TripView::of(
            TripState::Finished,
            Some(Arc::clone(&sealed)),
            0.0,
        ));
        info!(
            trip_id = %sealed.id,
            distance_km = sealed.distance_km,
            active_seconds = sealed.active_duration_seconds,
            "Trip finished"
        );

        let trip = Trip::clone(&sealed);
        match self.history.save(&trip).await {
            Ok(()) => Ok(trip),
            Err(e) => {
                warn!(trip_id = %trip.id, error = %e, "Failed to save finished trip");
                Err(Error::HistorySave {
                    trip: Box::new(trip),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Drop the open trip without saving it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] when no trip is open.
    pub fn discard(&mut self) -> Result<()> {
        if !self.is_tracking() {
            return Err(Error::invalid_transition(self.state, "discard"));
        }
        let trip_id = self.trip.as_ref().map(|t| t.id.clone());
        self.reset();
        self.snapshots.clear();
        self.publish();
        if let Some(trip_id) = trip_id {
            info!(trip_id = %trip_id, "Trip discarded");
        }
        Ok(())
    }

    /// React to an app lifecycle transition.
    ///
    /// Both directions save a snapshot while a trip is open; coming back to
    /// the foreground also recomputes the live durations.
    pub fn on_lifecycle(&mut self, transition: Lifecycle) {
        if !self.is_tracking() {
            return;
        }
        let now = self.clock.now();
        if transition == Lifecycle::Foreground {
            self.refresh_at(now);
        }
        debug!(?transition, "Lifecycle snapshot");
        self.save_snapshot(now);
    }

    /// Recompute live durations and republish the view.
    pub fn refresh(&mut self) {
        let now = self.clock.now();
        self.refresh_at(now);
    }

    /// Rehydrate a trip from the snapshot store.
    ///
    /// Never fails: unreadable state leaves the engine idle.
    pub fn restore(&mut self) -> RestoreOutcome {
        if self.is_tracking() {
            return RestoreOutcome::AlreadyTracking;
        }

        let snapshot = match self.snapshots.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return RestoreOutcome::NoSnapshot,
            Err(e @ Error::SnapshotCorrupt { .. }) => {
                warn!(error = %e, "Discarding corrupt snapshot");
                self.snapshots.clear();
                return RestoreOutcome::Corrupt;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read snapshot");
                return RestoreOutcome::Unreadable;
            }
        };

        let now = self.clock.now();
        let Snapshot {
            mut trip,
            is_paused,
            saved_at,
        } = snapshot;

        if now - trip.start_time > self.options.max_resume_age {
            warn!(
                trip_id = %trip.id,
                started = %trip.start_time,
                "Abandoning stale trip snapshot"
            );
            self.snapshots.clear();
            return RestoreOutcome::Abandoned { trip_id: trip.id };
        }

        if is_paused {
            trip.pause_started_at.get_or_insert(saved_at);
        } else {
            trip.pause_started_at = None;
        }
        trip.refresh_durations(now);
        trip.avg_speed_kmh = trip.average_speed_kmh(trip.active_duration_seconds);

        let trip_id = trip.id.clone();
        self.accumulator.reseed(trip.last_coordinate());
        self.resumed_at = None;
        self.accepted_since_snapshot = 0;
        self.current_speed_kmh = 0.0;
        self.state = if is_paused {
            TripState::Paused
        } else {
            TripState::Active
        };
        info!(
            trip_id = %trip_id,
            is_paused,
            points = trip.coordinates.len(),
            duration_seconds = trip.duration_seconds,
            "Trip restored"
        );
        self.trip = Some(Arc::new(trip));
        self.publish();

        RestoreOutcome::Restored { trip_id, is_paused }
    }

    fn trip_mut(&mut self, operation: &'static str) -> Result<&mut Trip> {
        self.trip
            .as_mut()
            .map(Arc::make_mut)
            .ok_or_else(|| Error::internal(format!("{operation} without a trip")))
    }

    fn refresh_at(&mut self, now: DateTime<Utc>) {
        if let Some(trip) = self.trip.as_mut() {
            let trip = Arc::make_mut(trip);
            trip.refresh_durations(now);
            trip.avg_speed_kmh = trip.average_speed_kmh(trip.active_duration_seconds);
        }
        self.publish();
    }

    fn reset(&mut self) {
        self.state = TripState::Idle;
        self.trip = None;
        self.resumed_at = None;
        self.accepted_since_snapshot = 0;
        self.current_speed_kmh = 0.0;
        self.accumulator.reseed(None);
    }

    fn default_name(&self, trip: &Trip) -> String {
        format!(
            "{} {}",
            self.options.default_name_prefix,
            trip.start_time.format("%Y-%m-%d")
        )
    }

    fn save_snapshot(&self, now: DateTime<Utc>) {
        if let Some(trip) = &self.trip {
            self.snapshots
                .save(trip, self.state == TripState::Paused, now);
        }
    }

    fn publish(&self) {
        self.view.send_replace(TripView::of(
            self.state,
            self.trip.clone(),
            self.current_speed_kmh,
        ));
    }
}

/// Fold an open pause interval into `paused_seconds`.
fn close_pause(trip: &mut Trip, now: DateTime<Utc>) {
    if let Some(paused_at) = trip.pause_started_at.take() {
        trip.paused_seconds += (now - paused_at).num_seconds().max(0);
    }
}

fn estimate_calories(distance_km: f64, calories_per_km: f64) -> u32 {
    let kcal = (distance_km * calories_per_km).round();
    if kcal.is_finite() && kcal > 0.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let kcal = kcal.min(f64::from(u32::MAX)) as u32;
        kcal
    } else {
        0
    }
}
