//! End-to-end recording scenarios against a file-backed store.
//!
//! Each test opens a fresh SQLite file, records through a `TripEngine`, drops
//! the engine to simulate the process being killed, and checks what a new
//! engine over the same file sees.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use triprecorder::snapshot::SNAPSHOT_KEY;
use triprecorder::{
    EngineOptions, Error, Lifecycle, LocationSample, ManualClock, RestoreOutcome, SampleOutcome,
    SnapshotStore, Storage, TripEngine, TripState,
};

/// Degrees of latitude per metre on the haversine sphere.
const METRE: f64 = 1.0 / 111_195.0;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-05-01T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

struct TempDb(PathBuf);

impl TempDb {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "triprecorder_it_{}_{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        Self(dir.join("trips.db"))
    }

    fn open(&self) -> Arc<Storage> {
        Arc::new(Storage::open(&self.0).unwrap())
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        if let Some(dir) = self.0.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

fn engine(clock: &ManualClock, storage: &Arc<Storage>) -> TripEngine {
    TripEngine::new(
        EngineOptions::default(),
        Arc::new(clock.clone()),
        storage.clone(),
        storage.clone(),
    )
}

fn sample_at(clock: &ManualClock, seconds: i64, metres: f64) -> LocationSample {
    let at = t0() + Duration::seconds(seconds);
    clock.set(at);
    LocationSample::new(metres * METRE, 0.0, at).with_accuracy(10.0)
}

/// Start at `t0` and ride 2 km north in 500 m steps, then background the app.
async fn ride_two_km(clock: &ManualClock, storage: &Arc<Storage>) {
    let mut engine = engine(clock, storage);
    engine.start().unwrap();
    for step in 0..=4_i32 {
        let sample = sample_at(clock, i64::from(step) * 60, f64::from(step) * 500.0);
        let outcome = engine.on_sample(&sample);
        assert!(matches!(outcome, SampleOutcome::Accepted { .. }));
    }
    engine.on_lifecycle(Lifecycle::Background);
    engine.flush().await;
    assert!((engine.view().distance_km - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_trip_survives_restart_after_two_hours() {
    let db = TempDb::new("two_hours");
    let clock = ManualClock::new(t0());

    ride_two_km(&clock, &db.open()).await;

    clock.set(t0() + Duration::hours(2));
    let storage = db.open();
    let mut engine = engine(&clock, &storage);
    let outcome = engine.restore();

    assert!(matches!(
        outcome,
        RestoreOutcome::Restored {
            is_paused: false,
            ..
        }
    ));
    assert_eq!(engine.state(), TripState::Active);
    let trip = engine.trip().unwrap();
    assert_eq!(trip.duration_seconds, 7200);
    assert!((trip.distance_km - 2.0).abs() < 1e-9);
    assert_eq!(trip.coordinates.len(), 5);
}

#[tokio::test]
async fn test_restored_trip_keeps_counting_from_last_point() {
    let db = TempDb::new("continue");
    let clock = ManualClock::new(t0());

    ride_two_km(&clock, &db.open()).await;

    clock.set(t0() + Duration::minutes(30));
    let storage = db.open();
    let mut engine = engine(&clock, &storage);
    engine.restore();

    let outcome = engine.on_sample(&sample_at(&clock, 1860, 2500.0));
    assert!(matches!(outcome, SampleOutcome::Accepted { .. }));
    assert!((engine.view().distance_km - 2.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_stale_snapshot_is_abandoned_after_a_day() {
    let db = TempDb::new("stale");
    let clock = ManualClock::new(t0());

    ride_two_km(&clock, &db.open()).await;

    clock.set(t0() + Duration::hours(25));
    let storage = db.open();
    let mut engine = engine(&clock, &storage);
    let outcome = engine.restore();
    engine.flush().await;

    assert!(matches!(outcome, RestoreOutcome::Abandoned { .. }));
    assert_eq!(engine.state(), TripState::Idle);
    assert!(engine.trip().is_none());
    assert!(SnapshotStore::get(storage.as_ref(), SNAPSHOT_KEY)
        .unwrap()
        .is_none());
    assert_eq!(storage.count().unwrap(), 0);
}

#[tokio::test]
async fn test_paused_trip_restores_paused() {
    let db = TempDb::new("paused");
    let clock = ManualClock::new(t0());

    {
        let storage = db.open();
        let mut engine = engine(&clock, &storage);
        engine.start().unwrap();
        engine.on_sample(&sample_at(&clock, 10, 0.0));
        engine.on_sample(&sample_at(&clock, 70, 300.0));
        clock.set(t0() + Duration::seconds(100));
        engine.pause().unwrap();
        engine.flush().await;
    }

    clock.set(t0() + Duration::seconds(400));
    let storage = db.open();
    let mut engine = engine(&clock, &storage);
    let outcome = engine.restore();
    assert!(matches!(
        outcome,
        RestoreOutcome::Restored {
            is_paused: true,
            ..
        }
    ));
    assert_eq!(engine.state(), TripState::Paused);

    let trip = engine.trip().unwrap();
    assert_eq!(trip.duration_seconds, 400);
    assert_eq!(trip.active_duration_seconds, 100);

    engine.resume().unwrap();
    assert_eq!(engine.trip().unwrap().paused_seconds, 300);
}

#[tokio::test]
async fn test_pause_gap_excluded_from_active_time() {
    let db = TempDb::new("pause_gap");
    let clock = ManualClock::new(t0());
    let storage = db.open();
    let mut engine = engine(&clock, &storage);

    engine.start().unwrap();
    clock.set(t0() + Duration::seconds(20));
    engine.pause().unwrap();
    clock.set(t0() + Duration::seconds(30));
    engine.resume().unwrap();
    clock.set(t0() + Duration::seconds(60));
    engine.refresh();

    let trip = engine.trip().unwrap();
    assert_eq!(trip.paused_seconds, 10);
    assert_eq!(trip.duration_seconds, 60);
    assert_eq!(trip.active_duration_seconds, 50);
}

#[tokio::test]
async fn test_finish_too_short_keeps_recording() {
    let db = TempDb::new("too_short");
    let clock = ManualClock::new(t0());
    let storage = db.open();
    let mut engine = engine(&clock, &storage);

    engine.start().unwrap();
    engine.on_sample(&sample_at(&clock, 10, 0.0));
    engine.on_sample(&sample_at(&clock, 20, 8.0));

    let err = engine.finish(None).await.unwrap_err();
    assert!(matches!(err, Error::TripTooShort { .. }));
    assert_eq!(engine.state(), TripState::Active);
    assert_eq!(storage.count().unwrap(), 0);
}

#[tokio::test]
async fn test_finish_saves_trip_and_clears_snapshot() {
    let db = TempDb::new("finish");
    let clock = ManualClock::new(t0());
    let storage = db.open();
    let mut engine = engine(&clock, &storage);

    engine.start().unwrap();
    engine.on_sample(&sample_at(&clock, 10, 0.0));
    engine.on_sample(&sample_at(&clock, 20, 20.0));
    clock.set(t0() + Duration::seconds(360));

    let trip = engine.finish(Some("Commute")).await.unwrap();
    engine.flush().await;

    assert!((trip.distance_km - 0.02).abs() < 1e-9);
    assert_eq!(trip.active_duration_seconds, 360);
    assert!((trip.avg_speed_kmh - 0.2).abs() < 1e-9);
    assert_eq!(trip.calories_kcal, 1);
    assert_eq!(trip.end_time, Some(t0() + Duration::seconds(360)));
    assert_eq!(engine.state(), TripState::Idle);

    let reopened = db.open();
    let saved = reopened.get(&trip.id).unwrap().unwrap();
    assert_eq!(saved.name.as_deref(), Some("Commute"));
    assert_eq!(saved.coordinates.len(), 2);
    assert!(SnapshotStore::get(reopened.as_ref(), SNAPSHOT_KEY)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_finished_trip_is_not_restored_before_clear_lands() {
    let db = TempDb::new("finish_then_restore");
    let clock = ManualClock::new(t0());
    let storage = db.open();
    let mut engine = engine(&clock, &storage);

    engine.start().unwrap();
    engine.on_sample(&sample_at(&clock, 10, 0.0));
    engine.on_sample(&sample_at(&clock, 20, 50.0));
    engine.on_lifecycle(Lifecycle::Background);
    engine.flush().await;

    engine.finish(None).await.unwrap();
    assert_eq!(engine.restore(), RestoreOutcome::NoSnapshot);
    assert!(engine.finish(None).await.is_err());

    engine.flush().await;
    assert_eq!(storage.count().unwrap(), 1);
    assert!(SnapshotStore::get(storage.as_ref(), SNAPSHOT_KEY)
        .unwrap()
        .is_none());
}
