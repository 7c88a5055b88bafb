//! Storage layer for triprecorder.
//!
//! This module provides `SQLite`-based persistent storage for finished trips
//! and for the snapshot of the trip being recorded. One database file backs
//! both [`TripHistoryStore`] and [`SnapshotStore`].

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::history::TripHistoryStore;
use crate::snapshot::SnapshotStore;
use crate::trip::{Coordinate, Trip, TripId};

const TRIP_COLUMNS: &str = "id, name, start_time, end_time, distance_km, duration_seconds, \
     active_duration_seconds, paused_seconds, max_speed_kmh, avg_speed_kmh, calories_kcal, \
     coordinates";

/// Storage engine for trips and snapshots.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a trip, replacing any stored trip with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn save_trip(&self, trip: &Trip) -> Result<()> {
        let coordinates = serde_json::to_string(&trip.coordinates)?;
        let name = trip.name.clone().unwrap_or_default();

        self.conn().execute(
            r"
            INSERT OR REPLACE INTO trips (
                id, name, start_time, end_time, distance_km, duration_seconds,
                active_duration_seconds, paused_seconds, max_speed_kmh, avg_speed_kmh,
                calories_kcal, coordinates
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ",
            params![
                trip.id.as_str(),
                name,
                format_timestamp(trip.start_time),
                trip.end_time.map(format_timestamp),
                trip.distance_km,
                trip.duration_seconds,
                trip.active_duration_seconds,
                trip.paused_seconds,
                trip.max_speed_kmh,
                trip.avg_speed_kmh,
                trip.calories_kcal,
                coordinates,
            ],
        )?;

        debug!(trip_id = %trip.id, points = trip.coordinates.len(), "Saved trip");
        Ok(())
    }

    /// Get a trip by its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: &TripId) -> Result<Option<Trip>> {
        let sql = format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = ?1");
        let result = self
            .conn()
            .query_row(&sql, [id.as_str()], Self::row_to_trip)
            .optional()?;
        Ok(result)
    }

    /// Get the most recent trips, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<Trip>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips ORDER BY start_time DESC LIMIT ?1"
        ))?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let trips = stmt
            .query_map([limit_i64], Self::row_to_trip)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(trips)
    }

    /// Count stored trips.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM trips", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete a trip by id.
    ///
    /// Returns `true` if a trip was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete(&self, id: &TripId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM trips WHERE id = ?1", [id.as_str()])?;
        Ok(affected > 0)
    }

    /// Delete every stored trip.
    ///
    /// Returns the number of trips deleted. The snapshot of a trip in
    /// progress is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear(&self) -> Result<usize> {
        let affected = self.conn().execute("DELETE FROM trips", [])?;
        if affected > 0 {
            info!("Cleared {} trips", affected);
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let conn = self.conn();

        let (total_trips, total_distance_km): (i64, f64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(distance_km), 0.0) FROM trips",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(start_time), MAX(start_time) FROM trips",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let has_snapshot: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM snapshots",
            [],
            |row| row.get(0),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_trips,
            total_distance_km,
            oldest_trip: oldest.as_deref().and_then(parse_timestamp),
            newest_trip: newest.as_deref().and_then(parse_timestamp),
            has_snapshot,
            db_size_bytes,
        })
    }

    fn row_to_trip(row: &rusqlite::Row) -> rusqlite::Result<Trip> {
        let id: String = row.get(0)?;
        let name: String = row.get(1)?;
        let start_time: String = row.get(2)?;
        let end_time: Option<String> = row.get(3)?;
        let coordinates: String = row.get(11)?;

        let coordinates: Vec<Coordinate> = serde_json::from_str(&coordinates).unwrap_or_else(|e| {
            warn!(trip_id = %id, error = %e, "Unreadable coordinates, loading trip without path");
            Vec::new()
        });

        let start_time = parse_timestamp(&start_time).unwrap_or_else(|| {
            warn!(trip_id = %id, "Unreadable start time, using epoch");
            DateTime::<Utc>::default()
        });

        Ok(Trip {
            id: TripId::from(id),
            name: (!name.is_empty()).then_some(name),
            start_time,
            end_time: end_time.as_deref().and_then(parse_timestamp),
            coordinates,
            distance_km: row.get(4)?,
            duration_seconds: row.get(5)?,
            active_duration_seconds: row.get(6)?,
            paused_seconds: row.get(7)?,
            pause_started_at: None,
            max_speed_kmh: row.get(8)?,
            avg_speed_kmh: row.get(9)?,
            calories_kcal: row.get(10)?,
        })
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl TripHistoryStore for Storage {
    async fn save(&self, trip: &Trip) -> Result<()> {
        self.save_trip(trip)
    }
}

impl SnapshotStore for Storage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn()
            .query_row("SELECT value FROM snapshots WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO snapshots (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, format_timestamp(Utc::now())],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM snapshots WHERE key = ?1", [key])?;
        Ok(())
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageStats {
    /// Total number of finished trips.
    pub total_trips: i64,
    /// Sum of trip distances.
    pub total_distance_km: f64,
    /// Start of the oldest trip.
    pub oldest_trip: Option<DateTime<Utc>>,
    /// Start of the newest trip.
    pub newest_trip: Option<DateTime<Utc>>,
    /// Whether an in-flight trip snapshot is stored.
    pub has_snapshot: bool,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn create_test_trip(distance_km: f64) -> Trip {
        let start = Utc::now() - Duration::hours(1);
        let mut trip = Trip::new(start);
        trip.name = Some("Morning loop".to_string());
        trip.end_time = Some(start + Duration::minutes(30));
        trip.coordinates = vec![Coordinate::new(13.0, 77.0), Coordinate::new(13.01, 77.0)];
        trip.distance_km = distance_km;
        trip.duration_seconds = 1800;
        trip.active_duration_seconds = 1700;
        trip.paused_seconds = 100;
        trip.max_speed_kmh = 31.5;
        trip.avg_speed_kmh = 14.2;
        trip.calories_kcal = 50;
        trip
    }

    #[test]
    fn test_open_in_memory() {
        let storage = Storage::open_in_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_save_and_get() {
        let storage = create_test_storage();
        let trip = create_test_trip(1.11);

        storage.save_trip(&trip).unwrap();
        let retrieved = storage.get(&trip.id).unwrap().unwrap();

        assert_eq!(retrieved.id, trip.id);
        assert_eq!(retrieved.name.as_deref(), Some("Morning loop"));
        assert_eq!(retrieved.coordinates, trip.coordinates);
        assert_eq!(retrieved.distance_km, 1.11);
        assert_eq!(retrieved.calories_kcal, 50);
        assert_eq!(retrieved.paused_seconds, 100);
        assert_eq!(
            retrieved.start_time.timestamp(),
            trip.start_time.timestamp()
        );
        assert!(retrieved.end_time.is_some());
    }

    #[test]
    fn test_save_replaces_same_id() {
        let storage = create_test_storage();
        let mut trip = create_test_trip(1.0);
        storage.save_trip(&trip).unwrap();

        trip.name = Some("Renamed".to_string());
        storage.save_trip(&trip).unwrap();

        assert_eq!(storage.count().unwrap(), 1);
        let retrieved = storage.get(&trip.id).unwrap().unwrap();
        assert_eq!(retrieved.name.as_deref(), Some("Renamed"));
    }

    #[test]
    fn test_get_nonexistent() {
        let storage = create_test_storage();
        assert!(storage.get(&TripId::from("trip_missing")).unwrap().is_none());
    }

    #[test]
    fn test_list_recent_newest_first() {
        let storage = create_test_storage();
        let base = Utc::now() - Duration::days(10);

        for i in 0..5 {
            let mut trip = Trip::new(base + Duration::days(i));
            trip.distance_km = 1.0;
            storage.save_trip(&trip).unwrap();
        }

        let recent = storage.list_recent(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].start_time > recent[1].start_time);
        assert!(recent[1].start_time > recent[2].start_time);
    }

    #[test]
    fn test_list_recent_with_zero_limit() {
        let storage = create_test_storage();
        storage.save_trip(&create_test_trip(1.0)).unwrap();
        assert!(storage.list_recent(0).unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let storage = create_test_storage();
        let trip = create_test_trip(1.0);
        storage.save_trip(&trip).unwrap();

        assert!(storage.delete(&trip.id).unwrap());
        assert!(storage.get(&trip.id).unwrap().is_none());
        assert!(!storage.delete(&trip.id).unwrap());
    }

    #[test]
    fn test_clear_keeps_snapshot() {
        let storage = create_test_storage();
        storage.save_trip(&create_test_trip(1.0)).unwrap();
        storage.save_trip(&create_test_trip(2.0)).unwrap();
        SnapshotStore::set(&storage, "active_trip", b"blob").unwrap();

        assert_eq!(storage.clear().unwrap(), 2);
        assert_eq!(storage.count().unwrap(), 0);
        assert!(SnapshotStore::get(&storage, "active_trip").unwrap().is_some());
    }

    #[test]
    fn test_unnamed_trip_round_trips_as_none() {
        let storage = create_test_storage();
        let mut trip = create_test_trip(1.0);
        trip.name = None;
        storage.save_trip(&trip).unwrap();
        assert!(storage.get(&trip.id).unwrap().unwrap().name.is_none());
    }

    #[test]
    fn test_stats_empty() {
        let storage = create_test_storage();
        let stats = storage.stats().unwrap();

        assert_eq!(stats.total_trips, 0);
        assert_eq!(stats.total_distance_km, 0.0);
        assert!(stats.oldest_trip.is_none());
        assert!(stats.newest_trip.is_none());
        assert!(!stats.has_snapshot);
    }

    #[test]
    fn test_stats_with_data() {
        let storage = create_test_storage();
        storage.save_trip(&create_test_trip(1.5)).unwrap();
        storage.save_trip(&create_test_trip(2.5)).unwrap();
        SnapshotStore::set(&storage, "active_trip", b"blob").unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_trips, 2);
        assert!((stats.total_distance_km - 4.0).abs() < 1e-9);
        assert!(stats.oldest_trip.is_some());
        assert!(stats.has_snapshot);
    }

    #[test]
    fn test_snapshot_store() {
        let storage = create_test_storage();
        assert!(SnapshotStore::get(&storage, "k").unwrap().is_none());

        SnapshotStore::set(&storage, "k", b"one").unwrap();
        SnapshotStore::set(&storage, "k", b"two").unwrap();
        assert_eq!(
            SnapshotStore::get(&storage, "k").unwrap(),
            Some(b"two".to_vec())
        );

        SnapshotStore::delete(&storage, "k").unwrap();
        SnapshotStore::delete(&storage, "k").unwrap();
        assert!(SnapshotStore::get(&storage, "k").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_store_impl() {
        let storage = create_test_storage();
        let trip = create_test_trip(3.0);
        TripHistoryStore::save(&storage, &trip).await.unwrap();
        assert_eq!(storage.count().unwrap(), 1);
    }

    #[test]
    fn test_path() {
        let storage = create_test_storage();
        assert_eq!(storage.path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_open_file_based_survives_reopen() {
        let temp_dir = std::env::temp_dir();
        let db_path = temp_dir.join(format!("triprecorder_test_{}.db", std::process::id()));
        let trip = create_test_trip(1.0);

        let storage = Storage::open(&db_path).unwrap();
        storage.save_trip(&trip).unwrap();
        SnapshotStore::set(&storage, "active_trip", b"blob").unwrap();
        assert_eq!(storage.path(), db_path);
        drop(storage);

        let reopened = Storage::open(&db_path).unwrap();
        assert!(reopened.get(&trip.id).unwrap().is_some());
        assert!(SnapshotStore::get(&reopened, "active_trip").unwrap().is_some());
        assert!(reopened.stats().unwrap().db_size_bytes > 0);

        drop(reopened);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = std::env::temp_dir();
        let nested_path = temp_dir.join(format!(
            "triprecorder_test_{}/nested/trips.db",
            std::process::id()
        ));

        if let Some(parent) = nested_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }

        let storage = Storage::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(storage);
        if let Some(parent) = nested_path.parent() {
            let _ = std::fs::remove_dir_all(parent.parent().unwrap());
        }
    }
}
