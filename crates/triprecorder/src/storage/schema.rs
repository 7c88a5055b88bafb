//! `SQLite` schema definitions for triprecorder.

/// SQL statement to create the trips table.
///
/// Coordinates are stored as a JSON array; they are only ever read back
/// whole.
pub const CREATE_TRIPS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS trips (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT,
    distance_km REAL NOT NULL,
    duration_seconds INTEGER NOT NULL,
    active_duration_seconds INTEGER NOT NULL,
    paused_seconds INTEGER NOT NULL,
    max_speed_kmh REAL NOT NULL,
    avg_speed_kmh REAL NOT NULL,
    calories_kcal INTEGER NOT NULL,
    coordinates TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create an index on start time for history listing.
pub const CREATE_START_TIME_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_trips_start_time ON trips(start_time DESC)
";

/// SQL statement to create the snapshot table for in-flight trip blobs.
pub const CREATE_SNAPSHOTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS snapshots (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_TRIPS_TABLE,
    CREATE_START_TIME_INDEX,
    CREATE_SNAPSHOTS_TABLE,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.is_empty());
        }
    }

    #[test]
    fn test_trips_table_keyed_by_trip_id() {
        assert!(CREATE_TRIPS_TABLE.contains("id TEXT PRIMARY KEY"));
        assert!(CREATE_TRIPS_TABLE.contains("coordinates TEXT NOT NULL"));
    }

    #[test]
    fn test_snapshots_table_stores_blobs() {
        assert!(CREATE_SNAPSHOTS_TABLE.contains("key TEXT PRIMARY KEY"));
        assert!(CREATE_SNAPSHOTS_TABLE.contains("value BLOB NOT NULL"));
    }
}
