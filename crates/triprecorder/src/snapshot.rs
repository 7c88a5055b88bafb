//! Snapshot persistence for the in-flight trip.
//!
//! The trip being recorded is periodically written to a [`SnapshotStore`] as
//! an opaque blob so that a killed process can pick the trip up again.
//! Writes are fire-and-forget: they are handed to a single background task
//! through a `watch` channel, which means at most one write is in flight and
//! any requests made meanwhile collapse into the most recent one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::trip::{Trip, TripId};

/// Key under which the active trip snapshot is stored.
pub const SNAPSHOT_KEY: &str = "active_trip";

/// Current snapshot envelope version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Key-value storage for snapshot blobs.
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    /// Read the blob stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove the blob under `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory snapshot store.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicU64,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` calls served so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// The persisted state of an in-flight trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The trip as of `saved_at`.
    pub trip: Trip,
    /// Whether the trip was paused.
    pub is_paused: bool,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    trip: &'a Trip,
    is_paused: bool,
    saved_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    checksum: String,
    payload: String,
}

fn checksum(payload: &str) -> String {
    blake3::hash(payload.as_bytes()).to_hex().to_string()
}

impl Snapshot {
    /// Encode a snapshot without cloning the trip.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_parts(trip: &Trip, is_paused: bool, saved_at: DateTime<Utc>) -> Result<Vec<u8>> {
        let payload = serde_json::to_string(&SnapshotRef {
            trip,
            is_paused,
            saved_at,
        })?;
        let envelope = Envelope {
            version: SNAPSHOT_VERSION,
            checksum: checksum(&payload),
            payload,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Encode this snapshot into an opaque blob.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Self::encode_parts(&self.trip, self.is_paused, self.saved_at)
    }

    /// Decode a blob produced by [`Snapshot::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::SnapshotCorrupt`] if the blob is unreadable, was
    /// written by an unknown version, or fails its checksum.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| Error::snapshot_corrupt(format!("unreadable envelope: {e}")))?;

        if envelope.version != SNAPSHOT_VERSION {
            return Err(Error::snapshot_corrupt(format!(
                "unsupported version {}",
                envelope.version
            )));
        }
        if checksum(&envelope.payload) != envelope.checksum {
            return Err(Error::snapshot_corrupt("checksum mismatch"));
        }

        serde_json::from_str(&envelope.payload)
            .map_err(|e| Error::snapshot_corrupt(format!("unreadable payload: {e}")))
    }
}

#[derive(Debug, Clone)]
enum WriteRequest {
    Save { trip_id: TripId, blob: Arc<[u8]> },
    Clear,
}

impl WriteRequest {
    fn apply(&self, store: &dyn SnapshotStore, key: &str) -> Result<()> {
        match self {
            Self::Save { trip_id, blob } => {
                store.set(key, blob)?;
                debug!(trip_id = %trip_id, bytes = blob.len(), "Snapshot written");
            }
            Self::Clear => {
                store.delete(key)?;
                debug!("Snapshot cleared");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Pending {
    seq: u64,
    request: Option<WriteRequest>,
}

/// Background writer that coalesces snapshot writes.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct SnapshotWriter {
    requests: watch::Sender<Pending>,
    completed: watch::Receiver<u64>,
    failures: Arc<AtomicU64>,
}

impl SnapshotWriter {
    /// Spawn the writer task for `key` in `store`.
    #[must_use]
    pub fn spawn(store: Arc<dyn SnapshotStore>, key: impl Into<String>) -> Self {
        let (requests, rx) = watch::channel(Pending::default());
        let (done_tx, completed) = watch::channel(0);
        let failures = Arc::new(AtomicU64::new(0));

        tokio::spawn(run_writer(
            store,
            key.into(),
            rx,
            done_tx,
            Arc::clone(&failures),
        ));

        Self {
            requests,
            completed,
            failures,
        }
    }

    fn submit(&self, request: WriteRequest) {
        self.requests.send_modify(|pending| {
            pending.seq += 1;
            pending.request = Some(request);
        });
    }

    /// The most recent request, whether or not it has landed yet.
    fn latest(&self) -> Option<WriteRequest> {
        self.requests.borrow().request.clone()
    }

    /// Wait until every request submitted so far has been handled.
    pub async fn flush(&self) {
        let target = self.requests.borrow().seq;
        let mut completed = self.completed.clone();
        if completed.wait_for(|done| *done >= target).await.is_err() {
            warn!("Snapshot writer stopped before flushing");
        }
    }

    /// Number of writes that failed.
    #[must_use]
    pub fn failed_writes(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}

async fn run_writer(
    store: Arc<dyn SnapshotStore>,
    key: String,
    mut requests: watch::Receiver<Pending>,
    completed: watch::Sender<u64>,
    failures: Arc<AtomicU64>,
) {
    while requests.changed().await.is_ok() {
        let (seq, request) = {
            let pending = requests.borrow_and_update();
            (pending.seq, pending.request.clone())
        };

        if let Some(request) = request {
            let store = Arc::clone(&store);
            let key = key.clone();
            let outcome = tokio::task::spawn_blocking(move || request.apply(store.as_ref(), &key))
                .await
                .unwrap_or_else(|e| Err(Error::internal(format!("snapshot write panicked: {e}"))));

            if let Err(e) = outcome {
                failures.fetch_add(1, Ordering::SeqCst);
                warn!(error = %e, "Snapshot write failed, retrying on next trigger");
            }
        }

        completed.send_replace(seq);
    }
    debug!("Snapshot writer stopped");
}

/// Glue between the engine and a snapshot store.
#[derive(Debug)]
pub struct SnapshotBridge {
    store: Arc<dyn SnapshotStore>,
    writer: SnapshotWriter,
}

impl SnapshotBridge {
    /// Create a bridge over `store`, spawning its writer task.
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        let writer = SnapshotWriter::spawn(Arc::clone(&store), SNAPSHOT_KEY);
        Self { store, writer }
    }

    /// Queue a snapshot of `trip`.
    pub fn save(&self, trip: &Trip, is_paused: bool, saved_at: DateTime<Utc>) {
        match Snapshot::encode_parts(trip, is_paused, saved_at) {
            Ok(blob) => self.writer.submit(WriteRequest::Save {
                trip_id: trip.id.clone(),
                blob: blob.into(),
            }),
            Err(e) => warn!(trip_id = %trip.id, error = %e, "Failed to encode snapshot"),
        }
    }

    /// Queue removal of the stored snapshot.
    pub fn clear(&self) {
        self.writer.submit(WriteRequest::Clear);
    }

    /// Read the current snapshot, if any.
    ///
    /// Once this bridge has queued a save or a clear, that request is the
    /// current state even if the writer has not reached the store yet. Only
    /// a bridge that has queued nothing reads the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the blob is corrupt.
    pub fn load(&self) -> Result<Option<Snapshot>> {
        match self.writer.latest() {
            Some(WriteRequest::Clear) => Ok(None),
            Some(WriteRequest::Save { blob, .. }) => Snapshot::decode(&blob).map(Some),
            None => self
                .store
                .get(SNAPSHOT_KEY)?
                .map(|blob| Snapshot::decode(&blob))
                .transpose(),
        }
    }

    /// Wait for queued writes to land.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Number of writes that failed.
    #[must_use]
    pub fn failed_writes(&self) -> u64 {
        self.writer.failed_writes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trip::Coordinate;

    fn trip() -> Trip {
        let mut trip = Trip::new(Utc::now());
        trip.coordinates.push(Coordinate::new(1.0, 2.0));
        trip.distance_km = 2.0;
        trip
    }

    #[derive(Debug, Default)]
    struct FailingStore {
        attempts: AtomicU64,
    }

    impl SnapshotStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &[u8]) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::internal("disk full"))
        }

        fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_encode_decode() {
        let snapshot = Snapshot {
            trip: trip(),
            is_paused: true,
            saved_at: Utc::now(),
        };
        let blob = snapshot.encode().unwrap();
        assert_eq!(Snapshot::decode(&blob).unwrap(), snapshot);
    }

    #[test]
    fn test_decode_garbage() {
        let err = Snapshot::decode(b"not json").unwrap_err();
        assert!(matches!(err, Error::SnapshotCorrupt { .. }));
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let blob = Snapshot::encode_parts(&trip(), false, Utc::now()).unwrap();
        let tampered = String::from_utf8(blob)
            .unwrap()
            .replace("\\\"distance_km\\\":2.0", "\\\"distance_km\\\":9.0");
        let err = Snapshot::decode(tampered.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_decode_unknown_version() {
        let payload = "{}".to_string();
        let envelope = Envelope {
            version: 99,
            checksum: checksum(&payload),
            payload,
        };
        let blob = serde_json::to_vec(&envelope).unwrap();
        let err = Snapshot::decode(&blob).unwrap_err();
        assert!(err.to_string().contains("unsupported version 99"));
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySnapshotStore::new();
        assert!(store.get("k").unwrap().is_none());
        store.set("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_bridge_save_and_load() {
        let store = Arc::new(MemorySnapshotStore::new());
        let bridge = SnapshotBridge::new(store.clone());
        let trip = trip();

        bridge.save(&trip, false, Utc::now());
        bridge.flush().await;

        let loaded = bridge.load().unwrap().unwrap();
        assert_eq!(loaded.trip, trip);
        assert!(!loaded.is_paused);
    }

    #[tokio::test]
    async fn test_bridge_clear_supersedes_save() {
        let store = Arc::new(MemorySnapshotStore::new());
        let bridge = SnapshotBridge::new(store.clone());

        bridge.save(&trip(), false, Utc::now());
        bridge.clear();
        bridge.flush().await;

        assert!(bridge.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bridge_coalesces_writes() {
        let store = Arc::new(MemorySnapshotStore::new());
        let bridge = SnapshotBridge::new(store.clone());
        let mut trip = trip();

        for i in 0..50 {
            trip.distance_km = f64::from(i);
            bridge.save(&trip, false, Utc::now());
        }
        bridge.flush().await;

        assert!(store.write_count() < 50);
        assert_eq!(bridge.load().unwrap().unwrap().trip.distance_km, 49.0);
    }

    #[tokio::test]
    async fn test_bridge_load_sees_queued_clear() {
        let store = Arc::new(MemorySnapshotStore::new());
        store
            .set(SNAPSHOT_KEY, &Snapshot::encode_parts(&trip(), false, Utc::now()).unwrap())
            .unwrap();
        let bridge = SnapshotBridge::new(store.clone());

        bridge.clear();

        assert!(bridge.load().unwrap().is_none());
        bridge.flush().await;
        assert!(store.get(SNAPSHOT_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bridge_load_sees_queued_save() {
        let store = Arc::new(MemorySnapshotStore::new());
        let bridge = SnapshotBridge::new(store);
        let trip = trip();

        bridge.save(&trip, true, Utc::now());

        let loaded = bridge.load().unwrap().unwrap();
        assert_eq!(loaded.trip, trip);
        assert!(loaded.is_paused);
    }

    #[tokio::test]
    async fn test_bridge_load_after_failed_clear() {
        #[derive(Debug, Default)]
        struct StuckStore(MemorySnapshotStore);

        impl SnapshotStore for StuckStore {
            fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
                self.0.get(key)
            }

            fn set(&self, key: &str, value: &[u8]) -> Result<()> {
                self.0.set(key, value)
            }

            fn delete(&self, _key: &str) -> Result<()> {
                Err(Error::internal("read-only"))
            }
        }

        let store = Arc::new(StuckStore::default());
        let bridge = SnapshotBridge::new(store.clone());
        bridge.save(&trip(), false, Utc::now());
        bridge.flush().await;
        bridge.clear();
        bridge.flush().await;

        assert_eq!(bridge.failed_writes(), 1);
        assert!(store.get(SNAPSHOT_KEY).unwrap().is_some());
        assert!(bridge.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bridge_load_corrupt() {
        let store = Arc::new(MemorySnapshotStore::new());
        store.set(SNAPSHOT_KEY, b"{broken").unwrap();
        let bridge = SnapshotBridge::new(store);
        assert!(bridge.load().is_err());
    }

    #[tokio::test]
    async fn test_failed_write_is_counted_and_retried() {
        let store = Arc::new(FailingStore::default());
        let bridge = SnapshotBridge::new(store.clone());

        bridge.save(&trip(), false, Utc::now());
        bridge.flush().await;
        assert_eq!(bridge.failed_writes(), 1);

        bridge.save(&trip(), true, Utc::now());
        bridge.flush().await;
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flush_with_nothing_pending() {
        let bridge = SnapshotBridge::new(Arc::new(MemorySnapshotStore::new()));
        bridge.flush().await;
        assert_eq!(bridge.failed_writes(), 0);
    }
}
