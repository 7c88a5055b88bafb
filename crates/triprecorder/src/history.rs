//! Destination for finished trips.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::Result;
use crate::trip::{Trip, TripId};

/// Durable store of finished trips.
///
/// Saving a trip whose id is already stored replaces it.
#[async_trait]
pub trait TripHistoryStore: Send + Sync + std::fmt::Debug {
    /// Persist a finished trip.
    ///
    /// # Errors
    ///
    /// Returns an error if the trip could not be stored.
    async fn save(&self, trip: &Trip) -> Result<()>;
}

/// In-memory trip history.
#[derive(Debug, Default)]
pub struct MemoryTripHistory {
    trips: Mutex<Vec<Trip>>,
}

impl MemoryTripHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored trips in insertion order.
    #[must_use]
    pub fn trips(&self) -> Vec<Trip> {
        self.trips
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look up a trip by id.
    #[must_use]
    pub fn get(&self, id: &TripId) -> Option<Trip> {
        self.trips
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| &t.id == id)
            .cloned()
    }

    /// Number of stored trips.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trips.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TripHistoryStore for MemoryTripHistory {
    async fn save(&self, trip: &Trip) -> Result<()> {
        let mut trips = self.trips.lock().unwrap_or_else(PoisonError::into_inner);
        match trips.iter_mut().find(|t| t.id == trip.id) {
            Some(existing) => *existing = trip.clone(),
            None => trips.push(trip.clone()),
        }
        Ok(())
    }
}
