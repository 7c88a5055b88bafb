//! Location samples and the sources that deliver them.
//!
//! A [`LocationSource`] hands out a [`Subscription`]: a channel of
//! [`LocationSample`]s paired with a [`SubscriptionHandle`] that acts as the
//! cancellation token. Once a subscription is cancelled it yields nothing
//! further, even if samples are still buffered in the channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::trip::Coordinate;

/// A raw GPS fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Latitude in degrees.
    pub latitude: f64,

    /// Longitude in degrees.
    pub longitude: f64,

    /// Horizontal accuracy radius reported by the receiver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,

    /// Ground speed reported by the receiver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,

    /// When the fix was taken.
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    /// Create a sample without accuracy or speed information.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
            speed_mps: None,
            timestamp,
        }
    }

    /// Attach a horizontal accuracy.
    #[must_use]
    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    /// Attach a ground speed.
    #[must_use]
    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    /// The position of this fix.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Delivery hints passed to a location source.
///
/// Sources may ignore these; the engine tolerates any cadence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationHints {
    /// Minimum movement between deliveries.
    pub min_distance_m: f64,
    /// Desired delivery interval.
    pub interval: Duration,
}

impl Default for LocationHints {
    fn default() -> Self {
        Self {
            min_distance_m: 10.0,
            interval: Duration::from_millis(2000),
        }
    }
}

/// Trait for platform-specific location providers.
pub trait LocationSource: Send {
    /// The name of this source (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Begin delivering samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot start delivering, such as when
    /// permission is missing or it is already subscribed.
    fn subscribe(&mut self, hints: LocationHints) -> Result<Subscription>;
}

/// Cancellation token for a subscription.
///
/// Cloneable; all clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionHandle {
    cancelled: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Create a new, live handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the subscription.
    pub fn unsubscribe(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether the subscription has been cancelled.
    #[must_use]
    pub fn is_unsubscribed(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A live stream of samples from a [`LocationSource`].
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<LocationSample>,
    handle: SubscriptionHandle,
}

impl Subscription {
    /// Wrap a receiver and its cancellation handle.
    #[must_use]
    pub fn new(receiver: mpsc::Receiver<LocationSample>, handle: SubscriptionHandle) -> Self {
        Self { receiver, handle }
    }

    /// A handle that can cancel this subscription from elsewhere.
    #[must_use]
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Cancel this subscription and drop anything still buffered.
    pub fn unsubscribe(&mut self) {
        self.handle.unsubscribe();
        self.receiver.close();
    }

    /// Wait for the next sample.
    ///
    /// Returns `None` once the subscription is cancelled or the source has
    /// gone away. Cancel-safe.
    pub async fn next(&mut self) -> Option<LocationSample> {
        if self.handle.is_unsubscribed() {
            return None;
        }
        let sample = self.receiver.recv().await?;
        if self.handle.is_unsubscribed() {
            debug!("Dropping sample delivered after unsubscribe");
            return None;
        }
        Some(sample)
    }
}

/// A location source fed from an in-process channel.
///
/// Platform bridges and replays push samples into the paired sender.
#[derive(Debug)]
pub struct ChannelLocationSource {
    receiver: Option<mpsc::Receiver<LocationSample>>,
}

impl ChannelLocationSource {
    /// Create a source and the sender that feeds it.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<LocationSample>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { receiver: Some(rx) }, tx)
    }
}

impl LocationSource for ChannelLocationSource {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn subscribe(&mut self, hints: LocationHints) -> Result<Subscription> {
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| Error::subscribe(self.name(), "already subscribed"))?;
        debug!(
            min_distance_m = hints.min_distance_m,
            interval_ms = u64::try_from(hints.interval.as_millis()).unwrap_or(u64::MAX),
            "Location subscription opened"
        );
        Ok(Subscription::new(receiver, SubscriptionHandle::new()))
    }
}
