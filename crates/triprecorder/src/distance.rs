//! Great-circle distance accumulation and speed readings.

use crate::trip::Coordinate;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Default minimum movement counted towards distance (5 m).
pub const DEFAULT_MIN_DELTA_KM: f64 = 0.005;

/// Default speed below which readings are treated as noise.
pub const DEFAULT_NOISE_SPEED_KMH: f64 = 1.0;

/// Great-circle distance between two coordinates in kilometres.
#[must_use]
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Round to 5 decimal places (about 1 cm).
#[must_use]
pub fn round_km(km: f64) -> f64 {
    (km * 100_000.0).round() / 100_000.0
}

/// Rounded distance from the last accepted point to `sample`.
///
/// Zero when there is no previous point.
#[must_use]
pub fn delta(last_accepted: Option<Coordinate>, sample: Coordinate) -> f64 {
    last_accepted.map_or(0.0, |last| round_km(haversine_km(last, sample)))
}

/// Turns a stream of accepted positions into counted distance.
///
/// Movements shorter than the threshold are not counted, but the reference
/// point still advances to every accepted position.
#[derive(Debug, Clone)]
pub struct DistanceAccumulator {
    last: Option<Coordinate>,
    min_delta_km: f64,
}

impl DistanceAccumulator {
    /// Create an accumulator with no reference point.
    #[must_use]
    pub fn new(min_delta_km: f64) -> Self {
        Self {
            last: None,
            min_delta_km,
        }
    }

    /// The current reference point.
    #[must_use]
    pub fn reference(&self) -> Option<Coordinate> {
        self.last
    }

    /// Replace the reference point, e.g. with the last coordinate of a
    /// rehydrated trip.
    pub fn reseed(&mut self, reference: Option<Coordinate>) {
        self.last = reference;
    }

    /// Advance to `point` and return the distance to count, in kilometres.
    pub fn advance(&mut self, point: Coordinate) -> f64 {
        let d = delta(self.last, point);
        self.last = Some(point);
        if d >= self.min_delta_km {
            d
        } else {
            0.0
        }
    }
}

impl Default for DistanceAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DELTA_KM)
    }
}

/// A speed fix converted to km/h.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedReading {
    kmh: f64,
    noise_floor_kmh: f64,
}

impl SpeedReading {
    /// Convert a raw fix speed in m/s. Missing or negative speeds read as zero.
    #[must_use]
    pub fn from_mps(speed_mps: Option<f64>, noise_floor_kmh: f64) -> Self {
        let kmh = speed_mps
            .filter(|s| s.is_finite())
            .map_or(0.0, |s| (s * 3.6).max(0.0));
        Self {
            kmh,
            noise_floor_kmh,
        }
    }

    /// Speed to display; readings under the noise floor show as zero.
    #[must_use]
    pub fn display_kmh(&self) -> f64 {
        if self.counts_for_max() {
            self.kmh
        } else {
            0.0
        }
    }

    /// Whether the reading may update the trip's maximum speed.
    #[must_use]
    pub fn counts_for_max(&self) -> bool {
        self.kmh >= self.noise_floor_kmh
    }
}
