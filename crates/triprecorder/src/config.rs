//! Configuration management for triprecorder.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;
use crate::error::{Error, Result};
use crate::filter::FilterConfig;
use crate::sample::LocationHints;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "triprecorder";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "trips.db";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "TRIPRECORDER_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TRIPRECORDER_`, sections split
///    on `__`, e.g. `TRIPRECORDER_TRACKING__MAX_ACCURACY_M=30`)
/// 2. TOML config file at `~/.config/triprecorder/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Recording thresholds.
    pub tracking: TrackingConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
}

/// Recording thresholds and heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Fixes reporting a larger accuracy radius are dropped.
    pub max_accuracy_m: f64,
    /// Movements shorter than this are jitter.
    pub min_delta_m: f64,
    /// Trips shorter than this cannot be finished.
    pub min_finish_distance_m: f64,
    /// Speeds below this display as zero and never set the maximum.
    pub noise_speed_kmh: f64,
    /// Calorie estimate per kilometre.
    pub calories_per_km: f64,
    /// Snapshot after this many accepted samples.
    pub snapshot_every_samples: u32,
    /// Older in-flight trips are abandoned instead of resumed.
    pub max_resume_age_hours: u32,
    /// Minimum-distance hint for the location source.
    pub location_min_distance_m: f64,
    /// Interval hint for the location source.
    pub location_interval_ms: u64,
    /// Default trip names are this prefix followed by the start date.
    pub default_name_prefix: String,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/triprecorder/trips.db`
    pub database_path: Option<PathBuf>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 50.0,
            min_delta_m: 5.0,
            min_finish_distance_m: 10.0,
            noise_speed_kmh: 1.0,
            calories_per_km: 45.0,
            snapshot_every_samples: 5,
            max_resume_age_hours: 24,
            location_min_distance_m: 10.0,
            location_interval_ms: 2000,
            default_name_prefix: "Ride".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let t = &self.tracking;
        let positive = [
            ("max_accuracy_m", t.max_accuracy_m),
            ("min_delta_m", t.min_delta_m),
            ("min_finish_distance_m", t.min_finish_distance_m),
            ("calories_per_km", t.calories_per_km),
            ("location_min_distance_m", t.location_min_distance_m),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be greater than 0 (got {value})"),
                });
            }
        }

        if !(t.noise_speed_kmh.is_finite() && t.noise_speed_kmh >= 0.0) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "noise_speed_kmh cannot be negative (got {})",
                    t.noise_speed_kmh
                ),
            });
        }

        if t.snapshot_every_samples == 0 {
            return Err(Error::ConfigValidation {
                message: "snapshot_every_samples must be greater than 0".to_string(),
            });
        }

        if t.max_resume_age_hours == 0 {
            return Err(Error::ConfigValidation {
                message: "max_resume_age_hours must be greater than 0".to_string(),
            });
        }

        if t.location_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "location_interval_ms must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Hints to pass to the location source.
    #[must_use]
    pub fn location_hints(&self) -> LocationHints {
        LocationHints {
            min_distance_m: self.tracking.location_min_distance_m,
            interval: Duration::from_millis(self.tracking.location_interval_ms),
        }
    }

    /// Engine options derived from the tracking section.
    #[must_use]
    pub fn engine_options(&self) -> EngineOptions {
        let t = &self.tracking;
        EngineOptions {
            filter: FilterConfig {
                max_accuracy_m: t.max_accuracy_m,
            },
            min_delta_km: t.min_delta_m / 1000.0,
            min_finish_distance_km: t.min_finish_distance_m / 1000.0,
            noise_speed_kmh: t.noise_speed_kmh,
            calories_per_km: t.calories_per_km,
            snapshot_every: t.snapshot_every_samples,
            max_resume_age: chrono::Duration::hours(i64::from(t.max_resume_age_hours)),
            location_hints: self.location_hints(),
            default_name_prefix: t.default_name_prefix.clone(),
        }
    }
}
