//! Configuration management for neighborwatch.
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

use crate::device::PermissionStatus;
use crate::error::{Error, Result};
use crate::heatmap::{HeatmapStyle, DEFAULT_GRADIENT, DEFAULT_PRECISION, MAX_PRECISION};
use crate::report::Coordinates;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "neighborwatch";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "neighborwatch.db";

/// Environment variable prefix.
const ENV_PREFIX: &str = "NWATCH_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `NWATCH_`, sections split on `__`)
/// 2. TOML config file at `~/.config/neighborwatch/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Heatmap rendering configuration.
    pub heatmap: HeatmapConfig,
    /// Session defaults.
    pub session: SessionConfig,
    /// Device location stand-in.
    pub location: LocationConfig,
    /// Notification stand-in.
    pub notifications: NotificationConfig,
    /// Live feed configuration.
    pub feed: FeedConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/neighborwatch/neighborwatch.db`
    pub database_path: Option<PathBuf>,
}

/// Heatmap-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Decimal places coordinates are rounded to before bucketing.
    pub precision: u32,
    /// Point radius handed to renderers.
    pub radius: u32,
    /// Layer opacity handed to renderers.
    pub opacity: f64,
}

/// Session-related configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Chat zone used when a profile has none.
    pub default_zone: String,
}

/// Where this device claims to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Answer to location permission requests.
    pub permission: PermissionStatus,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// City returned by reverse geocoding.
    pub city: Option<String>,
    /// District returned by reverse geocoding.
    pub district: Option<String>,
}

/// Notification-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Answer to notification permission requests.
    pub permission: PermissionStatus,
    /// Show local notifications at all.
    pub enabled: bool,
}

/// Live feed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Interval between store polls in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        let style = HeatmapStyle::default();
        Self {
            precision: DEFAULT_PRECISION,
            radius: style.radius,
            opacity: style.opacity,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_zone: "default_zone".to_string(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        // Quito, Ecuador
        Self {
            permission: PermissionStatus::Granted,
            latitude: -0.180_653,
            longitude: -78.467_834,
            city: Some("Quito".to_string()),
            district: Some("La Mariscal".to_string()),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            permission: PermissionStatus::Granted,
            enabled: true,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `NWATCH_`)
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
        if self.heatmap.precision > MAX_PRECISION {
            return Err(Error::ConfigValidation {
                message: format!(
                    "heatmap.precision ({}) cannot be greater than {MAX_PRECISION}",
                    self.heatmap.precision
                ),
            });
        }

        if !(0.0..=1.0).contains(&self.heatmap.opacity) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "heatmap.opacity ({}) must be between 0 and 1",
                    self.heatmap.opacity
                ),
            });
        }

        if !self.position().is_valid() {
            return Err(Error::ConfigValidation {
                message: format!(
                    "location ({}, {}) is outside latitude ±90 / longitude ±180",
                    self.location.latitude, self.location.longitude
                ),
            });
        }

        if self.session.default_zone.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "session.default_zone cannot be empty".to_string(),
            });
        }

        if self.feed.poll_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "feed.poll_interval_ms must be greater than 0".to_string(),
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

    /// Configured device position.
    #[must_use]
    pub fn position(&self) -> Coordinates {
        Coordinates::new(self.location.latitude, self.location.longitude)
    }

    /// Heatmap style handed to renderers.
    #[must_use]
    pub fn heatmap_style(&self) -> HeatmapStyle {
        HeatmapStyle {
            radius: self.heatmap.radius,
            opacity: self.heatmap.opacity,
            gradient: DEFAULT_GRADIENT.to_vec(),
        }
    }

    /// Get the feed poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.feed.poll_interval_ms)
    }
}
