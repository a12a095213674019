//! Device collaborators: geolocation and local notifications.
//!
//! The app never talks to hardware directly. Positions and notifications
//! go through the [`Geolocator`] and [`Notifier`] traits so the CLI can use
//! configured stand-ins and tests can record what happened.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{LocationConfig, NotificationConfig};
use crate::error::{Error, Result};
use crate::report::Coordinates;

/// Zone name for accounts registered without a location.
pub const UNSPECIFIED_ZONE: &str = "Unspecified";

const UNKNOWN_CITY: &str = "unknown_city";
const UNKNOWN_DISTRICT: &str = "unknown_district";

/// Outcome of a permission request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    /// The user allowed access.
    #[default]
    Granted,
    /// The user refused access.
    Denied,
}

impl PermissionStatus {
    /// Whether access was allowed.
    #[must_use]
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

impl FromStr for PermissionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            other => Err(Error::ConfigValidation {
                message: format!("unknown permission status '{other}'"),
            }),
        }
    }
}

/// Result of reverse geocoding a position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    /// City name, if known.
    pub city: Option<String>,
    /// District or neighbourhood, if known.
    pub district: Option<String>,
}

impl Place {
    /// Create a place from its parts.
    #[must_use]
    pub fn new(city: Option<String>, district: Option<String>) -> Self {
        Self { city, district }
    }

    /// Chat zone for this place, `"<city> - <district>"`.
    #[must_use]
    pub fn zone(&self) -> String {
        let pick = |part: &Option<String>, fallback: &'static str| {
            part.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        format!(
            "{} - {}",
            pick(&self.city, UNKNOWN_CITY),
            pick(&self.district, UNKNOWN_DISTRICT)
        )
    }
}

/// Source of the device position.
#[async_trait::async_trait]
pub trait Geolocator: Send + Sync {
    /// Ask the user for foreground location access.
    async fn request_permission(&self) -> PermissionStatus;

    /// Current position of the device.
    ///
    /// # Errors
    ///
    /// Returns an error if no position is available.
    async fn current_position(&self) -> Result<Coordinates>;

    /// Resolve a position to a city and district.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    async fn reverse_geocode(&self, coords: Coordinates) -> Result<Place>;
}

/// A geolocator that always reports a configured position.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedGeolocator {
    permission: PermissionStatus,
    position: Coordinates,
    place: Place,
}

impl FixedGeolocator {
    /// Create a geolocator with a fixed answer for every call.
    #[must_use]
    pub fn new(permission: PermissionStatus, position: Coordinates, place: Place) -> Self {
        Self {
            permission,
            position,
            place,
        }
    }

    /// Build from the `[location]` config section.
    #[must_use]
    pub fn from_config(config: &LocationConfig) -> Self {
        Self::new(
            config.permission,
            Coordinates::new(config.latitude, config.longitude),
            Place::new(config.city.clone(), config.district.clone()),
        )
    }

    /// Replace the reported position.
    #[must_use]
    pub fn with_position(mut self, position: Coordinates) -> Self {
        self.position = position;
        self
    }
}

#[async_trait::async_trait]
impl Geolocator for FixedGeolocator {
    async fn request_permission(&self) -> PermissionStatus {
        self.permission
    }

    async fn current_position(&self) -> Result<Coordinates> {
        if self.position.is_valid() {
            Ok(self.position)
        } else {
            Err(Error::internal(format!(
                "configured position {} is out of range",
                self.position
            )))
        }
    }

    async fn reverse_geocode(&self, _coords: Coordinates) -> Result<Place> {
        Ok(self.place.clone())
    }
}

/// Ask for location access and read the current position.
///
/// # Errors
///
/// Returns `Error::PermissionDenied` if the user refused access.
pub async fn locate(geolocator: &dyn Geolocator) -> Result<Coordinates> {
    if !geolocator.request_permission().await.is_granted() {
        warn!("Location permission denied");
        return Err(Error::permission_denied(
            "location",
            "Set location.permission = \"granted\" in the config file",
        ));
    }
    let coords = geolocator.current_position().await?;
    debug!(latitude = coords.latitude, longitude = coords.longitude, "Located device");
    Ok(coords)
}

/// A notification shown on this device only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalNotification {
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
}

impl LocalNotification {
    /// Create a notification.
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Push and local notification collaborator.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Ask the user for notification access.
    async fn request_permission(&self) -> PermissionStatus;

    /// Push token identifying this device.
    ///
    /// # Errors
    ///
    /// Returns an error if no token can be obtained.
    async fn device_token(&self) -> Result<String>;

    /// Show a notification right away.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification could not be shown.
    async fn schedule_local(&self, notification: LocalNotification) -> Result<()>;
}

/// Prints notifications to stdout.
#[derive(Debug, Clone)]
pub struct ConsoleNotifier {
    permission: PermissionStatus,
    enabled: bool,
    token: String,
}

impl ConsoleNotifier {
    /// Create a console notifier with the given device token.
    #[must_use]
    pub fn new(config: &NotificationConfig, token: impl Into<String>) -> Self {
        Self {
            permission: config.permission,
            enabled: config.enabled,
            token: token.into(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for ConsoleNotifier {
    async fn request_permission(&self) -> PermissionStatus {
        self.permission
    }

    async fn device_token(&self) -> Result<String> {
        if !self.permission.is_granted() {
            return Err(Error::permission_denied(
                "notifications",
                "Set notifications.permission = \"granted\" in the config file",
            ));
        }
        Ok(self.token.clone())
    }

    async fn schedule_local(&self, notification: LocalNotification) -> Result<()> {
        if !self.enabled || !self.permission.is_granted() {
            debug!(title = %notification.title, "Notifications off, dropping");
            return Ok(());
        }
        info!(title = %notification.title, "Local notification");
        println!("🔔 {}\n{}\n", notification.title, notification.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geolocator(permission: PermissionStatus) -> FixedGeolocator {
        FixedGeolocator::new(
            permission,
            Coordinates::new(-0.18, -78.47),
            Place::new(Some("Quito".into()), Some("La Mariscal".into())),
        )
    }

    #[test]
    fn test_permission_status_parse() {
        assert_eq!("granted".parse::<PermissionStatus>().unwrap(), PermissionStatus::Granted);
        assert_eq!("DENIED".parse::<PermissionStatus>().unwrap(), PermissionStatus::Denied);
        assert!("maybe".parse::<PermissionStatus>().is_err());
        assert_eq!(PermissionStatus::Denied.to_string(), "denied");
    }

    #[test]
    fn test_place_zone() {
        let place = Place::new(Some("Quito".into()), Some("La Mariscal".into()));
        assert_eq!(place.zone(), "Quito - La Mariscal");
    }

    #[test]
    fn test_place_zone_fallbacks() {
        assert_eq!(Place::default().zone(), "unknown_city - unknown_district");
        let place = Place::new(Some("Cuenca".into()), Some("  ".into()));
        assert_eq!(place.zone(), "Cuenca - unknown_district");
    }

    #[tokio::test]
    async fn test_locate_granted() {
        let geo = geolocator(PermissionStatus::Granted);
        let coords = locate(&geo).await.unwrap();
        assert_eq!(coords, Coordinates::new(-0.18, -78.47));
    }

    #[tokio::test]
    async fn test_locate_denied() {
        let geo = geolocator(PermissionStatus::Denied);
        let err = locate(&geo).await.unwrap_err();
        assert!(err.is_permission_error());
    }

    #[tokio::test]
    async fn test_fixed_geolocator_rejects_invalid_position() {
        let geo = geolocator(PermissionStatus::Granted).with_position(Coordinates::new(95.0, 0.0));
        assert!(geo.current_position().await.is_err());
    }

    #[tokio::test]
    async fn test_reverse_geocode() {
        let geo = geolocator(PermissionStatus::Granted);
        let place = geo.reverse_geocode(Coordinates::new(0.0, 0.0)).await.unwrap();
        assert_eq!(place.city.as_deref(), Some("Quito"));
    }

    #[tokio::test]
    async fn test_console_notifier_token() {
        let config = NotificationConfig::default();
        let notifier = ConsoleNotifier::new(&config, "device-abc");
        assert_eq!(notifier.device_token().await.unwrap(), "device-abc");

        let denied = NotificationConfig {
            permission: PermissionStatus::Denied,
            ..NotificationConfig::default()
        };
        let notifier = ConsoleNotifier::new(&denied, "device-abc");
        assert!(notifier.device_token().await.is_err());
        // Denied notifications are dropped, not errors.
        assert!(notifier
            .schedule_local(LocalNotification::new("t", "b"))
            .await
            .is_ok());
    }
}
