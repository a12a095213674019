//! Emergency numbers, useful links and handing URLs off to the system.

use std::process::Command;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::report::Coordinates;

/// A phone line shown in the help center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyNumber {
    /// Service name.
    pub name: &'static str,
    /// Number to dial.
    pub number: &'static str,
    /// When to call it.
    pub description: &'static str,
}

/// Emergency lines, most general first.
pub const EMERGENCY_NUMBERS: [EmergencyNumber; 4] = [
    EmergencyNumber {
        name: "Emergencies - ECU911",
        number: "911",
        description: "Single emergency line for every kind of situation",
    },
    EmergencyNumber {
        name: "National Police",
        number: "101",
        description: "Complaints, robberies and anything needing police intervention",
    },
    EmergencyNumber {
        name: "Fire Department",
        number: "102",
        description: "Fires, rescues and related emergencies",
    },
    EmergencyNumber {
        name: "Red Cross",
        number: "131",
        description: "Medical emergencies and first aid",
    },
];

/// An external site shown in the help center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsefulLink {
    /// Display name.
    pub name: &'static str,
    /// Target URL.
    pub url: &'static str,
    /// One-line description.
    pub description: &'static str,
}

/// Useful links, in display order.
pub const USEFUL_LINKS: [UsefulLink; 3] = [
    UsefulLink {
        name: "Ministry of the Interior",
        url: "https://www.ministeriodegobierno.gob.ec/",
        description: "Official information and services of the Ministry",
    },
    UsefulLink {
        name: "ECU911 App",
        url: "https://play.google.com/store/apps/details?id=ec.gob.ecu911.appmovil",
        description: "Official app for reporting emergencies",
    },
    UsefulLink {
        name: "Safe Zones Map",
        url: "https://www.google.com/maps",
        description: "Check the safe zones in your city",
    },
];

/// Look up an emergency line by its number.
#[must_use]
pub fn emergency_number(number: &str) -> Option<&'static EmergencyNumber> {
    EMERGENCY_NUMBERS.iter().find(|entry| entry.number == number)
}

/// `tel:` URL for a phone number.
#[must_use]
pub fn tel_url(number: &str) -> String {
    format!("tel:{number}")
}

/// Google Maps search URL for a point.
#[must_use]
pub fn maps_search_url(coords: Coordinates) -> String {
    format!(
        "https://www.google.com/maps/search/?api=1&query={},{}",
        coords.latitude, coords.longitude
    )
}

/// Google Maps search for police stations around a point.
#[must_use]
pub fn police_stations_url(coords: Coordinates) -> String {
    format!(
        "https://www.google.com/maps/search/comisar%C3%ADa/@{},{},14z",
        coords.latitude, coords.longitude
    )
}

/// Something that can open a URL on behalf of the user.
pub trait LinkOpener {
    /// Open the URL.
    ///
    /// # Errors
    ///
    /// Returns `Error::LinkOpen` if the URL could not be handed off.
    fn open(&self, url: &str) -> Result<()>;
}

/// Opens URLs with the platform's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl SystemOpener {
    fn command(url: &str) -> Command {
        #[cfg(target_os = "macos")]
        {
            let mut cmd = Command::new("open");
            cmd.arg(url);
            cmd
        }
        #[cfg(target_os = "windows")]
        {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", "", url]);
            cmd
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(url);
            cmd
        }
    }
}

impl LinkOpener for SystemOpener {
    fn open(&self, url: &str) -> Result<()> {
        debug!(url, "Opening link");
        let status = Self::command(url).status().map_err(|e| Error::LinkOpen {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if status.success() {
            info!(url, "Opened link");
            Ok(())
        } else {
            Err(Error::LinkOpen {
                url: url.to_string(),
                message: format!("handler exited with {status}"),
            })
        }
    }
}

/// Prints URLs instead of opening them.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintOpener;

impl LinkOpener for PrintOpener {
    fn open(&self, url: &str) -> Result<()> {
        println!("{url}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingOpener {
        opened: RefCell<Vec<String>>,
    }

    impl LinkOpener for RecordingOpener {
        fn open(&self, url: &str) -> Result<()> {
            self.opened.borrow_mut().push(url.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_emergency_numbers() {
        let numbers: Vec<_> = EMERGENCY_NUMBERS.iter().map(|e| e.number).collect();
        assert_eq!(numbers, vec!["911", "101", "102", "131"]);
        assert_eq!(emergency_number("101").unwrap().name, "National Police");
        assert!(emergency_number("112").is_none());
    }

    #[test]
    fn test_useful_links_are_https() {
        assert_eq!(USEFUL_LINKS.len(), 3);
        assert!(USEFUL_LINKS.iter().all(|l| l.url.starts_with("https://")));
    }

    #[test]
    fn test_tel_url() {
        assert_eq!(tel_url("911"), "tel:911");
    }

    #[test]
    fn test_maps_search_url() {
        let url = maps_search_url(Coordinates::new(-0.18, -78.47));
        assert_eq!(
            url,
            "https://www.google.com/maps/search/?api=1&query=-0.18,-78.47"
        );
    }

    #[test]
    fn test_police_stations_url() {
        let url = police_stations_url(Coordinates::new(-2.19, -79.88));
        assert!(url.ends_with("/@-2.19,-79.88,14z"));
    }

    #[test]
    fn test_opener_trait_object() {
        let recorder = RecordingOpener::default();
        let opener: &dyn LinkOpener = &recorder;
        opener.open(&tel_url("102")).unwrap();
        assert_eq!(recorder.opened.borrow().as_slice(), ["tel:102"]);
    }

    #[test]
    fn test_print_opener() {
        assert!(PrintOpener.open("https://example.com").is_ok());
    }
}
