//! Incident report types.
//!
//! A report is a categorized, geolocated incident submitted by a community
//! member. Other members confirm or deny it by voting.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Display name used when a reporter or commenter leaves their name blank.
pub const ANONYMOUS: &str = "Anonymous";

/// The kind of incident being reported.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Theft without violence.
    #[default]
    Robbery,
    /// Violent attack or mugging.
    Assault,
    /// Verbal or physical harassment.
    Harassment,
    /// Anything else.
    Other,
}

impl Category {
    /// All categories, in the order the report form offers them.
    pub const ALL: [Category; 4] = [
        Category::Robbery,
        Category::Assault,
        Category::Harassment,
        Category::Other,
    ];

    /// Wire name of the category.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Robbery => "robbery",
            Self::Assault => "assault",
            Self::Harassment => "harassment",
            Self::Other => "other",
        }
    }

    /// Badge color used when rendering this category.
    #[must_use]
    pub fn color(&self) -> &'static str {
        match self {
            Self::Robbery => "#e74c3c",
            Self::Assault => "#e67e22",
            Self::Harassment => "#9b59b6",
            Self::Other => "#3498db",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "robbery" => Ok(Self::Robbery),
            "assault" => Ok(Self::Assault),
            "harassment" => Ok(Self::Harassment),
            "other" => Ok(Self::Other),
            _ => Err(Error::validation(
                "category",
                format!("unknown category '{s}'"),
            )),
        }
    }
}

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
}

impl Coordinates {
    /// Create a coordinate pair.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Both components are finite and within the WGS84 ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Google Maps search URL centred on this point.
    #[must_use]
    pub fn maps_url(&self) -> String {
        crate::links::maps_search_url(*self)
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude, self.longitude)
    }
}

/// Anything that may carry a position on the map.
pub trait Located {
    /// The position, if one is known.
    fn coordinates(&self) -> Option<Coordinates>;
}

impl Located for Coordinates {
    fn coordinates(&self) -> Option<Coordinates> {
        Some(*self)
    }
}

impl Located for Option<Coordinates> {
    fn coordinates(&self) -> Option<Coordinates> {
        *self
    }
}

/// A community member's verdict on a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    /// The voter vouches for the report.
    Confirm,
    /// The voter disputes the report.
    Deny,
}

impl VoteKind {
    /// The opposite verdict.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Confirm => Self::Deny,
            Self::Deny => Self::Confirm,
        }
    }
}

impl std::fmt::Display for VoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confirm => write!(f, "confirm"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

impl FromStr for VoteKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "confirm" => Ok(Self::Confirm),
            "deny" => Ok(Self::Deny),
            _ => Err(Error::validation("vote", format!("unknown vote '{s}'"))),
        }
    }
}

/// An incident report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Identifier assigned by the store.
    pub id: i64,

    /// What kind of incident this is.
    pub category: Category,

    /// Free-text account of what happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Name the reporter chose to show.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter_name: Option<String>,

    /// Where it happened. Reports without a position are kept but never mapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coords: Option<Coordinates>,

    /// When the report was submitted.
    pub created_at: DateTime<Utc>,

    /// Voters who confirmed the report.
    pub confirm_votes: BTreeSet<String>,

    /// Voters who denied the report.
    pub deny_votes: BTreeSet<String>,
}

impl Report {
    /// Record `voter`'s verdict.
    ///
    /// The voter is added to the chosen set and removed from the other one,
    /// so an identifier is never in both. Voting the same way twice is a no-op.
    pub fn apply_vote(&mut self, voter: &str, kind: VoteKind) {
        let (chosen, other) = match kind {
            VoteKind::Confirm => (&mut self.confirm_votes, &mut self.deny_votes),
            VoteKind::Deny => (&mut self.deny_votes, &mut self.confirm_votes),
        };
        other.remove(voter);
        chosen.insert(voter.to_string());
    }

    /// The verdict `voter` has cast, if any.
    #[must_use]
    pub fn vote_of(&self, voter: &str) -> Option<VoteKind> {
        if self.confirm_votes.contains(voter) {
            Some(VoteKind::Confirm)
        } else if self.deny_votes.contains(voter) {
            Some(VoteKind::Deny)
        } else {
            None
        }
    }

    /// Number of confirmations.
    #[must_use]
    pub fn confirm_count(&self) -> usize {
        self.confirm_votes.len()
    }

    /// Number of denials.
    #[must_use]
    pub fn deny_count(&self) -> usize {
        self.deny_votes.len()
    }
}

impl Located for Report {
    fn coordinates(&self) -> Option<Coordinates> {
        self.coords
    }
}

/// The contents of the report form before submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportDraft {
    /// Selected category.
    pub category: Category,
    /// Description of the incident (required).
    pub description: String,
    /// Optional name of the reporter.
    pub reporter_name: Option<String>,
}

impl ReportDraft {
    /// Create a draft for the given category and description.
    #[must_use]
    pub fn new(category: Category, description: impl Into<String>) -> Self {
        Self {
            category,
            description: description.into(),
            reporter_name: None,
        }
    }

    /// Set the reporter name shown with the report.
    #[must_use]
    pub fn with_reporter(mut self, name: impl Into<String>) -> Self {
        self.reporter_name = Some(name.into());
        self
    }

    /// Check the form.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the description is blank.
    pub fn validate(&self) -> Result<()> {
        crate::validation::validate_description(&self.description)
    }

    /// The name stored with the report; blank names become [`ANONYMOUS`].
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.reporter_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => ANONYMOUS.to_string(),
        }
    }
}

/// A comment attached to a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Identifier assigned by the store.
    pub id: i64,
    /// Report this comment belongs to.
    pub report_id: i64,
    /// Comment body.
    pub text: String,
    /// Display name of the author.
    pub author: String,
    /// When the comment was posted.
    pub created_at: DateTime<Utc>,
}
