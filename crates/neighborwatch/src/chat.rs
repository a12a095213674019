//! Zone chat messages and panic alerts.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::links::maps_search_url;
use crate::report::Coordinates;
use crate::validation::validate_message;

/// Title of the local notification raised for a panic message.
pub const PANIC_NOTIFICATION_TITLE: &str = "🚨 Emergency in your zone";

/// Author of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    /// Stable user id.
    pub id: String,
    /// Display name at the time of sending.
    pub name: String,
}

impl ChatUser {
    /// Create a chat author.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// What a chat message carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text typed by a user.
    #[default]
    Text,
    /// A panic alert with the sender's position.
    Panic,
}

impl MessageKind {
    /// Storage name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Panic => "panic",
        }
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "panic" => Ok(Self::Panic),
            other => Err(Error::internal(format!("unknown message kind: {other}"))),
        }
    }
}

/// A message stored in a zone's chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Database-assigned id, increasing in send order.
    pub id: i64,
    /// Zone the message belongs to.
    pub zone: String,
    /// Message body.
    pub text: String,
    /// Who sent it.
    pub sender: ChatUser,
    /// When it was sent.
    pub created_at: DateTime<Utc>,
    /// Text or panic.
    pub kind: MessageKind,
    /// Sender position, set for panic alerts.
    pub location: Option<Coordinates>,
}

impl ChatMessage {
    /// Whether this message is a panic alert.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        self.kind == MessageKind::Panic
    }
}

/// A message about to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    /// Destination zone.
    pub zone: String,
    /// Message body.
    pub text: String,
    /// Sender.
    pub sender: ChatUser,
    /// Text or panic.
    pub kind: MessageKind,
    /// Sender position, if shared.
    pub location: Option<Coordinates>,
}

impl OutgoingMessage {
    /// A plain text message.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the text is blank.
    pub fn text(zone: impl Into<String>, sender: ChatUser, text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        validate_message(&text)?;
        Ok(Self {
            zone: zone.into(),
            text,
            sender,
            kind: MessageKind::Text,
            location: None,
        })
    }
}

/// Body of a panic alert.
#[must_use]
pub fn panic_text(sender_name: &str, coords: Coordinates) -> String {
    format!(
        "🚨 PANIC ALERT! 🚨\nLocation: ({:.4}, {:.4})\nUser: {}\n📍 Google Maps: {}",
        coords.latitude,
        coords.longitude,
        sender_name,
        maps_search_url(coords)
    )
}

/// Build the panic alert a user broadcasts to their zone.
#[must_use]
pub fn panic_alert(zone: impl Into<String>, sender: ChatUser, coords: Coordinates) -> OutgoingMessage {
    OutgoingMessage {
        zone: zone.into(),
        text: panic_text(&sender.name, coords),
        sender,
        kind: MessageKind::Panic,
        location: Some(coords),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_text_format() {
        let text = panic_text("Ana", Coordinates::new(-0.180_653, -78.467_834));
        assert_eq!(
            text,
            "🚨 PANIC ALERT! 🚨\n\
             Location: (-0.1807, -78.4678)\n\
             User: Ana\n\
             📍 Google Maps: https://www.google.com/maps/search/?api=1&query=-0.180653,-78.467834"
        );
    }

    #[test]
    fn test_panic_alert_carries_location() {
        let coords = Coordinates::new(10.0, 20.0);
        let msg = panic_alert("Quito - Centro", ChatUser::new("u1", "Ana"), coords);
        assert_eq!(msg.kind, MessageKind::Panic);
        assert_eq!(msg.location, Some(coords));
        assert_eq!(msg.zone, "Quito - Centro");
        assert!(msg.text.contains("User: Ana"));
    }

    #[test]
    fn test_text_message_rejects_blank() {
        let err = OutgoingMessage::text("z", ChatUser::new("u1", "Ana"), "  ").unwrap_err();
        assert!(err.is_validation_error());

        let msg = OutgoingMessage::text("z", ChatUser::new("u1", "Ana"), "hi").unwrap();
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(msg.location.is_none());
    }

    #[test]
    fn test_message_kind_round_trip() {
        for kind in [MessageKind::Text, MessageKind::Panic] {
            assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
        }
        assert!("shout".parse::<MessageKind>().is_err());
    }

    #[test]
    fn test_is_panic() {
        let msg = ChatMessage {
            id: 1,
            zone: "z".into(),
            text: "help".into(),
            sender: ChatUser::new("u1", "Ana"),
            created_at: Utc::now(),
            kind: MessageKind::Panic,
            location: None,
        };
        assert!(msg.is_panic());
    }
}
