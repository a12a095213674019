//! Error types for neighborwatch.
//!
//! This module defines all error types used throughout the neighborwatch crate,
//! providing detailed context for debugging and user-facing messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for neighborwatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Domain Errors ===
    /// A form field failed validation.
    #[error("{field}: {message}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// What the user needs to fix.
        message: String,
    },

    /// A referenced document does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of document (report, user, ...).
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The command needs a signed-in user.
    #[error("not signed in; run `nwatch login` first")]
    NotSignedIn,

    /// Email or password did not match.
    #[error("incorrect email or password")]
    AuthFailed,

    /// Sign-up with an email that already has an account.
    #[error("an account already exists for {email}")]
    EmailTaken {
        /// The email that is already registered.
        email: String,
    },

    /// A device permission was denied.
    #[error("permission denied: {permission}. {instructions}")]
    PermissionDenied {
        /// Name of the required permission.
        permission: String,
        /// Instructions for granting the permission.
        instructions: String,
    },

    /// The user declined a confirmation prompt.
    #[error("cancelled")]
    Cancelled,

    // === Feed Errors ===
    /// A live subscription ended because its consumer went away.
    #[error("feed '{name}' closed")]
    FeedClosed {
        /// Name of the feed.
        name: &'static str,
    },

    // === Link Errors ===
    /// The system could not open a URL.
    #[error("failed to open {url}: {message}")]
    LinkOpen {
        /// The URL that was handed off.
        url: String,
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for neighborwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new validation error for a form field.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a permission denied error with instructions.
    #[must_use]
    pub fn permission_denied(
        permission: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self::PermissionDenied {
            permission: permission.into(),
            instructions: instructions.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is a permission issue.
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Check if this error came from form validation.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this error means a document was missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
