//! Form validation.
//!
//! The same rules the sign-up, sign-in, report and comment forms enforce
//! before anything is written to the store.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Minimum password length accepted at sign-up and sign-in.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Minimum display name length accepted at sign-up.
pub const MIN_NAME_LEN: usize = 3;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

/// Check an email address.
///
/// # Errors
///
/// Returns a validation error when the email is empty or malformed.
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(Error::validation("email", "Email is required"));
    }
    if !email_regex().is_match(email) {
        return Err(Error::validation("email", "Enter a valid email"));
    }
    Ok(())
}

/// Check a password.
///
/// # Errors
///
/// Returns a validation error when the password is empty or too short.
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::validation("password", "Password is required"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::validation(
            "password",
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}

/// Check a display name.
///
/// # Errors
///
/// Returns a validation error when the name is empty or too short.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("name", "Name is required"));
    }
    if name.chars().count() < MIN_NAME_LEN {
        return Err(Error::validation(
            "name",
            format!("Name must be at least {MIN_NAME_LEN} characters"),
        ));
    }
    Ok(())
}

/// Check that the confirmation matches the password.
///
/// # Errors
///
/// Returns a validation error when the confirmation is empty or differs.
pub fn validate_confirm_password(password: &str, confirm: &str) -> Result<()> {
    if confirm.is_empty() {
        return Err(Error::validation(
            "confirm_password",
            "Confirm your password",
        ));
    }
    if confirm != password {
        return Err(Error::validation(
            "confirm_password",
            "Passwords do not match",
        ));
    }
    Ok(())
}

/// Check an incident description.
///
/// # Errors
///
/// Returns a validation error when the description is blank.
pub fn validate_description(description: &str) -> Result<()> {
    if description.trim().is_empty() {
        return Err(Error::validation(
            "description",
            "Please describe the incident",
        ));
    }
    Ok(())
}

/// Check a comment or chat message body.
///
/// # Errors
///
/// Returns a validation error when the text is blank.
pub fn validate_message(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::validation("text", "Message cannot be empty"));
    }
    Ok(())
}

/// Every failing field of a form, in form order.
#[derive(Debug, Default)]
pub struct FieldErrors {
    errors: Vec<Error>,
}

impl FieldErrors {
    /// Record the outcome of one field check.
    pub fn check(&mut self, result: Result<()>) -> &mut Self {
        if let Err(err) = result {
            self.errors.push(err);
        }
        self
    }

    /// Whether every field passed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Names of the failing fields.
    #[must_use]
    pub fn fields(&self) -> Vec<&'static str> {
        self.errors
            .iter()
            .filter_map(|err| match err {
                Error::Validation { field, .. } => Some(*field),
                _ => None,
            })
            .collect()
    }

    /// Human-readable messages, one per failing field.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Fail with the first error, if any.
    ///
    /// # Errors
    ///
    /// Returns the first recorded validation error.
    pub fn into_result(self) -> Result<()> {
        match self.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Check the whole sign-up form.
#[must_use]
pub fn validate_sign_up(name: &str, email: &str, password: &str, confirm: &str) -> FieldErrors {
    let mut errors = FieldErrors::default();
    errors
        .check(validate_name(name))
        .check(validate_email(email))
        .check(validate_password(password))
        .check(validate_confirm_password(password, confirm));
    errors
}

/// Check the whole sign-in form.
#[must_use]
pub fn validate_sign_in(email: &str, password: &str) -> FieldErrors {
    let mut errors = FieldErrors::default();
    errors
        .check(validate_email(email))
        .check(validate_password(password));
    errors
}
