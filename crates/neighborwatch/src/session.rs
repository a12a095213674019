//! Accounts, sign-in state and the current-user change stream.
//!
//! [`Auth`] is the authentication service. It keeps the signed-in profile in
//! a `watch` channel so any part of the app can follow sign-in and sign-out,
//! and persists the session in the store so later invocations stay signed in.
//! Code that needs the user receives a [`Session`] snapshot explicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chat::ChatUser;
use crate::device::{Notifier, Place, UNSPECIFIED_ZONE};
use crate::error::{Error, Result};
use crate::report::Coordinates;
use crate::storage::SharedStorage;
use crate::validation::{validate_sign_in, validate_sign_up};

/// A registered community member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Stable user id.
    pub uid: String,
    /// Sign-in email, stored lowercase.
    pub email: String,
    /// Name shown in chat and on reports.
    pub display_name: String,
    /// Chat zone, `"<city> - <district>"`.
    pub zone: String,
    /// Push token of the device last signed in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_token: Option<String>,
    /// Position at registration time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<Coordinates>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    /// This user as a chat author.
    #[must_use]
    pub fn chat_user(&self) -> ChatUser {
        ChatUser::new(self.uid.clone(), self.display_name.clone())
    }
}

/// Salted password digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Random per-user salt.
    pub salt: String,
    /// BLAKE3 hex digest of salt and password.
    pub digest: String,
}

impl Credentials {
    /// Derive credentials for a new password with a fresh salt.
    #[must_use]
    pub fn derive(password: &str) -> Self {
        Self::with_salt(uuid::Uuid::new_v4().simple().to_string(), password)
    }

    /// Derive credentials with a known salt.
    #[must_use]
    pub fn with_salt(salt: String, password: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(salt.as_bytes());
        hasher.update(b":");
        hasher.update(password.as_bytes());
        let digest = hasher.finalize().to_hex().to_string();
        Self { salt, digest }
    }

    /// Whether `password` produces the stored digest.
    #[must_use]
    pub fn verify(&self, password: &str) -> bool {
        let candidate = Self::with_salt(self.salt.clone(), password);
        candidate.digest == self.digest
    }
}

/// The registration form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignUpForm {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Password.
    pub password: String,
    /// Password repeated.
    pub confirm_password: String,
}

/// Snapshot of who is signed in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    user: Option<UserProfile>,
}

impl Session {
    /// Create a session snapshot.
    #[must_use]
    pub fn new(user: Option<UserProfile>) -> Self {
        Self { user }
    }

    /// The signed-in user, if any.
    #[must_use]
    pub fn current(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    /// Whether someone is signed in.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }

    /// The signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotSignedIn` when nobody is signed in.
    pub fn require_user(&self) -> Result<&UserProfile> {
        self.user.as_ref().ok_or(Error::NotSignedIn)
    }

    /// The user's chat zone, or `default` when signed out or unassigned.
    #[must_use]
    pub fn zone(&self, default: &str) -> String {
        self.user
            .as_ref()
            .map(|u| u.zone.trim())
            .filter(|z| !z.is_empty())
            .unwrap_or(default)
            .to_string()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Authentication service over the local store.
#[derive(Debug)]
pub struct Auth {
    storage: SharedStorage,
    current: watch::Sender<Option<UserProfile>>,
}

impl Auth {
    /// Create the service. Nobody is signed in until [`Auth::restore`] or
    /// [`Auth::sign_in`] succeeds.
    #[must_use]
    pub fn new(storage: SharedStorage) -> Self {
        let (current, _) = watch::channel(None);
        Self { storage, current }
    }

    /// Follow sign-in and sign-out.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<Option<UserProfile>> {
        self.current.subscribe()
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn session(&self) -> Session {
        Session::new(self.current.borrow().clone())
    }

    fn publish(&self, user: Option<UserProfile>) {
        self.current.send_replace(user);
    }

    /// Load the session persisted by a previous sign-in.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn restore(&self) -> Result<Session> {
        let storage = self.storage.lock().await;
        let user = match storage.session_uid()? {
            Some(uid) => {
                let user = storage.user_by_uid(&uid)?;
                if user.is_none() {
                    warn!(uid = %uid, "Persisted session points at a missing user, clearing");
                    storage.clear_session()?;
                }
                user
            }
            None => None,
        };
        drop(storage);

        debug!(signed_in = user.is_some(), "Restored session");
        self.publish(user.clone());
        Ok(Session::new(user))
    }

    /// Create an account.
    ///
    /// With a located `place`, the zone is derived from it and the position
    /// is kept as the user's home; otherwise the zone is `Unspecified`. The
    /// new user is not signed in.
    ///
    /// # Errors
    ///
    /// Returns the first validation error of the form, or `Error::EmailTaken`.
    pub async fn sign_up(
        &self,
        form: &SignUpForm,
        location: Option<(Coordinates, Place)>,
    ) -> Result<UserProfile> {
        let email = normalize_email(&form.email);
        validate_sign_up(&form.name, &email, &form.password, &form.confirm_password)
            .into_result()?;

        let (zone, home) = match location {
            Some((coords, place)) => (place.zone(), Some(coords)),
            None => (UNSPECIFIED_ZONE.to_string(), None),
        };

        let profile = UserProfile {
            uid: uuid::Uuid::new_v4().to_string(),
            email,
            display_name: form.name.trim().to_string(),
            zone,
            push_token: None,
            home,
            created_at: Utc::now(),
        };

        let storage = self.storage.lock().await;
        if storage.user_by_email(&profile.email)?.is_some() {
            return Err(Error::EmailTaken {
                email: profile.email,
            });
        }
        storage.insert_user(&profile, &Credentials::derive(&form.password))?;

        info!(uid = %profile.uid, zone = %profile.zone, "Registered user");
        Ok(profile)
    }

    /// Sign in and remember the session.
    ///
    /// The device push token is attached to the profile when it changed.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed form, or
    /// `Error::AuthFailed` when the email or password is wrong.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        notifier: &dyn Notifier,
    ) -> Result<UserProfile> {
        let email = normalize_email(email);
        validate_sign_in(&email, password).into_result()?;

        let found = self.storage.lock().await.credentials(&email)?;
        let Some((mut profile, credentials)) = found else {
            debug!("Sign-in for unknown email");
            return Err(Error::AuthFailed);
        };
        if !credentials.verify(password) {
            debug!(uid = %profile.uid, "Sign-in with wrong password");
            return Err(Error::AuthFailed);
        }

        let token = match notifier.device_token().await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "No push token, notifications disabled for this session");
                None
            }
        };

        let storage = self.storage.lock().await;
        if let Some(token) = token {
            if profile.push_token.as_deref() != Some(token.as_str()) {
                storage.update_push_token(&profile.uid, &token)?;
                profile.push_token = Some(token);
            }
        }
        storage.set_session_uid(&profile.uid)?;
        drop(storage);

        info!(uid = %profile.uid, "Signed in");
        self.publish(Some(profile.clone()));
        Ok(profile)
    }

    /// Sign out and forget the persisted session.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn sign_out(&self) -> Result<()> {
        self.storage.lock().await.clear_session()?;
        info!("Signed out");
        self.publish(None);
        Ok(())
    }

    /// Move the signed-in user to another chat zone.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotSignedIn` when nobody is signed in, or a validation
    /// error for a blank zone.
    pub async fn set_zone(&self, zone: &str) -> Result<UserProfile> {
        let mut profile = self.session().require_user()?.clone();
        let zone = zone.trim();
        if zone.is_empty() {
            return Err(Error::validation("zone", "Zone cannot be empty"));
        }

        self.storage.lock().await.update_zone(&profile.uid, zone)?;
        profile.zone = zone.to_string();
        self.publish(Some(profile.clone()));
        Ok(profile)
    }
}
