//! Storage layer for neighborwatch.
//!
//! This module provides `SQLite`-based persistent storage for user profiles,
//! incident reports with their votes and comments, and zone chat. Every write
//! to reports or votes bumps a revision counter so that live feeds in this or
//! another process can notice the change by polling.

pub mod migrations;
pub mod schema;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info, warn};

use crate::chat::{ChatMessage, ChatUser, MessageKind, OutgoingMessage};
use crate::error::{Error, Result};
use crate::report::{Category, Comment, Coordinates, Report, ReportDraft, VoteKind, ANONYMOUS};
use crate::session::{Credentials, UserProfile};
use crate::validation::validate_message;

const REPORTS_REVISION_KEY: &str = "reports_revision";
const SESSION_UID_KEY: &str = "session_uid";
const DEVICE_TOKEN_KEY: &str = "device_token";
const INTRO_SEEN_KEY: &str = "intro_seen";

const REPORT_COLUMNS: &str =
    "id, category, description, reporter_name, latitude, longitude, created_at";
const USER_COLUMNS: &str =
    "uid, email, display_name, zone, push_token, home_latitude, home_longitude, created_at";
const MESSAGE_COLUMNS: &str =
    "id, zone, text, sender_id, sender_name, kind, latitude, longitude, created_at";

/// A [`Storage`] shared between the CLI and live feed tasks.
pub type SharedStorage = Arc<tokio::sync::Mutex<Storage>>;

/// Storage engine for community data.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets a watching process read while another one writes.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Wrap this storage for sharing with feed tasks.
    #[must_use]
    pub fn into_shared(self) -> SharedStorage {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    // === Metadata ===

    fn meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            (key, value),
        )?;
        Ok(())
    }

    fn delete_meta(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM metadata WHERE key = ?1", [key])?;
        Ok(())
    }

    fn bump_reports_revision(&self) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO metadata (key, value) VALUES (?1, '1')
            ON CONFLICT(key) DO UPDATE SET value = CAST(value AS INTEGER) + 1
            ",
            [REPORTS_REVISION_KEY],
        )?;
        Ok(())
    }

    /// Counter bumped on every report or vote write. Starts at 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn reports_revision(&self) -> Result<i64> {
        match self.meta(REPORTS_REVISION_KEY)? {
            Some(value) => value.parse().map_err(|_| {
                Error::internal(format!("invalid reports revision: {value}"))
            }),
            None => Ok(0),
        }
    }

    /// Whether the intro tutorial has never been dismissed on this database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn is_first_run(&self) -> Result<bool> {
        Ok(self.meta(INTRO_SEEN_KEY)?.is_none())
    }

    /// Remember that the intro tutorial was shown.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_intro_seen(&self) -> Result<()> {
        self.set_meta(INTRO_SEEN_KEY, "true")
    }

    /// Push token of this device, generated on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn device_token(&self) -> Result<String> {
        if let Some(token) = self.meta(DEVICE_TOKEN_KEY)? {
            return Ok(token);
        }
        let token = format!("device-{}", uuid::Uuid::new_v4());
        self.set_meta(DEVICE_TOKEN_KEY, &token)?;
        debug!(token = %token, "Generated device token");
        Ok(token)
    }

    // === Users ===

    /// Insert a new user profile with its password credentials.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmailTaken` if the email is already registered.
    pub fn insert_user(&self, profile: &UserProfile, credentials: &Credentials) -> Result<()> {
        let (home_lat, home_lng) = split_coords(profile.home);
        let result = self.conn.execute(
            r"
            INSERT INTO users (uid, email, display_name, password_salt, password_digest,
                               zone, push_token, home_latitude, home_longitude, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                profile.uid,
                profile.email,
                profile.display_name,
                credentials.salt,
                credentials.digest,
                profile.zone,
                profile.push_token,
                home_lat,
                home_lng,
                profile.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => {
                debug!(uid = %profile.uid, "Inserted user");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(Error::EmailTaken {
                    email: profile.email.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a user by email (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn user_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
        let user = self
            .conn
            .query_row(&sql, [email], Self::row_to_user)
            .optional()?;
        Ok(user)
    }

    /// Look up a user by uid.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn user_by_uid(&self, uid: &str) -> Result<Option<UserProfile>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE uid = ?1");
        let user = self
            .conn
            .query_row(&sql, [uid], Self::row_to_user)
            .optional()?;
        Ok(user)
    }

    /// Profile and stored credentials for an email, used at sign-in.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn credentials(&self, email: &str) -> Result<Option<(UserProfile, Credentials)>> {
        let sql = format!(
            "SELECT {USER_COLUMNS}, password_salt, password_digest FROM users WHERE email = ?1"
        );
        let found = self
            .conn
            .query_row(&sql, [email], |row| {
                let profile = Self::row_to_user(row)?;
                let credentials = Credentials {
                    salt: row.get(8)?,
                    digest: row.get(9)?,
                };
                Ok((profile, credentials))
            })
            .optional()?;
        Ok(found)
    }

    /// Replace a user's push token.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the user does not exist.
    pub fn update_push_token(&self, uid: &str, token: &str) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE users SET push_token = ?1 WHERE uid = ?2",
            (token, uid),
        )?;
        if affected == 0 {
            return Err(Error::not_found("user", uid));
        }
        debug!(uid, "Updated push token");
        Ok(())
    }

    /// Move a user to another chat zone.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the user does not exist.
    pub fn update_zone(&self, uid: &str, zone: &str) -> Result<()> {
        let affected = self
            .conn
            .execute("UPDATE users SET zone = ?1 WHERE uid = ?2", (zone, uid))?;
        if affected == 0 {
            return Err(Error::not_found("user", uid));
        }
        info!(uid, zone, "Updated zone");
        Ok(())
    }

    /// Persist the signed-in user for later invocations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_session_uid(&self, uid: &str) -> Result<()> {
        self.set_meta(SESSION_UID_KEY, uid)
    }

    /// The persisted signed-in user, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn session_uid(&self) -> Result<Option<String>> {
        self.meta(SESSION_UID_KEY)
    }

    /// Forget the persisted signed-in user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_session(&self) -> Result<()> {
        self.delete_meta(SESSION_UID_KEY)
    }

    // === Reports ===

    /// Store a validated report draft at the given position.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank description, or a database error.
    pub fn insert_report(&self, draft: &ReportDraft, coords: Option<Coordinates>) -> Result<Report> {
        draft.validate()?;

        let created_at = Utc::now();
        let reporter_name = draft.display_name();
        let description = draft.description.trim().to_string();
        let (lat, lng) = split_coords(coords);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r"
            INSERT INTO reports (category, description, reporter_name, latitude, longitude, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                draft.category.as_str(),
                description,
                reporter_name,
                lat,
                lng,
                created_at.to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        self.bump_reports_revision()?;
        tx.commit()?;

        info!(report_id = id, category = %draft.category, "Inserted report");
        Ok(Report {
            id,
            category: draft.category,
            description: Some(description),
            reporter_name: Some(reporter_name),
            coords,
            created_at,
            confirm_votes: std::collections::BTreeSet::new(),
            deny_votes: std::collections::BTreeSet::new(),
        })
    }

    /// Get a report by its ID, with votes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn report(&self, id: i64) -> Result<Option<Report>> {
        let sql = format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1");
        let Some(mut report) = self
            .conn
            .query_row(&sql, [id], Self::row_to_report)
            .optional()?
        else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT voter_id, kind FROM votes WHERE report_id = ?1")?;
        let votes = stmt.query_map([id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for vote in votes {
            let (voter, kind) = vote?;
            apply_stored_vote(&mut report, &voter, &kind);
        }

        Ok(Some(report))
    }

    /// All reports, newest first, with votes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn reports(&self) -> Result<Vec<Report>> {
        self.query_reports(None, None)
    }

    /// Reports of one category, newest first, with votes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn reports_by_category(&self, category: Category) -> Result<Vec<Report>> {
        self.query_reports(Some(category), None)
    }

    /// The most recent reports, optionally of one category.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_reports(&self, category: Option<Category>, limit: usize) -> Result<Vec<Report>> {
        self.query_reports(category, Some(limit))
    }

    fn query_reports(&self, category: Option<Category>, limit: Option<usize>) -> Result<Vec<Report>> {
        let sql = format!(
            r"
            SELECT {REPORT_COLUMNS} FROM reports
            WHERE (?1 IS NULL OR category = ?1)
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "
        );
        let limit_i64 = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let mut stmt = self.conn.prepare(&sql)?;
        let mut reports = stmt
            .query_map(
                params![category.map(|c| c.as_str()), limit_i64],
                Self::row_to_report,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.attach_votes(&mut reports)?;
        Ok(reports)
    }

    fn attach_votes(&self, reports: &mut [Report]) -> Result<()> {
        if reports.is_empty() {
            return Ok(());
        }
        let index: HashMap<i64, usize> = reports
            .iter()
            .enumerate()
            .map(|(i, report)| (report.id, i))
            .collect();

        let mut stmt = self
            .conn
            .prepare("SELECT report_id, voter_id, kind FROM votes")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        for row in rows {
            let (report_id, voter, kind) = row?;
            if let Some(&i) = index.get(&report_id) {
                apply_stored_vote(&mut reports[i], &voter, &kind);
            }
        }
        Ok(())
    }

    /// Count stored reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_reports(&self) -> Result<i64> {
        self.count("reports")
    }

    /// Record `voter`'s verdict on a report and return the updated report.
    ///
    /// A voter holds at most one verdict per report; voting again replaces it.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the report does not exist.
    pub fn vote(&self, report_id: i64, voter: &str, kind: VoteKind) -> Result<Report> {
        if !self.report_exists(report_id)? {
            return Err(Error::not_found("report", report_id));
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r"
            INSERT INTO votes (report_id, voter_id, kind, voted_at) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(report_id, voter_id) DO UPDATE SET kind = excluded.kind, voted_at = excluded.voted_at
            ",
            params![report_id, voter, kind.to_string(), Utc::now().to_rfc3339()],
        )?;
        self.bump_reports_revision()?;
        tx.commit()?;

        debug!(report_id, voter, %kind, "Recorded vote");
        self.report(report_id)?
            .ok_or_else(|| Error::not_found("report", report_id))
    }

    fn report_exists(&self, report_id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM reports WHERE id = ?1",
            [report_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // === Comments ===

    /// Attach a comment to a report. A blank author becomes [`ANONYMOUS`].
    ///
    /// # Errors
    ///
    /// Returns a validation error for blank text, or `Error::NotFound` if the
    /// report does not exist.
    pub fn add_comment(&self, report_id: i64, text: &str, author: Option<&str>) -> Result<Comment> {
        validate_message(text)?;
        if !self.report_exists(report_id)? {
            return Err(Error::not_found("report", report_id));
        }

        let author = author
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(ANONYMOUS)
            .to_string();
        let text = text.trim().to_string();
        let created_at = Utc::now();

        self.conn.execute(
            "INSERT INTO comments (report_id, text, author, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![report_id, text, author, created_at.to_rfc3339()],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(report_id, comment_id = id, "Added comment");

        Ok(Comment {
            id,
            report_id,
            text,
            author,
            created_at,
        })
    }

    /// Comments on a report, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn comments(&self, report_id: i64) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, report_id, text, author, created_at FROM comments
            WHERE report_id = ?1 ORDER BY id DESC
            ",
        )?;
        let comments = stmt
            .query_map([report_id], Self::row_to_comment)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    /// Comments on a report with an id above `last_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn comments_after(&self, report_id: i64, last_id: i64) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, report_id, text, author, created_at FROM comments
            WHERE report_id = ?1 AND id > ?2 ORDER BY id ASC
            ",
        )?;
        let comments = stmt
            .query_map([report_id, last_id], Self::row_to_comment)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    // === Chat ===

    /// Append a message to its zone's chat.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn send_message(&self, message: &OutgoingMessage) -> Result<ChatMessage> {
        let created_at = Utc::now();
        let (lat, lng) = split_coords(message.location);

        self.conn.execute(
            r"
            INSERT INTO chat_messages (zone, text, sender_id, sender_name, kind, latitude, longitude, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            params![
                message.zone,
                message.text,
                message.sender.id,
                message.sender.name,
                message.kind.as_str(),
                lat,
                lng,
                created_at.to_rfc3339(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(message_id = id, zone = %message.zone, kind = message.kind.as_str(), "Sent message");

        Ok(ChatMessage {
            id,
            zone: message.zone.clone(),
            text: message.text.clone(),
            sender: message.sender.clone(),
            created_at,
            kind: message.kind,
            location: message.location,
        })
    }

    /// The latest messages of a zone, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn messages(&self, zone: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE zone = ?1 ORDER BY id DESC LIMIT ?2"
        );
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params![zone, limit_i64], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Messages of a zone with an id above `last_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn messages_after(&self, zone: &str, last_id: i64) -> Result<Vec<ChatMessage>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE zone = ?1 AND id > ?2 ORDER BY id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params![zone, last_id], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Highest message id in a zone, or 0 when the zone is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn latest_message_id(&self, zone: &str) -> Result<i64> {
        let id: Option<i64> = self.conn.query_row(
            "SELECT MAX(id) FROM chat_messages WHERE zone = ?1",
            [zone],
            |row| row.get(0),
        )?;
        Ok(id.unwrap_or(0))
    }

    // === Stats ===

    fn count(&self, table: &'static str) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let newest: Option<String> = self
            .conn
            .query_row(
                "SELECT created_at FROM reports ORDER BY created_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            users: self.count("users")?,
            reports: self.count("reports")?,
            votes: self.count("votes")?,
            comments: self.count("comments")?,
            messages: self.count("chat_messages")?,
            newest_report: newest.as_deref().map(parse_timestamp),
            db_size_bytes,
        })
    }

    // === Row mappers ===

    fn row_to_report(row: &rusqlite::Row) -> rusqlite::Result<Report> {
        let category_str: String = row.get(1)?;
        let category = category_str.parse().unwrap_or_else(|_| {
            warn!(
                "Unknown report category: {}, defaulting to other",
                category_str
            );
            Category::Other
        });
        let created_at: String = row.get(6)?;

        Ok(Report {
            id: row.get(0)?,
            category,
            description: row.get(2)?,
            reporter_name: row.get(3)?,
            coords: join_coords(row.get(4)?, row.get(5)?),
            created_at: parse_timestamp(&created_at),
            confirm_votes: std::collections::BTreeSet::new(),
            deny_votes: std::collections::BTreeSet::new(),
        })
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<UserProfile> {
        let created_at: String = row.get(7)?;
        Ok(UserProfile {
            uid: row.get(0)?,
            email: row.get(1)?,
            display_name: row.get(2)?,
            zone: row.get(3)?,
            push_token: row.get(4)?,
            home: join_coords(row.get(5)?, row.get(6)?),
            created_at: parse_timestamp(&created_at),
        })
    }

    fn row_to_comment(row: &rusqlite::Row) -> rusqlite::Result<Comment> {
        let created_at: String = row.get(4)?;
        Ok(Comment {
            id: row.get(0)?,
            report_id: row.get(1)?,
            text: row.get(2)?,
            author: row.get(3)?,
            created_at: parse_timestamp(&created_at),
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<ChatMessage> {
        let kind_str: String = row.get(5)?;
        let kind = kind_str.parse().unwrap_or_else(|_| {
            warn!("Unknown message kind: {}, defaulting to text", kind_str);
            MessageKind::Text
        });
        let created_at: String = row.get(8)?;

        Ok(ChatMessage {
            id: row.get(0)?,
            zone: row.get(1)?,
            text: row.get(2)?,
            sender: ChatUser::new(row.get::<_, String>(3)?, row.get::<_, String>(4)?),
            created_at: parse_timestamp(&created_at),
            kind,
            location: join_coords(row.get(6)?, row.get(7)?),
        })
    }
}

fn split_coords(coords: Option<Coordinates>) -> (Option<f64>, Option<f64>) {
    coords.map_or((None, None), |c| (Some(c.latitude), Some(c.longitude)))
}

fn join_coords(latitude: Option<f64>, longitude: Option<f64>) -> Option<Coordinates> {
    match (latitude, longitude) {
        (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)),
        _ => None,
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn apply_stored_vote(report: &mut Report, voter: &str, kind: &str) {
    match kind.parse::<VoteKind>() {
        Ok(kind) => report.apply_vote(voter, kind),
        Err(_) => warn!(report_id = report.id, kind, "Ignoring unknown vote kind"),
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StorageStats {
    /// Registered users.
    pub users: i64,
    /// Stored reports.
    pub reports: i64,
    /// Votes across all reports.
    pub votes: i64,
    /// Comments across all reports.
    pub comments: i64,
    /// Chat messages across all zones.
    pub messages: i64,
    /// Time of the most recent report.
    pub newest_report: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_storage() -> Storage {
        Storage::open_in_memory().expect("failed to create test storage")
    }

    fn draft(description: &str) -> ReportDraft {
        ReportDraft::new(Category::Robbery, description)
    }

    fn test_profile(uid: &str, email: &str) -> UserProfile {
        UserProfile {
            uid: uid.to_string(),
            email: email.to_string(),
            display_name: "Ana".to_string(),
            zone: "Quito - Centro".to_string(),
            push_token: None,
            home: Some(Coordinates::new(-0.22, -78.51)),
            created_at: Utc::now(),
        }
    }

    fn test_credentials() -> Credentials {
        Credentials {
            salt: "salt".to_string(),
            digest: "digest".to_string(),
        }
    }

    #[test]
    fn test_open_in_memory() {
        assert!(Storage::open_in_memory().is_ok());
    }

    #[test]
    fn test_insert_and_get_report() {
        let storage = create_test_storage();
        let coords = Coordinates::new(-0.18, -78.47);

        let report = storage
            .insert_report(&draft("  Phone snatched  ").with_reporter("Ana"), Some(coords))
            .unwrap();
        assert_eq!(report.description.as_deref(), Some("Phone snatched"));

        let loaded = storage.report(report.id).unwrap().unwrap();
        assert_eq!(loaded.category, Category::Robbery);
        assert_eq!(loaded.reporter_name.as_deref(), Some("Ana"));
        assert_eq!(loaded.coords, Some(coords));
        assert_eq!(loaded.confirm_count(), 0);
    }

    #[test]
    fn test_insert_report_anonymous_and_without_coords() {
        let storage = create_test_storage();
        let report = storage.insert_report(&draft("Shouting"), None).unwrap();

        let loaded = storage.report(report.id).unwrap().unwrap();
        assert_eq!(loaded.reporter_name.as_deref(), Some(ANONYMOUS));
        assert!(loaded.coords.is_none());
    }

    #[test]
    fn test_insert_report_rejects_blank_description() {
        let storage = create_test_storage();
        let err = storage.insert_report(&draft("   "), None).unwrap_err();
        assert!(err.is_validation_error());
        assert_eq!(storage.count_reports().unwrap(), 0);
        assert_eq!(storage.reports_revision().unwrap(), 0);
    }

    #[test]
    fn test_get_nonexistent_report() {
        let storage = create_test_storage();
        assert!(storage.report(99_999).unwrap().is_none());
    }

    #[test]
    fn test_reports_newest_first_and_by_category() {
        let storage = create_test_storage();
        let first = storage.insert_report(&draft("first"), None).unwrap();
        let second = storage
            .insert_report(&ReportDraft::new(Category::Assault, "second"), None)
            .unwrap();

        let all = storage.reports().unwrap();
        assert_eq!(
            all.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );

        let assaults = storage.reports_by_category(Category::Assault).unwrap();
        assert_eq!(assaults.len(), 1);
        assert_eq!(assaults[0].id, second.id);

        assert!(storage
            .reports_by_category(Category::Harassment)
            .unwrap()
            .is_empty());
        assert_eq!(storage.recent_reports(None, 1).unwrap().len(), 1);
        assert_eq!(storage.count_reports().unwrap(), 2);
    }

    #[test]
    fn test_vote_switches_sides() {
        let storage = create_test_storage();
        let report = storage.insert_report(&draft("Car broken into"), None).unwrap();

        let updated = storage.vote(report.id, "u1", VoteKind::Confirm).unwrap();
        assert_eq!(updated.confirm_count(), 1);
        assert_eq!(updated.vote_of("u1"), Some(VoteKind::Confirm));

        let updated = storage.vote(report.id, "u1", VoteKind::Deny).unwrap();
        assert_eq!(updated.confirm_count(), 0);
        assert_eq!(updated.deny_count(), 1);

        let updated = storage.vote(report.id, "u1", VoteKind::Deny).unwrap();
        assert_eq!(updated.deny_count(), 1);
    }

    #[test]
    fn test_votes_loaded_with_report_list() {
        let storage = create_test_storage();
        let a = storage.insert_report(&draft("a"), None).unwrap();
        let b = storage.insert_report(&draft("b"), None).unwrap();
        storage.vote(a.id, "u1", VoteKind::Confirm).unwrap();
        storage.vote(a.id, "u2", VoteKind::Confirm).unwrap();
        storage.vote(b.id, "u1", VoteKind::Deny).unwrap();

        let reports = storage.reports().unwrap();
        let a = reports.iter().find(|r| r.id == a.id).unwrap();
        let b = reports.iter().find(|r| r.id == b.id).unwrap();
        assert_eq!(a.confirm_count(), 2);
        assert_eq!(b.deny_count(), 1);
    }

    #[test]
    fn test_vote_unknown_report() {
        let storage = create_test_storage();
        let err = storage.vote(42, "u1", VoteKind::Confirm).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_reports_revision_bumps_on_writes() {
        let storage = create_test_storage();
        assert_eq!(storage.reports_revision().unwrap(), 0);

        let report = storage.insert_report(&draft("x"), None).unwrap();
        assert_eq!(storage.reports_revision().unwrap(), 1);

        storage.vote(report.id, "u1", VoteKind::Confirm).unwrap();
        assert_eq!(storage.reports_revision().unwrap(), 2);

        storage.add_comment(report.id, "seen it", None).unwrap();
        assert_eq!(storage.reports_revision().unwrap(), 2);
    }

    #[test]
    fn test_comments() {
        let storage = create_test_storage();
        let report = storage.insert_report(&draft("x"), None).unwrap();

        let c1 = storage.add_comment(report.id, "first", Some("Luis")).unwrap();
        let c2 = storage.add_comment(report.id, "second", Some("  ")).unwrap();
        assert_eq!(c2.author, ANONYMOUS);

        let newest_first = storage.comments(report.id).unwrap();
        assert_eq!(
            newest_first.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![c2.id, c1.id]
        );

        let after = storage.comments_after(report.id, c1.id).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].text, "second");
    }

    #[test]
    fn test_comment_validation_and_missing_report() {
        let storage = create_test_storage();
        assert!(storage.add_comment(1, "hello", None).unwrap_err().is_not_found());

        let report = storage.insert_report(&draft("x"), None).unwrap();
        assert!(storage
            .add_comment(report.id, " ", None)
            .unwrap_err()
            .is_validation_error());
    }

    #[test]
    fn test_chat_messages_per_zone() {
        let storage = create_test_storage();
        let ana = ChatUser::new("u1", "Ana");

        let m1 = storage
            .send_message(&OutgoingMessage::text("north", ana.clone(), "hi").unwrap())
            .unwrap();
        storage
            .send_message(&OutgoingMessage::text("south", ana.clone(), "other zone").unwrap())
            .unwrap();
        let m3 = storage
            .send_message(&crate::chat::panic_alert(
                "north",
                ana,
                Coordinates::new(1.0, 2.0),
            ))
            .unwrap();

        let latest = storage.messages("north", 10).unwrap();
        assert_eq!(
            latest.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![m3.id, m1.id]
        );
        assert!(latest[0].is_panic());
        assert_eq!(latest[0].location, Some(Coordinates::new(1.0, 2.0)));

        let after = storage.messages_after("north", m1.id).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, m3.id);

        assert_eq!(storage.latest_message_id("north").unwrap(), m3.id);
        assert_eq!(storage.latest_message_id("empty").unwrap(), 0);
        assert_eq!(storage.messages("north", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_users() {
        let storage = create_test_storage();
        let profile = test_profile("u1", "ana@example.com");
        storage.insert_user(&profile, &test_credentials()).unwrap();

        let by_email = storage.user_by_email("ANA@example.com").unwrap().unwrap();
        assert_eq!(by_email.uid, "u1");
        assert_eq!(by_email.home, profile.home);

        let (found, creds) = storage.credentials("ana@example.com").unwrap().unwrap();
        assert_eq!(found.uid, "u1");
        assert_eq!(creds, test_credentials());

        storage.update_push_token("u1", "tok").unwrap();
        storage.update_zone("u1", "Quito - Norte").unwrap();
        let by_uid = storage.user_by_uid("u1").unwrap().unwrap();
        assert_eq!(by_uid.push_token.as_deref(), Some("tok"));
        assert_eq!(by_uid.zone, "Quito - Norte");

        assert!(storage.user_by_uid("nope").unwrap().is_none());
        assert!(storage.update_zone("nope", "z").unwrap_err().is_not_found());
    }

    #[test]
    fn test_insert_user_duplicate_email() {
        let storage = create_test_storage();
        storage
            .insert_user(&test_profile("u1", "ana@example.com"), &test_credentials())
            .unwrap();
        let err = storage
            .insert_user(&test_profile("u2", "Ana@Example.com"), &test_credentials())
            .unwrap_err();
        assert!(matches!(err, Error::EmailTaken { .. }));
    }

    #[test]
    fn test_session_uid() {
        let storage = create_test_storage();
        assert!(storage.session_uid().unwrap().is_none());

        storage.set_session_uid("u1").unwrap();
        assert_eq!(storage.session_uid().unwrap().as_deref(), Some("u1"));

        storage.clear_session().unwrap();
        assert!(storage.session_uid().unwrap().is_none());
    }

    #[test]
    fn test_first_run_flag() {
        let storage = create_test_storage();
        assert!(storage.is_first_run().unwrap());
        storage.mark_intro_seen().unwrap();
        assert!(!storage.is_first_run().unwrap());
    }

    #[test]
    fn test_device_token_is_stable() {
        let storage = create_test_storage();
        let first = storage.device_token().unwrap();
        assert!(first.starts_with("device-"));
        assert_eq!(storage.device_token().unwrap(), first);
    }

    #[test]
    fn test_stats() {
        let storage = create_test_storage();
        let empty = storage.stats().unwrap();
        assert_eq!(empty.reports, 0);
        assert!(empty.newest_report.is_none());
        assert_eq!(empty.db_size_bytes, 0);

        let report = storage.insert_report(&draft("x"), None).unwrap();
        storage.vote(report.id, "u1", VoteKind::Confirm).unwrap();
        storage.add_comment(report.id, "c", None).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.reports, 1);
        assert_eq!(stats.votes, 1);
        assert_eq!(stats.comments, 1);
        assert_eq!(stats.messages, 0);
        assert!(stats.newest_report.is_some());
    }

    #[test]
    fn test_path() {
        let storage = create_test_storage();
        assert_eq!(storage.path().to_string_lossy(), ":memory:");
    }

    #[test]
    fn test_unicode_content() {
        let storage = create_test_storage();
        let report = storage
            .insert_report(&draft("Robo en la esquina 🚨 señora"), None)
            .unwrap();
        let loaded = storage.report(report.id).unwrap().unwrap();
        assert_eq!(
            loaded.description.as_deref(),
            Some("Robo en la esquina 🚨 señora")
        );
    }

    #[test]
    fn test_open_file_based_persists() {
        let db_path = std::env::temp_dir().join(format!(
            "neighborwatch_test_{}.db",
            std::process::id()
        ));

        {
            let storage = Storage::open(&db_path).unwrap();
            storage.insert_report(&draft("persisted"), None).unwrap();
            storage.set_session_uid("u1").unwrap();
            assert_eq!(storage.path(), db_path);
            assert!(storage.stats().unwrap().db_size_bytes > 0);
        }

        let reopened = Storage::open(&db_path).unwrap();
        assert_eq!(reopened.count_reports().unwrap(), 1);
        assert_eq!(reopened.session_uid().unwrap().as_deref(), Some("u1"));

        drop(reopened);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let root = std::env::temp_dir().join(format!("neighborwatch_test_{}", std::process::id()));
        let nested_path = root.join("nested/db.sqlite");
        let _ = std::fs::remove_dir_all(&root);

        let storage = Storage::open(&nested_path).unwrap();
        assert!(nested_path.exists());

        drop(storage);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_shared_storage() {
        let shared = create_test_storage().into_shared();
        {
            let storage = shared.lock().await;
            storage.insert_report(&draft("shared"), None).unwrap();
        }
        assert_eq!(shared.lock().await.count_reports().unwrap(), 1);
    }
}
