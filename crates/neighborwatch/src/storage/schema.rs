//! `SQLite` schema definitions for neighborwatch.
//!
//! Each former document collection maps to a table: user profiles, reports
//! with their votes and comments, and per-zone chat messages.

/// SQL statement to create the users table.
pub const CREATE_USERS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS users (
    uid TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    display_name TEXT NOT NULL,
    password_salt TEXT NOT NULL,
    password_digest TEXT NOT NULL,
    zone TEXT NOT NULL,
    push_token TEXT,
    home_latitude REAL,
    home_longitude REAL,
    created_at TEXT NOT NULL
)
";

/// SQL statement to create the reports table.
pub const CREATE_REPORTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    description TEXT,
    reporter_name TEXT,
    latitude REAL,
    longitude REAL,
    created_at TEXT NOT NULL
)
";

/// SQL statement to create the votes table.
///
/// The primary key keeps a voter in at most one of confirm or deny.
pub const CREATE_VOTES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS votes (
    report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
    voter_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('confirm', 'deny')),
    voted_at TEXT NOT NULL,
    PRIMARY KEY (report_id, voter_id)
)
";

/// SQL statement to create the comments table.
pub const CREATE_COMMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    report_id INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
    text TEXT NOT NULL,
    author TEXT NOT NULL,
    created_at TEXT NOT NULL
)
";

/// SQL statement to create the chat messages table.
pub const CREATE_CHAT_MESSAGES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    zone TEXT NOT NULL,
    text TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    latitude REAL,
    longitude REAL,
    created_at TEXT NOT NULL
)
";

/// SQL statement to create an index on report time for the newest-first list.
pub const CREATE_REPORTS_TIME_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_reports_created ON reports(created_at DESC)
";

/// SQL statement to create an index on report category for filtering.
pub const CREATE_REPORTS_CATEGORY_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_reports_category ON reports(category)
";

/// SQL statement to create an index on comments by report.
pub const CREATE_COMMENTS_REPORT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_comments_report ON comments(report_id, id)
";

/// SQL statement to create an index on chat messages by zone.
pub const CREATE_CHAT_ZONE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_chat_zone ON chat_messages(zone, id)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_USERS_TABLE,
    CREATE_REPORTS_TABLE,
    CREATE_VOTES_TABLE,
    CREATE_COMMENTS_TABLE,
    CREATE_CHAT_MESSAGES_TABLE,
    CREATE_REPORTS_TIME_INDEX,
    CREATE_REPORTS_CATEGORY_INDEX,
    CREATE_COMMENTS_REPORT_INDEX,
    CREATE_CHAT_ZONE_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.trim().is_empty());
        }
    }

    #[test]
    fn test_votes_primary_key_is_report_and_voter() {
        assert!(CREATE_VOTES_TABLE.contains("PRIMARY KEY (report_id, voter_id)"));
    }

    #[test]
    fn test_users_email_unique() {
        assert!(CREATE_USERS_TABLE.contains("email TEXT NOT NULL UNIQUE"));
    }

    #[test]
    fn test_report_coordinates_nullable() {
        assert!(CREATE_REPORTS_TABLE.contains("latitude REAL,"));
        assert!(!CREATE_REPORTS_TABLE.contains("latitude REAL NOT NULL"));
    }

    #[test]
    fn test_create_metadata_table_structure() {
        assert!(CREATE_METADATA_TABLE.contains("key TEXT PRIMARY KEY"));
        assert!(CREATE_METADATA_TABLE.contains("value TEXT NOT NULL"));
    }
}
