//! # SQLite Schema for Threadmark
//!
//! Table definitions and database initialization for the read-tracking
//! engine.
//!
//! ## Table Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  threads                 items                  readers              │
//! │  ┌────────────────┐      ┌─────────────────┐    ┌─────────────────┐  │
//! │  │ thread_id (PK) │◄─────│ thread_id       │    │ thread_id  (PK──┤  │
//! │  │ items_count    │      │ sequence_number │    │ user_id     ──) │  │
//! │  │ comments_count │      │   (UNIQUE)      │    │ last_read_ms    │  │
//! │  │ first/last seq │      │ created_ms      │    │ read_*_count    │  │
//! │  │ last_*_ms      │      │ kind            │    │ volume          │  │
//! │  └────────────────┘      └─────────────────┘    └─────────────────┘  │
//! │                                                                      │
//! │  memberships (volume fallback)       threadmark_metadata             │
//! │  ┌─────────────────────┐             ┌───────────────┐               │
//! │  │ group_id, user_id   │             │ key, value    │               │
//! │  │ volume              │             └───────────────┘               │
//! │  └─────────────────────┘                                             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! ### Counters live on the thread row
//!
//! `items_count`, `comments_count`, `salient_items_count`, and the sequence
//! bounds are denormalized onto `threads` so that unread-count queries never
//! scan the item stream. They are maintained by atomic-delta UPDATEs inside
//! the same transaction as the item mutation; they are never recomputed
//! wholesale outside the explicit repair pass.
//!
//! ### Cursor uniqueness is a constraint, not a check
//!
//! `readers` has a composite primary key on `(thread_id, user_id)`. Lazy
//! cursor creation is an `INSERT ... ON CONFLICT` upsert against that key,
//! so two racing first-touches cannot create duplicate cursors.

use rusqlite::Connection;

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. A mismatch on open is an error; there are no
/// migrations yet.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

/// The `threads` table: one row per discussion thread, carrying the
/// denormalized aggregate.
///
/// # Columns
///
/// - `thread_id`: auto-increment primary key
/// - `group_id`: owning group, consulted only for the volume fallback
/// - `created_ms`: thread creation time (unix milliseconds)
/// - `items_count` / `comments_count` / `salient_items_count`: live-item
///   tallies, always exact
/// - `first_sequence_number` / `last_sequence_number`: min/max sequence
///   number among live items, 0 when the stream is empty
/// - `last_comment_ms` / `last_item_ms`: max creation time among live
///   comments / items, NULL when none remain
/// - `last_vote_ms`: last-vote time of the active vote motion, fed in by an
///   external collaborator; participates in `last_activity_at`
const CREATE_THREADS: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    thread_id             INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id              INTEGER NOT NULL,
    created_ms            INTEGER NOT NULL,
    items_count           INTEGER NOT NULL DEFAULT 0,
    comments_count        INTEGER NOT NULL DEFAULT 0,
    salient_items_count   INTEGER NOT NULL DEFAULT 0,
    first_sequence_number INTEGER NOT NULL DEFAULT 0,
    last_sequence_number  INTEGER NOT NULL DEFAULT 0,
    last_comment_ms       INTEGER,
    last_item_ms          INTEGER,
    last_vote_ms          INTEGER
)
"#;

/// The `items` table: the per-thread ordered event stream.
///
/// # Columns
///
/// - `item_id`: auto-increment primary key
/// - `thread_id`: owning thread
/// - `kind`: integer-coded [`crate::types::ItemKind`]
/// - `sequence_number`: process-wide creation-order position, UNIQUE,
///   assigned by the writer's allocator, never reused
/// - `created_ms`: creation time; the join key for cursor prefix counts
///
/// Deletion is physical: a destroyed item's row is removed and the
/// aggregate and affected cursors are fixed up in the same transaction.
const CREATE_ITEMS: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    item_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id       INTEGER NOT NULL,
    kind            INTEGER NOT NULL,
    sequence_number INTEGER NOT NULL UNIQUE,
    created_ms      INTEGER NOT NULL
)
"#;

/// Index for prefix-count queries.
///
/// Every cursor recompute is some variant of
/// `WHERE thread_id = ? AND created_ms <= ?`, so the composite index keeps
/// the bounded scan bounded.
const CREATE_ITEMS_THREAD_TIME_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS items_thread_time
ON items(thread_id, created_ms)
"#;

/// The `readers` table: one read cursor per (thread, user) pair.
///
/// # Columns
///
/// - `thread_id`, `user_id`: composite primary key; the uniqueness guard
///   behind lazy first-or-create
/// - `last_read_ms`: the watermark; NULL means never read
/// - `read_items_count` / `read_comments_count` / `read_salient_items_count`:
///   exact counts of live items of each class at or before the watermark
/// - `last_read_sequence_number`: sequence number of the temporally-last
///   item covered by the watermark, 0 when the prefix is empty
/// - `volume`: explicit notification volume, NULL when unset (resolver
///   falls back to the membership default)
///
/// Rows are created lazily on first write and are only removed by cascade
/// when a thread is destroyed.
const CREATE_READERS: &str = r#"
CREATE TABLE IF NOT EXISTS readers (
    thread_id                 INTEGER NOT NULL,
    user_id                   INTEGER NOT NULL,
    last_read_ms              INTEGER,
    read_items_count          INTEGER NOT NULL DEFAULT 0,
    read_comments_count       INTEGER NOT NULL DEFAULT 0,
    read_salient_items_count  INTEGER NOT NULL DEFAULT 0,
    last_read_sequence_number INTEGER NOT NULL DEFAULT 0,
    volume                    INTEGER,
    PRIMARY KEY (thread_id, user_id)
)
"#;

/// Index for stale-cursor invalidation.
///
/// Deletion fan-out selects `WHERE thread_id = ? AND last_read_ms >= ?`.
const CREATE_READERS_WATERMARK_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS readers_thread_watermark
ON readers(thread_id, last_read_ms)
"#;

/// The `memberships` table: per-group notification defaults.
///
/// Group membership is an external collaborator; this table exists only as
/// the fallback value provider for the volume resolver and is written
/// through [`crate::volume::set_membership_volume`].
const CREATE_MEMBERSHIPS: &str = r#"
CREATE TABLE IF NOT EXISTS memberships (
    group_id INTEGER NOT NULL,
    user_id  INTEGER NOT NULL,
    volume   INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (group_id, user_id)
)
"#;

/// Metadata table for schema versioning.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS threadmark_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the threadmark schema applied.
///
/// `Database` owns its `Connection`; dropping it closes the connection.
/// The write path consumes the wrapper via [`Database::into_connection`]
/// and hands the connection to the writer actor, which is the only code
/// allowed to mutate it afterwards.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file cannot be opened or created
    /// - `Error::Schema` if the stored schema version does not match
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database for testing.
    ///
    /// Lost when the connection closes; unsuitable for production use.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Applies pragmas, creates tables, and verifies the schema version.
    /// Idempotent; safe to run against an already-initialized file.
    fn initialize(&mut self) -> Result<()> {
        // WAL lets the reader pool see consistent snapshots while the single
        // writer commits. NORMAL sync is the usual WAL pairing: an OS crash
        // can lose the last transaction, never corrupt the file.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;
        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_THREADS)?;
        self.conn.execute_batch(CREATE_ITEMS)?;
        self.conn.execute_batch(CREATE_ITEMS_THREAD_TIME_INDEX)?;
        self.conn.execute_batch(CREATE_READERS)?;
        self.conn.execute_batch(CREATE_READERS_WATERMARK_INDEX)?;
        self.conn.execute_batch(CREATE_MEMBERSHIPS)?;

        self.verify_or_set_version()?;

        Ok(())
    }

    /// Verifies the schema version, or stamps it on a fresh database.
    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<i32> = self
            .conn
            .query_row(
                "SELECT value FROM threadmark_metadata WHERE key = 'schema_version'",
                [],
                |row| {
                    let s: String = row.get(0)?;
                    Ok(s.parse().unwrap_or(0))
                },
            )
            .ok();

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO threadmark_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, this build requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    /// Unwraps the underlying connection, handing ownership to the caller.
    ///
    /// Used to move the write connection into the writer actor.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Borrow the underlying connection.
    ///
    /// For tests and the synchronous core modules; production traffic goes
    /// through the writer actor and reader pool instead.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_creates_tables() {
        let db = Database::open_in_memory().expect("should create in-memory db");

        let count: i32 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .expect("should query tables");

        // metadata, threads, items, readers, memberships
        assert_eq!(count, 5, "expected 5 tables");
    }

    #[test]
    fn indexes_created() {
        let db = Database::open_in_memory().expect("should create db");

        let indexes: Vec<String> = {
            let mut stmt = db
                .conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_%'")
                .expect("should prepare");

            stmt.query_map([], |row| row.get(0))
                .expect("should query")
                .collect::<std::result::Result<Vec<_>, _>>()
                .expect("should collect")
        };

        assert!(indexes.contains(&"items_thread_time".to_string()));
        assert!(indexes.contains(&"readers_thread_watermark".to_string()));
    }

    #[test]
    fn schema_version_stored() {
        let db = Database::open_in_memory().expect("should create db");

        let version: String = db
            .conn
            .query_row(
                "SELECT value FROM threadmark_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .expect("should query version");

        assert_eq!(version, SCHEMA_VERSION.to_string());
    }

    #[test]
    fn double_initialization_is_idempotent() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("test.db");

        {
            let _db = Database::open(&path).expect("first open should work");
        }

        {
            let db = Database::open(&path).expect("second open should work");

            let count: i32 = db
                .conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                    [],
                    |row| row.get(0),
                )
                .expect("should query");

            assert_eq!(count, 5);
        }
    }

    #[test]
    fn duplicate_cursor_insert_hits_the_key() {
        let db = Database::open_in_memory().expect("should create db");

        db.conn
            .execute(
                "INSERT INTO readers (thread_id, user_id) VALUES (1, 1)",
                [],
            )
            .expect("first insert");

        let err = db
            .conn
            .execute(
                "INSERT INTO readers (thread_id, user_id) VALUES (1, 1)",
                [],
            )
            .expect_err("duplicate (thread, user) must be rejected");

        assert!(err.to_string().contains("UNIQUE"));
    }
}
