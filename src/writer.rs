//! # Single-Writer Actor
//!
//! All mutations flow through one dedicated thread that owns the write
//! connection. The thread drains a command channel and executes each
//! request as its own `BEGIN IMMEDIATE` transaction, so an item mutation
//! and its counter effect commit or roll back together; an item can never
//! be persisted without its aggregate delta.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Async Tasks                         │
//! │   task1 ─┐                                              │
//! │   task2 ─┼── tokio::sync::mpsc ──► WriteRequest         │
//! │   task3 ─┘                                              │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │
//!                             ▼
//!                 ┌───────────────────────┐
//!                 │  Dedicated OS Thread  │
//!                 │                       │
//!                 │  next_sequence_number │  ← in-memory allocator
//!                 │  write Connection     │  ← owned, never shared
//!                 └───────────────────────┘
//! ```
//!
//! ## The sequence allocator
//!
//! Sequence numbers must come from a serializing allocator. Here the
//! allocator is the writer thread itself: it holds `next_sequence_number`
//! in memory, seeded from `MAX(sequence_number)` at startup, and hands out
//! one value per created item. The value is only consumed after the
//! transaction commits; a rolled-back creation leaves no gap.
//!
//! Thread-aggregate counters are mutated by atomic-delta UPDATEs (see
//! [`crate::thread`]); with every mutation serialized on this thread and
//! wrapped in its own transaction, a read-increment-write race on the
//! counters cannot occur.

use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::cursor;
use crate::error::{Error, Result};
use crate::stream;
use crate::thread;
use crate::types::{
    CursorSnapshot, GroupId, Item, ItemKind, SequenceNumber, ThreadId, ThreadRecord, Timestamp,
    UserId, Volume,
};
use crate::volume;

// =============================================================================
// Configuration
// =============================================================================

/// Size of the write request channel.
const WRITE_CHANNEL_SIZE: usize = 4096;

/// Default SQLite busy timeout for the write connection.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Configuration for the writer actor.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout: Duration,

    /// Capacity of the write request channel.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            channel_capacity: WRITE_CHANNEL_SIZE,
        }
    }
}

// =============================================================================
// Request Types
// =============================================================================

/// A write request sent to the writer thread.
pub enum WriteRequest {
    /// Create a thread with empty counters.
    CreateThread {
        group_id: GroupId,
        created_at: Timestamp,
        response: oneshot::Sender<Result<ThreadRecord>>,
    },

    /// Append an item to a thread's stream and apply its aggregate effect.
    PostItem {
        thread_id: ThreadId,
        kind: ItemKind,
        created_at: Timestamp,
        response: oneshot::Sender<Result<Item>>,
    },

    /// Delete an item, fix the aggregate, and invalidate stale cursors.
    DeleteItem {
        item_id: i64,
        response: oneshot::Sender<Result<Item>>,
    },

    /// Destroy a thread and cascade to its items and cursors.
    DestroyThread {
        thread_id: ThreadId,
        response: oneshot::Sender<Result<()>>,
    },

    /// Move a user's watermark and recompute their cached counts.
    MarkRead {
        thread_id: ThreadId,
        user: Option<UserId>,
        at: Option<Timestamp>,
        response: oneshot::Sender<Result<CursorSnapshot>>,
    },

    /// Set an explicit per-thread volume.
    SetVolume {
        thread_id: ThreadId,
        user_id: UserId,
        volume: Volume,
        response: oneshot::Sender<Result<()>>,
    },

    /// Mirror in a membership default (volume fallback provider).
    SetMembershipVolume {
        group_id: GroupId,
        user_id: UserId,
        volume: Volume,
        response: oneshot::Sender<Result<()>>,
    },

    /// Record the active vote motion's last-vote time.
    RecordVote {
        thread_id: ThreadId,
        at: Timestamp,
        response: oneshot::Sender<Result<()>>,
    },

    /// Out-of-band wholesale recompute of a thread's aggregate.
    RepairThread {
        thread_id: ThreadId,
        response: oneshot::Sender<Result<ThreadRecord>>,
    },

    /// Shut down the writer.
    Shutdown,
}

// =============================================================================
// Writer
// =============================================================================

/// The writer actor. Runs on a dedicated thread; interact with it through
/// [`WriterHandle`].
pub struct ThreadWriter {
    /// SQLite connection, owned by this actor alone.
    conn: Connection,

    /// Next sequence number to hand out. Memory may lag disk after a crash
    /// (reseeded on startup) but never leads it: the value only advances
    /// after a successful commit.
    next_sequence_number: SequenceNumber,
}

impl ThreadWriter {
    /// Creates a writer over an initialized connection, seeding the
    /// sequence allocator from the store.
    pub fn new(conn: Connection, config: &WriterConfig) -> Result<Self> {
        conn.busy_timeout(config.busy_timeout)?;

        let mut writer = Self {
            conn,
            next_sequence_number: SequenceNumber::FIRST,
        };
        writer.load_next_sequence_number()?;

        Ok(writer)
    }

    /// Seeds the allocator from `MAX(sequence_number)`.
    fn load_next_sequence_number(&mut self) -> Result<()> {
        let max_seq: Option<i64> =
            self.conn
                .query_row("SELECT MAX(sequence_number) FROM items", [], |row| {
                    row.get(0)
                })?;

        self.next_sequence_number = match max_seq {
            Some(seq) if seq > 0 => SequenceNumber::from_raw(seq).next(),
            _ => SequenceNumber::FIRST,
        };

        Ok(())
    }

    /// Runs `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// IMMEDIATE takes the write lock up front, so the snapshot reads a
    /// deletion performs (bound recompute, cursor fan-out) cannot interleave
    /// with another writer's commit.
    fn in_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;

        match f(&self.conn) {
            Ok(value) => match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(value),
                Err(e) => {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    Err(e.into())
                }
            },
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    fn execute_create_thread(
        &mut self,
        group_id: GroupId,
        created_at: Timestamp,
    ) -> Result<ThreadRecord> {
        self.in_transaction(|conn| thread::create_thread(conn, group_id, created_at))
    }

    /// Creates an item and applies its aggregate effect atomically.
    ///
    /// The allocator advances only after COMMIT succeeds; a failed creation
    /// consumes nothing.
    fn execute_post_item(
        &mut self,
        thread_id: ThreadId,
        kind: ItemKind,
        created_at: Timestamp,
    ) -> Result<Item> {
        let seq = self.next_sequence_number;

        let item = self.in_transaction(|conn| {
            // Creation must target a live thread; surface NotFound rather
            // than ConcurrentUpdateConflict for a thread that never existed.
            thread::load_thread(conn, thread_id)?;

            let item = stream::insert_item(conn, thread_id, kind, created_at, seq)?;
            thread::on_item_created(conn, &item)?;
            if kind.is_comment() {
                thread::on_comment_created(conn, &item)?;
            }
            Ok(item)
        })?;

        self.next_sequence_number = seq.next();
        Ok(item)
    }

    /// Deletes an item; the aggregate fix-up and stale-cursor fan-out
    /// commit with the row removal or not at all.
    fn execute_delete_item(&mut self, item_id: i64) -> Result<Item> {
        self.in_transaction(|conn| {
            let item = stream::delete_item(conn, item_id)?;
            thread::on_item_destroyed(conn, &item)?;
            if item.kind.is_comment() {
                thread::on_comment_destroyed(conn, &item)?;
            }
            debug!(
                thread = item.thread_id.as_raw(),
                seq = item.sequence_number.as_raw(),
                kind = %item.kind,
                "item deleted"
            );
            Ok(item)
        })
    }

    fn execute_destroy_thread(&mut self, thread_id: ThreadId) -> Result<()> {
        self.in_transaction(|conn| thread::destroy_thread(conn, thread_id))
    }

    /// Marks a thread read for a user. Guests get a transient never-read
    /// snapshot and no write happens at all.
    fn execute_mark_read(
        &mut self,
        thread_id: ThreadId,
        user: Option<UserId>,
        at: Option<Timestamp>,
    ) -> Result<CursorSnapshot> {
        let Some(user_id) = user else {
            // Still validate the subject exists; a guest reading a missing
            // thread is a NotFound, not a silent empty cursor.
            thread::load_thread(&self.conn, thread_id)?;
            return Ok(CursorSnapshot::never_read(thread_id, None));
        };

        self.in_transaction(|conn| {
            let record = thread::load_thread(conn, thread_id)?;
            cursor::mark_read(conn, &record, user_id, at)
        })
    }

    fn execute_set_volume(
        &mut self,
        thread_id: ThreadId,
        user_id: UserId,
        vol: Volume,
    ) -> Result<()> {
        self.in_transaction(|conn| {
            thread::load_thread(conn, thread_id)?;
            volume::set_explicit_volume(conn, thread_id, user_id, vol)
        })
    }

    fn execute_set_membership_volume(
        &mut self,
        group_id: GroupId,
        user_id: UserId,
        vol: Volume,
    ) -> Result<()> {
        self.in_transaction(|conn| volume::set_membership_volume(conn, group_id, user_id, vol))
    }

    fn execute_record_vote(&mut self, thread_id: ThreadId, at: Timestamp) -> Result<()> {
        self.in_transaction(|conn| thread::record_vote_activity(conn, thread_id, at))
    }

    fn execute_repair_thread(&mut self, thread_id: ThreadId) -> Result<ThreadRecord> {
        self.in_transaction(|conn| thread::repair_aggregate(conn, thread_id))
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Async handle to the writer actor.
///
/// Clone freely; all clones feed the same writer thread.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteRequest>,
}

impl WriterHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> WriteRequest,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(build(response_tx))
            .await
            .map_err(|_| Error::Schema("writer has shut down".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Schema("writer dropped response".to_string()))?
    }

    /// Creates a thread.
    pub async fn create_thread(
        &self,
        group_id: GroupId,
        created_at: Timestamp,
    ) -> Result<ThreadRecord> {
        self.request(|response| WriteRequest::CreateThread {
            group_id,
            created_at,
            response,
        })
        .await
    }

    /// Appends an item to a thread's stream.
    pub async fn post_item(
        &self,
        thread_id: ThreadId,
        kind: ItemKind,
        created_at: Timestamp,
    ) -> Result<Item> {
        self.request(|response| WriteRequest::PostItem {
            thread_id,
            kind,
            created_at,
            response,
        })
        .await
    }

    /// Deletes an item and returns what was removed.
    pub async fn delete_item(&self, item_id: i64) -> Result<Item> {
        self.request(|response| WriteRequest::DeleteItem { item_id, response })
            .await
    }

    /// Destroys a thread, cascading to items and cursors.
    pub async fn destroy_thread(&self, thread_id: ThreadId) -> Result<()> {
        self.request(|response| WriteRequest::DestroyThread {
            thread_id,
            response,
        })
        .await
    }

    /// Marks a thread read.
    pub async fn mark_read(
        &self,
        thread_id: ThreadId,
        user: Option<UserId>,
        at: Option<Timestamp>,
    ) -> Result<CursorSnapshot> {
        self.request(|response| WriteRequest::MarkRead {
            thread_id,
            user,
            at,
            response,
        })
        .await
    }

    /// Sets an explicit per-thread volume.
    pub async fn set_volume(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
        volume: Volume,
    ) -> Result<()> {
        self.request(|response| WriteRequest::SetVolume {
            thread_id,
            user_id,
            volume,
            response,
        })
        .await
    }

    /// Mirrors in a membership default volume.
    pub async fn set_membership_volume(
        &self,
        group_id: GroupId,
        user_id: UserId,
        volume: Volume,
    ) -> Result<()> {
        self.request(|response| WriteRequest::SetMembershipVolume {
            group_id,
            user_id,
            volume,
            response,
        })
        .await
    }

    /// Records vote activity on a thread.
    pub async fn record_vote(&self, thread_id: ThreadId, at: Timestamp) -> Result<()> {
        self.request(|response| WriteRequest::RecordVote {
            thread_id,
            at,
            response,
        })
        .await
    }

    /// Runs the out-of-band aggregate repair pass.
    pub async fn repair_thread(&self, thread_id: ThreadId) -> Result<ThreadRecord> {
        self.request(|response| WriteRequest::RepairThread {
            thread_id,
            response,
        })
        .await
    }

    /// Asks the writer to shut down after draining queued requests.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(WriteRequest::Shutdown).await;
    }
}

// =============================================================================
// Writer Loop
// =============================================================================

/// Drains the request channel, one transaction per request.
pub async fn run_writer(mut writer: ThreadWriter, mut rx: mpsc::Receiver<WriteRequest>) {
    while let Some(request) = rx.recv().await {
        match request {
            WriteRequest::CreateThread {
                group_id,
                created_at,
                response,
            } => {
                let _ = response.send(writer.execute_create_thread(group_id, created_at));
            }
            WriteRequest::PostItem {
                thread_id,
                kind,
                created_at,
                response,
            } => {
                let _ = response.send(writer.execute_post_item(thread_id, kind, created_at));
            }
            WriteRequest::DeleteItem { item_id, response } => {
                let _ = response.send(writer.execute_delete_item(item_id));
            }
            WriteRequest::DestroyThread {
                thread_id,
                response,
            } => {
                let _ = response.send(writer.execute_destroy_thread(thread_id));
            }
            WriteRequest::MarkRead {
                thread_id,
                user,
                at,
                response,
            } => {
                let _ = response.send(writer.execute_mark_read(thread_id, user, at));
            }
            WriteRequest::SetVolume {
                thread_id,
                user_id,
                volume,
                response,
            } => {
                let _ = response.send(writer.execute_set_volume(thread_id, user_id, volume));
            }
            WriteRequest::SetMembershipVolume {
                group_id,
                user_id,
                volume,
                response,
            } => {
                let _ =
                    response.send(writer.execute_set_membership_volume(group_id, user_id, volume));
            }
            WriteRequest::RecordVote {
                thread_id,
                at,
                response,
            } => {
                let _ = response.send(writer.execute_record_vote(thread_id, at));
            }
            WriteRequest::RepairThread {
                thread_id,
                response,
            } => {
                let _ = response.send(writer.execute_repair_thread(thread_id));
            }
            WriteRequest::Shutdown => break,
        }
    }
}

/// Spawns the writer on a dedicated thread and returns its handle.
pub fn spawn_writer(conn: Connection, config: WriterConfig) -> Result<WriterHandle> {
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let writer = ThreadWriter::new(conn, &config)?;

    std::thread::Builder::new()
        .name("threadmark-writer".to_string())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to create writer runtime");

            rt.block_on(run_writer(writer, rx));
        })
        .map_err(|e| {
            error!("failed to spawn writer thread: {e}");
            Error::Schema(format!("failed to spawn writer thread: {e}"))
        })?;

    Ok(WriterHandle { tx })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Database;

    fn test_writer() -> ThreadWriter {
        let db = Database::open_in_memory().unwrap();
        ThreadWriter::new(db.into_connection(), &WriterConfig::default()).unwrap()
    }

    #[test]
    fn fresh_store_starts_at_first_sequence() {
        let writer = test_writer();
        assert_eq!(writer.next_sequence_number, SequenceNumber::FIRST);
    }

    #[test]
    fn allocator_reseeds_from_existing_items() {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.connection();
            let record = thread::create_thread(
                conn,
                GroupId::from_raw(1),
                Timestamp::from_millis(0),
            )
            .unwrap();
            stream::insert_item(
                conn,
                record.thread_id,
                ItemKind::Comment,
                Timestamp::from_millis(100),
                SequenceNumber::from_raw(41),
            )
            .unwrap();
        }

        let writer = ThreadWriter::new(db.into_connection(), &WriterConfig::default()).unwrap();
        assert_eq!(writer.next_sequence_number.as_raw(), 42);
    }

    #[test]
    fn post_item_assigns_increasing_sequence_numbers() {
        let mut writer = test_writer();
        let record = writer
            .execute_create_thread(GroupId::from_raw(1), Timestamp::from_millis(0))
            .unwrap();

        for expected in 1..=5 {
            let item = writer
                .execute_post_item(
                    record.thread_id,
                    ItemKind::Comment,
                    Timestamp::from_millis(expected * 100),
                )
                .unwrap();
            assert_eq!(item.sequence_number.as_raw(), expected);
        }

        let after = thread::load_thread(&writer.conn, record.thread_id).unwrap();
        assert_eq!(after.items_count, 5);
        assert_eq!(after.last_sequence_number.as_raw(), 5);
    }

    #[test]
    fn failed_post_consumes_no_sequence_number() {
        let mut writer = test_writer();

        let err = writer
            .execute_post_item(
                ThreadId::from_raw(404),
                ItemKind::Comment,
                Timestamp::from_millis(100),
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(writer.next_sequence_number, SequenceNumber::FIRST);

        // The next successful post still gets the first number.
        let record = writer
            .execute_create_thread(GroupId::from_raw(1), Timestamp::from_millis(0))
            .unwrap();
        let item = writer
            .execute_post_item(record.thread_id, ItemKind::Comment, Timestamp::from_millis(100))
            .unwrap();
        assert_eq!(item.sequence_number, SequenceNumber::FIRST);
    }

    #[test]
    fn delete_rolls_up_aggregate_and_cursors() {
        let mut writer = test_writer();
        let record = writer
            .execute_create_thread(GroupId::from_raw(1), Timestamp::from_millis(0))
            .unwrap();
        let user = UserId::from_raw(1);

        writer
            .execute_post_item(record.thread_id, ItemKind::Comment, Timestamp::from_millis(100))
            .unwrap();
        let victim = writer
            .execute_post_item(record.thread_id, ItemKind::Comment, Timestamp::from_millis(200))
            .unwrap();

        writer
            .execute_mark_read(record.thread_id, Some(user), None)
            .unwrap();

        writer.execute_delete_item(victim.id).unwrap();

        let after = thread::load_thread(&writer.conn, record.thread_id).unwrap();
        assert_eq!(after.comments_count, 1);
        assert_eq!(after.last_sequence_number.as_raw(), 1);

        let snapshot = cursor::resolve(&writer.conn, record.thread_id, Some(user)).unwrap();
        assert_eq!(snapshot.read_comments_count, 1);
        assert_eq!(cursor::unread_comments_count(&after, &snapshot), 0);
    }

    #[test]
    fn guest_mark_read_writes_nothing() {
        let mut writer = test_writer();
        let record = writer
            .execute_create_thread(GroupId::from_raw(1), Timestamp::from_millis(0))
            .unwrap();

        let snapshot = writer
            .execute_mark_read(record.thread_id, None, None)
            .unwrap();
        assert!(snapshot.first_read());
        assert_eq!(snapshot.user_id, None);

        let rows: i64 = writer
            .conn
            .query_row("SELECT COUNT(*) FROM readers", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn destroy_thread_cascades() {
        let mut writer = test_writer();
        let record = writer
            .execute_create_thread(GroupId::from_raw(1), Timestamp::from_millis(0))
            .unwrap();
        let user = UserId::from_raw(1);

        writer
            .execute_post_item(record.thread_id, ItemKind::Comment, Timestamp::from_millis(100))
            .unwrap();
        writer
            .execute_mark_read(record.thread_id, Some(user), None)
            .unwrap();

        writer.execute_destroy_thread(record.thread_id).unwrap();

        for table in ["threads", "items", "readers"] {
            let rows: i64 = writer
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(rows, 0, "{table} should be empty");
        }
    }

    #[tokio::test]
    async fn handle_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let handle = spawn_writer(db.into_connection(), WriterConfig::default()).unwrap();

        let record = handle
            .create_thread(GroupId::from_raw(1), Timestamp::from_millis(0))
            .await
            .unwrap();
        let item = handle
            .post_item(record.thread_id, ItemKind::Comment, Timestamp::from_millis(100))
            .await
            .unwrap();
        assert_eq!(item.sequence_number, SequenceNumber::FIRST);

        let snapshot = handle
            .mark_read(record.thread_id, Some(UserId::from_raw(1)), None)
            .await
            .unwrap();
        assert_eq!(snapshot.read_comments_count, 1);

        handle.shutdown().await;
    }
}
