//! # Async Facade
//!
//! [`Threadmark`] is the public entry point: a clonable handle wrapping the
//! single-writer actor and a pool of read-only reader threads.
//!
//! ## Topology
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Async Tasks                              │
//! └───────────────────┬───────────────────────────────┬─────────────────┘
//!                     │                               │
//!                     ▼                               ▼
//!             ┌───────────────┐             ┌─────────────────────┐
//!             │  ThreadWriter │             │     Reader Pool     │
//!             │  (1 thread)   │             │    (N threads)      │
//!             │               │             │                     │
//!             │  write conn   │             │  ┌───┐ ┌───┐ ┌───┐  │
//!             │  seq alloc    │             │  │ R │ │ R │ │ R │  │
//!             └───────┬───────┘             │  └───┘ └───┘ └───┘  │
//!                     │                     │  read-only conns    │
//!                     └──────────┬──────────┘                     │
//!                                ▼                                │
//!                        ┌─────────────┐                          │
//!                        │   SQLite    │◄─────────────────────────┘
//!                        │   (WAL)     │
//!                        └─────────────┘
//! ```
//!
//! SQLite connections are `!Sync`, so neither side shares one: the writer
//! owns its connection outright and each reader thread opens its own
//! read-only connection. WAL mode lets readers see every committed write
//! without blocking the writer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{available_parallelism, JoinHandle};

use rusqlite::{Connection, OpenFlags};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{Error, Result};
use crate::reader::{self, ReadRequest};
use crate::schema::Database;
use crate::types::{
    CursorSnapshot, GroupId, Item, ItemKind, ThreadId, ThreadRecord, Timestamp, UnreadCounts,
    UserId, Volume,
};
use crate::writer::{spawn_writer, WriterConfig, WriterHandle};

// =============================================================================
// Configuration
// =============================================================================

/// Size of the read request channel.
const READ_CHANNEL_SIZE: usize = 4096;

/// Minimum number of reader threads.
const MIN_READ_THREADS: usize = 1;

/// Maximum number of reader threads.
const MAX_READ_THREADS: usize = 16;

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Writer actor configuration.
    pub writer: WriterConfig,

    /// Upper bound on reader threads; the pool sizes itself to the CPU
    /// count within `[1, max_reader_threads]`.
    pub max_reader_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            max_reader_threads: MAX_READ_THREADS,
        }
    }
}

// =============================================================================
// Threadmark Handle
// =============================================================================

/// The main async handle.
///
/// `Clone`, `Send`, and `Sync`; all clones share the same writer and reader
/// pool. Mutations serialize through the writer; queries load-balance over
/// the readers.
#[derive(Clone)]
pub struct Threadmark {
    writer: WriterHandle,
    read_tx: mpsc::Sender<ReadRequest>,
    reader_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    reader_count: usize,
}

impl Threadmark {
    /// Opens or creates an engine database at the given path.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, EngineConfig::default()).await
    }

    /// Opens with explicit configuration.
    pub async fn open_with_config<P: AsRef<Path>>(path: P, config: EngineConfig) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();

        let (read_tx, read_rx) = mpsc::channel(READ_CHANNEL_SIZE);

        // Initialize schema on the write connection, then hand it to the
        // writer actor.
        let db = Database::open(&path)?;
        let writer = spawn_writer(db.into_connection(), config.writer.clone())?;

        let reader_count = available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_READ_THREADS)
            .clamp(MIN_READ_THREADS, config.max_reader_threads.max(MIN_READ_THREADS));

        // Readers compete for requests on the shared channel; each owns its
        // read-only connection.
        let read_rx = Arc::new(std::sync::Mutex::new(read_rx));
        let mut reader_handles = Vec::with_capacity(reader_count);

        for i in 0..reader_count {
            let rx = Arc::clone(&read_rx);
            let reader_path = path.clone();

            let handle = std::thread::Builder::new()
                .name(format!("threadmark-reader-{}", i))
                .spawn(move || {
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed to create reader runtime");

                    rt.block_on(async {
                        let conn = Connection::open_with_flags(
                            &reader_path,
                            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                        )
                        .expect("failed to open read-only connection");
                        reader::run_reader_pooled(conn, rx).await;
                    });
                })
                .map_err(|e| Error::Schema(format!("failed to spawn reader thread: {}", e)))?;

            reader_handles.push(handle);
        }

        Ok(Self {
            writer,
            read_tx,
            reader_handles: Arc::new(Mutex::new(reader_handles)),
            reader_count,
        })
    }

    /// Returns the number of reader threads in the pool.
    pub fn reader_count(&self) -> usize {
        self.reader_count
    }

    async fn read_request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> ReadRequest,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();

        self.read_tx
            .send(build(response_tx))
            .await
            .map_err(|_| Error::Schema("reader pool has shut down".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Schema("reader dropped response channel".to_string()))?
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Creates a thread owned by a group.
    pub async fn create_thread(
        &self,
        group_id: GroupId,
        created_at: Timestamp,
    ) -> Result<ThreadRecord> {
        self.writer.create_thread(group_id, created_at).await
    }

    /// Appends an item of any kind to a thread's stream.
    ///
    /// The store assigns the sequence number; the item and the aggregate
    /// counter effect commit atomically.
    pub async fn post_item(
        &self,
        thread_id: ThreadId,
        kind: ItemKind,
        created_at: Timestamp,
    ) -> Result<Item> {
        self.writer.post_item(thread_id, kind, created_at).await
    }

    /// Appends a comment.
    pub async fn post_comment(&self, thread_id: ThreadId, created_at: Timestamp) -> Result<Item> {
        self.post_item(thread_id, ItemKind::Comment, created_at).await
    }

    /// Deletes an item. The aggregate fix-up and stale-cursor invalidation
    /// are part of the same transaction; affected cursors are consistent
    /// before this returns.
    pub async fn delete_item(&self, item_id: i64) -> Result<Item> {
        self.writer.delete_item(item_id).await
    }

    /// Destroys a thread, cascading to its items and cursors.
    pub async fn destroy_thread(&self, thread_id: ThreadId) -> Result<()> {
        self.writer.destroy_thread(thread_id).await
    }

    /// Marks a thread read for an actor.
    ///
    /// With `at == None` the watermark is the thread's `last_activity_at()`.
    /// Guests (`user == None`) get a transient never-read snapshot back and
    /// nothing is written.
    pub async fn mark_read(
        &self,
        user: Option<UserId>,
        thread_id: ThreadId,
        at: Option<Timestamp>,
    ) -> Result<CursorSnapshot> {
        self.writer.mark_read(thread_id, user, at).await
    }

    /// Sets the actor's explicit volume for a thread.
    pub async fn set_volume(
        &self,
        user_id: UserId,
        thread_id: ThreadId,
        volume: Volume,
    ) -> Result<()> {
        self.writer.set_volume(thread_id, user_id, volume).await
    }

    /// Mirrors in a group membership's default volume (fallback provider).
    pub async fn set_membership_volume(
        &self,
        user_id: UserId,
        group_id: GroupId,
        volume: Volume,
    ) -> Result<()> {
        self.writer
            .set_membership_volume(group_id, user_id, volume)
            .await
    }

    /// Feeds in the active vote motion's last-vote time.
    pub async fn record_vote_activity(&self, thread_id: ThreadId, at: Timestamp) -> Result<()> {
        self.writer.record_vote(thread_id, at).await
    }

    /// Out-of-band aggregate repair. Recomputes every derived counter from
    /// the live stream; not part of steady-state operation.
    pub async fn repair_thread(&self, thread_id: ThreadId) -> Result<ThreadRecord> {
        self.writer.repair_thread(thread_id).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Loads the thread aggregate.
    pub async fn thread(&self, thread_id: ThreadId) -> Result<ThreadRecord> {
        self.read_request(|response| ReadRequest::Thread {
            thread_id,
            response,
        })
        .await
    }

    /// The actor's cursor snapshot for a thread.
    pub async fn cursor(
        &self,
        user: Option<UserId>,
        thread_id: ThreadId,
    ) -> Result<CursorSnapshot> {
        self.read_request(|response| ReadRequest::Cursor {
            thread_id,
            user,
            response,
        })
        .await
    }

    /// Unread item/comment/activity counts for an actor.
    pub async fn unread_counts(
        &self,
        user: Option<UserId>,
        thread_id: ThreadId,
    ) -> Result<UnreadCounts> {
        self.read_request(|response| ReadRequest::UnreadCounts {
            thread_id,
            user,
            response,
        })
        .await
    }

    /// Whether the actor has unread activity in a thread.
    pub async fn has_unread_activity(
        &self,
        user: Option<UserId>,
        thread_id: ThreadId,
    ) -> Result<bool> {
        self.read_request(|response| ReadRequest::HasUnreadActivity {
            thread_id,
            user,
            response,
        })
        .await
    }

    /// Whether the actor's watermark covers a given item.
    pub async fn has_read(
        &self,
        user: Option<UserId>,
        thread_id: ThreadId,
        item_id: i64,
    ) -> Result<bool> {
        self.read_request(|response| ReadRequest::HasRead {
            thread_id,
            user,
            item_id,
            response,
        })
        .await
    }

    /// The actor's effective volume for a thread.
    pub async fn effective_volume(
        &self,
        user: Option<UserId>,
        thread_id: ThreadId,
    ) -> Result<Volume> {
        self.read_request(|response| ReadRequest::EffectiveVolume {
            thread_id,
            user,
            response,
        })
        .await
    }

    /// First page of the stream containing unread items.
    pub async fn first_unread_page(
        &self,
        user: Option<UserId>,
        thread_id: ThreadId,
        page_size: i64,
    ) -> Result<i64> {
        self.read_request(|response| ReadRequest::FirstUnreadPage {
            thread_id,
            user,
            page_size,
            response,
        })
        .await
    }

    /// Live comments created strictly after `t`.
    pub async fn comments_since(&self, thread_id: ThreadId, t: Timestamp) -> Result<i64> {
        self.read_request(|response| ReadRequest::CommentsSince {
            thread_id,
            t,
            response,
        })
        .await
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Shuts the engine down gracefully: the writer drains its queue, the
    /// readers finish in-flight queries, and all connections close.
    pub async fn shutdown(self) {
        self.writer.shutdown().await;

        for _ in 0..self.reader_count {
            let _ = self.read_tx.send(ReadRequest::Shutdown).await;
        }

        let handles = std::mem::take(&mut *self.reader_handles.lock().await);
        for handle in handles {
            let _ = handle.join();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
