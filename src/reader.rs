//! # Read Path
//!
//! Query operations over read-only SQLite connections. Unread counts,
//! cursor snapshots, effective volumes, and pagination are all answered
//! here without touching the writer; WAL mode gives each reader a
//! consistent view of the latest committed state.
//!
//! The pool loop mirrors the write side: requests arrive on a shared
//! channel and whichever reader thread is free picks the next one up. Every
//! query is a handful of indexed point reads; none of them scan the item
//! stream, which is the entire point of the denormalized aggregate.

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};

use crate::cursor;
use crate::error::Result;
use crate::stream;
use crate::thread;
use crate::types::{
    CursorSnapshot, ThreadId, ThreadRecord, Timestamp, UnreadCounts, UserId, Volume,
};
use crate::volume;

// =============================================================================
// Query Functions
// =============================================================================

/// Loads the thread aggregate.
pub fn thread_record(conn: &Connection, thread_id: ThreadId) -> Result<ThreadRecord> {
    thread::load_thread(conn, thread_id)
}

/// The actor's cursor for a thread, persisted or transient.
pub fn cursor_snapshot(
    conn: &Connection,
    thread_id: ThreadId,
    user: Option<UserId>,
) -> Result<CursorSnapshot> {
    // Resolving against a missing thread must be a NotFound, not a
    // plausible-looking never-read cursor.
    thread::load_thread(conn, thread_id)?;
    cursor::resolve(conn, thread_id, user)
}

/// Unread item/comment/activity tallies for an actor.
///
/// Divergent state degrades to 0 inside the cursor arithmetic; the query
/// itself only fails if the thread is missing or storage errors.
pub fn unread_counts(
    conn: &Connection,
    thread_id: ThreadId,
    user: Option<UserId>,
) -> Result<UnreadCounts> {
    let record = thread::load_thread(conn, thread_id)?;
    let snapshot = cursor::resolve(conn, thread_id, user)?;

    Ok(UnreadCounts {
        items: cursor::unread_items_count(&record, &snapshot),
        comments: cursor::unread_comments_count(&record, &snapshot),
        activity: cursor::unread_activity_count(&record, &snapshot),
    })
}

/// Whether the actor has any unread activity in the thread.
pub fn has_unread_activity(
    conn: &Connection,
    thread_id: ThreadId,
    user: Option<UserId>,
) -> Result<bool> {
    let record = thread::load_thread(conn, thread_id)?;
    let snapshot = cursor::resolve(conn, thread_id, user)?;
    Ok(cursor::has_unread_activity(&record, &snapshot))
}

/// Whether the actor's watermark covers a specific item.
pub fn has_read(
    conn: &Connection,
    thread_id: ThreadId,
    user: Option<UserId>,
    item_id: i64,
) -> Result<bool> {
    let snapshot = cursor_snapshot(conn, thread_id, user)?;
    let item = stream::get_item(conn, item_id)?;
    Ok(snapshot.has_read(&item))
}

/// The effective notification volume for an actor, through the fallback
/// chain.
pub fn effective_volume(
    conn: &Connection,
    thread_id: ThreadId,
    user: Option<UserId>,
) -> Result<Volume> {
    let record = thread::load_thread(conn, thread_id)?;
    let snapshot = cursor::resolve(conn, thread_id, user)?;
    volume::effective_volume(conn, record.group_id, user, snapshot.explicit_volume)
}

/// First page of the stream containing unread items, for paginating
/// clients.
pub fn first_unread_page(
    conn: &Connection,
    thread_id: ThreadId,
    user: Option<UserId>,
    page_size: i64,
) -> Result<i64> {
    let record = thread::load_thread(conn, thread_id)?;
    let snapshot = cursor::resolve(conn, thread_id, user)?;
    Ok(cursor::first_unread_page(
        snapshot.read_items_count,
        record.items_count,
        page_size,
    ))
}

/// Live comments created strictly after `t`.
pub fn comments_since(conn: &Connection, thread_id: ThreadId, t: Timestamp) -> Result<i64> {
    thread::load_thread(conn, thread_id)?;
    stream::comments_since(conn, thread_id, t)
}

// =============================================================================
// Request Types
// =============================================================================

/// Request type for read operations.
pub enum ReadRequest {
    Thread {
        thread_id: ThreadId,
        response: oneshot::Sender<Result<ThreadRecord>>,
    },
    Cursor {
        thread_id: ThreadId,
        user: Option<UserId>,
        response: oneshot::Sender<Result<CursorSnapshot>>,
    },
    UnreadCounts {
        thread_id: ThreadId,
        user: Option<UserId>,
        response: oneshot::Sender<Result<UnreadCounts>>,
    },
    HasUnreadActivity {
        thread_id: ThreadId,
        user: Option<UserId>,
        response: oneshot::Sender<Result<bool>>,
    },
    HasRead {
        thread_id: ThreadId,
        user: Option<UserId>,
        item_id: i64,
        response: oneshot::Sender<Result<bool>>,
    },
    EffectiveVolume {
        thread_id: ThreadId,
        user: Option<UserId>,
        response: oneshot::Sender<Result<Volume>>,
    },
    FirstUnreadPage {
        thread_id: ThreadId,
        user: Option<UserId>,
        page_size: i64,
        response: oneshot::Sender<Result<i64>>,
    },
    CommentsSince {
        thread_id: ThreadId,
        t: Timestamp,
        response: oneshot::Sender<Result<i64>>,
    },
    /// Shut down this reader thread.
    Shutdown,
}

// =============================================================================
// Reader Loop
// =============================================================================

/// Pooled reader loop.
///
/// Threads share the receiver behind a mutex and compete for requests;
/// whichever is free serves next. Each thread owns its read-only
/// connection, so queries run in parallel across the pool.
pub async fn run_reader_pooled(
    conn: Connection,
    rx: Arc<std::sync::Mutex<mpsc::Receiver<ReadRequest>>>,
) {
    loop {
        let request = {
            let mut guard = rx.lock().expect("receiver mutex poisoned");
            guard.recv().await
        };

        match request {
            Some(ReadRequest::Thread {
                thread_id,
                response,
            }) => {
                let _ = response.send(thread_record(&conn, thread_id));
            }
            Some(ReadRequest::Cursor {
                thread_id,
                user,
                response,
            }) => {
                let _ = response.send(cursor_snapshot(&conn, thread_id, user));
            }
            Some(ReadRequest::UnreadCounts {
                thread_id,
                user,
                response,
            }) => {
                let _ = response.send(unread_counts(&conn, thread_id, user));
            }
            Some(ReadRequest::HasUnreadActivity {
                thread_id,
                user,
                response,
            }) => {
                let _ = response.send(has_unread_activity(&conn, thread_id, user));
            }
            Some(ReadRequest::HasRead {
                thread_id,
                user,
                item_id,
                response,
            }) => {
                let _ = response.send(has_read(&conn, thread_id, user, item_id));
            }
            Some(ReadRequest::EffectiveVolume {
                thread_id,
                user,
                response,
            }) => {
                let _ = response.send(effective_volume(&conn, thread_id, user));
            }
            Some(ReadRequest::FirstUnreadPage {
                thread_id,
                user,
                page_size,
                response,
            }) => {
                let _ = response.send(first_unread_page(&conn, thread_id, user, page_size));
            }
            Some(ReadRequest::CommentsSince {
                thread_id,
                t,
                response,
            }) => {
                let _ = response.send(comments_since(&conn, thread_id, t));
            }
            Some(ReadRequest::Shutdown) | None => break,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
