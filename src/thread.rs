//! # Thread Aggregate
//!
//! Maintains the denormalized per-thread counters: item/comment/salient
//! tallies, first/last sequence bounds, and the last-comment and last-item
//! times. These fields exist so that unread-count reads never scan the
//! stream; the price is that every item creation and deletion must keep
//! them exact.
//!
//! ## Mutation discipline
//!
//! - Counters move by **atomic deltas** (`items_count = items_count + 1`),
//!   never by read-modify-write in application code. A lost update here is
//!   permanent corruption; the delta form plus the writer's transaction
//!   makes it impossible.
//! - Handlers apply no business-rule validation. A counter update must
//!   succeed whenever the row exists; an update that matches no row is a
//!   [`Error::ConcurrentUpdateConflict`] and fails the triggering
//!   operation.
//! - On creation, `last_sequence_number` is set unconditionally: sequence
//!   numbers are allocated in creation order, so the newest item always
//!   holds the upper bound. `first_sequence_number` only needs initializing
//!   once, the first time the stream becomes non-empty.
//! - On deletion, a bound only moves if the dead item held it, and the
//!   replacement comes from a snapshot read of the remaining live items
//!   inside the same transaction as the decrement.
//!
//! Deletion handling finishes by fanning out to the affected read cursors
//! (see [`crate::cursor::invalidate_stale`]): any cursor whose watermark is
//! at or after the dead item's creation time had that item inside its
//! counted prefix and must recompute, not decrement.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::cursor;
use crate::error::{Error, Result};
use crate::stream::{self, ItemClass};
use crate::types::{GroupId, Item, SequenceNumber, ThreadId, ThreadRecord, Timestamp};

// =============================================================================
// Row Access
// =============================================================================

fn thread_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRecord> {
    Ok(ThreadRecord {
        thread_id: ThreadId::from_raw(row.get(0)?),
        group_id: GroupId::from_raw(row.get(1)?),
        created_at: Timestamp::from_millis(row.get(2)?),
        items_count: row.get(3)?,
        comments_count: row.get(4)?,
        salient_items_count: row.get(5)?,
        first_sequence_number: SequenceNumber::from_raw(row.get(6)?),
        last_sequence_number: SequenceNumber::from_raw(row.get(7)?),
        last_comment_at: row.get::<_, Option<i64>>(8)?.map(Timestamp::from_millis),
        last_item_at: row.get::<_, Option<i64>>(9)?.map(Timestamp::from_millis),
        last_vote_at: row.get::<_, Option<i64>>(10)?.map(Timestamp::from_millis),
    })
}

const SELECT_THREAD: &str = "SELECT thread_id, group_id, created_ms, items_count, comments_count,
        salient_items_count, first_sequence_number, last_sequence_number,
        last_comment_ms, last_item_ms, last_vote_ms
 FROM threads WHERE thread_id = ?";

/// Creates a thread owned by `group_id`, with all counters at their empty
/// state.
pub fn create_thread(
    conn: &Connection,
    group_id: GroupId,
    created_at: Timestamp,
) -> Result<ThreadRecord> {
    conn.execute(
        "INSERT INTO threads (group_id, created_ms) VALUES (?, ?)",
        params![group_id.as_raw(), created_at.as_millis()],
    )?;

    load_thread(conn, ThreadId::from_raw(conn.last_insert_rowid()))
}

/// Loads the aggregate row.
pub fn load_thread(conn: &Connection, thread_id: ThreadId) -> Result<ThreadRecord> {
    conn.query_row(SELECT_THREAD, params![thread_id.as_raw()], thread_from_row)
        .optional()?
        .ok_or_else(|| Error::thread_not_found(thread_id))
}

/// Destroys a thread and cascades to its items and cursors.
pub fn destroy_thread(conn: &Connection, thread_id: ThreadId) -> Result<()> {
    let changed = conn.execute(
        "DELETE FROM threads WHERE thread_id = ?",
        params![thread_id.as_raw()],
    )?;
    if changed == 0 {
        return Err(Error::thread_not_found(thread_id));
    }

    conn.execute(
        "DELETE FROM items WHERE thread_id = ?",
        params![thread_id.as_raw()],
    )?;
    conn.execute(
        "DELETE FROM readers WHERE thread_id = ?",
        params![thread_id.as_raw()],
    )?;

    Ok(())
}

// =============================================================================
// Creation Handlers
// =============================================================================

/// Applies a freshly created item to the aggregate.
///
/// Runs for every item, comments included; [`on_comment_created`] runs in
/// addition for comments, not instead of this.
///
/// # Errors
///
/// - [`Error::InvalidSequence`] if the item carries the sentinel sequence
///   number; the allocator was skipped and the bounds cannot be maintained
/// - [`Error::ConcurrentUpdateConflict`] if the thread row vanished between
///   load and update
pub fn on_item_created(conn: &Connection, item: &Item) -> Result<()> {
    if item.sequence_number.is_none() {
        return Err(Error::InvalidSequence {
            item_id: item.id,
            thread_id: item.thread_id.as_raw(),
        });
    }

    let salient_delta: i64 = if item.kind.is_salient() { 1 } else { 0 };

    // The first bound initializes once; the last bound always advances
    // because sequence numbers are handed out in creation order.
    let changed = conn.execute(
        "UPDATE threads SET
             items_count = items_count + 1,
             salient_items_count = salient_items_count + ?,
             last_item_ms = ?,
             first_sequence_number = CASE WHEN first_sequence_number = 0
                                          THEN ? ELSE first_sequence_number END,
             last_sequence_number = ?
         WHERE thread_id = ?",
        params![
            salient_delta,
            item.created_at.as_millis(),
            item.sequence_number.as_raw(),
            item.sequence_number.as_raw(),
            item.thread_id.as_raw(),
        ],
    )?;

    if changed == 0 {
        return Err(Error::ConcurrentUpdateConflict {
            thread_id: item.thread_id.as_raw(),
        });
    }

    Ok(())
}

/// Applies a freshly created comment to the comment-specific counters.
pub fn on_comment_created(conn: &Connection, comment: &Item) -> Result<()> {
    let changed = conn.execute(
        "UPDATE threads SET
             comments_count = comments_count + 1,
             last_comment_ms = ?
         WHERE thread_id = ?",
        params![comment.created_at.as_millis(), comment.thread_id.as_raw()],
    )?;

    if changed == 0 {
        return Err(Error::ConcurrentUpdateConflict {
            thread_id: comment.thread_id.as_raw(),
        });
    }

    Ok(())
}

// =============================================================================
// Destruction Handlers
// =============================================================================

/// Applies an item deletion to the aggregate, then fans out stale-cursor
/// invalidation.
///
/// Bound recomputation happens inside the caller's transaction: the
/// decrement and the snapshot read of the surviving items commit together,
/// so a concurrent creation cannot slip between them.
pub fn on_item_destroyed(conn: &Connection, item: &Item) -> Result<()> {
    let salient_delta: i64 = if item.kind.is_salient() { 1 } else { 0 };

    let changed = conn.execute(
        "UPDATE threads SET
             items_count = items_count - 1,
             salient_items_count = salient_items_count - ?
         WHERE thread_id = ?",
        params![salient_delta, item.thread_id.as_raw()],
    )?;

    if changed == 0 {
        return Err(Error::ConcurrentUpdateConflict {
            thread_id: item.thread_id.as_raw(),
        });
    }

    let record = load_thread(conn, item.thread_id)?;

    if item.sequence_number == record.first_sequence_number {
        let new_first = stream::min_sequence_number(conn, item.thread_id)?
            .unwrap_or(SequenceNumber::NONE);
        conn.execute(
            "UPDATE threads SET first_sequence_number = ? WHERE thread_id = ?",
            params![new_first.as_raw(), item.thread_id.as_raw()],
        )?;
    }

    if item.sequence_number == record.last_sequence_number {
        let new_last = stream::max_seq_and_created_at(conn, item.thread_id, ItemClass::All)?;
        let (seq, at) = match new_last {
            Some((seq, at)) => (seq, Some(at)),
            None => (SequenceNumber::NONE, None),
        };
        conn.execute(
            "UPDATE threads SET last_sequence_number = ?, last_item_ms = ? WHERE thread_id = ?",
            params![
                seq.as_raw(),
                at.map(|t| t.as_millis()),
                item.thread_id.as_raw(),
            ],
        )?;
    }

    verify_bounds(conn, item.thread_id)?;

    // Cursors whose watermark covers the dead item counted it in their
    // prefix; their cached counts must be recomputed, not decremented.
    cursor::invalidate_stale(conn, item)?;

    Ok(())
}

/// Applies a comment deletion to the comment-specific counters.
///
/// `last_comment_ms` cannot be patched incrementally; the new maximum comes
/// from the surviving comments. Cursor fan-out for the deletion happens
/// once, in [`on_item_destroyed`], and covers the comment fields.
pub fn on_comment_destroyed(conn: &Connection, comment: &Item) -> Result<()> {
    let new_last = stream::max_seq_and_created_at(conn, comment.thread_id, ItemClass::Comments)?
        .map(|(_, at)| at.as_millis());

    let changed = conn.execute(
        "UPDATE threads SET
             comments_count = comments_count - 1,
             last_comment_ms = ?
         WHERE thread_id = ?",
        params![new_last, comment.thread_id.as_raw()],
    )?;

    if changed == 0 {
        return Err(Error::ConcurrentUpdateConflict {
            thread_id: comment.thread_id.as_raw(),
        });
    }

    Ok(())
}

/// Checks the sequence bounds after a deletion touched them.
///
/// Inverted bounds mean the aggregate has diverged from the stream. That is
/// surfaced, never clamped; steady-state code has no way to repair it and
/// pretending otherwise hides the upstream bug.
fn verify_bounds(conn: &Connection, thread_id: ThreadId) -> Result<()> {
    let record = load_thread(conn, thread_id)?;

    let first = record.first_sequence_number;
    let last = record.last_sequence_number;

    if !first.is_none() && !last.is_none() && first > last {
        return Err(Error::ConsistencyViolation {
            thread_id: thread_id.as_raw(),
            detail: format!("sequence bounds inverted: first {first} > last {last}"),
        });
    }

    if record.items_count < 0 || record.comments_count < 0 || record.salient_items_count < 0 {
        return Err(Error::ConsistencyViolation {
            thread_id: thread_id.as_raw(),
            detail: format!(
                "negative counter: items {} comments {} salient {}",
                record.items_count, record.comments_count, record.salient_items_count
            ),
        });
    }

    Ok(())
}

// =============================================================================
// External Signals and Repair
// =============================================================================

/// Records the active vote motion's last-vote time.
///
/// Votes live outside this engine; this intake exists because
/// [`ThreadRecord::last_activity_at`] folds the signal into the default
/// mark-read watermark.
pub fn record_vote_activity(conn: &Connection, thread_id: ThreadId, at: Timestamp) -> Result<()> {
    let changed = conn.execute(
        "UPDATE threads SET last_vote_ms = ? WHERE thread_id = ?",
        params![at.as_millis(), thread_id.as_raw()],
    )?;

    if changed == 0 {
        return Err(Error::thread_not_found(thread_id));
    }

    Ok(())
}

/// Out-of-band repair: recomputes every derived field wholesale from the
/// live stream.
///
/// Not part of steady-state operation. Steady state maintains the counters
/// incrementally; this pass exists for operators recovering from divergence
/// (a lost write, a bad manual edit). `last_vote_ms` is an external signal
/// and is left untouched.
pub fn repair_aggregate(conn: &Connection, thread_id: ThreadId) -> Result<ThreadRecord> {
    let before = load_thread(conn, thread_id)?;

    let items_count = stream::count_items(conn, thread_id, ItemClass::All, None)?;
    let comments_count = stream::count_items(conn, thread_id, ItemClass::Comments, None)?;
    let salient_count = stream::count_items(conn, thread_id, ItemClass::Salient, None)?;

    let first = stream::min_sequence_number(conn, thread_id)?.unwrap_or(SequenceNumber::NONE);
    let last_item = stream::max_seq_and_created_at(conn, thread_id, ItemClass::All)?;
    let last_comment = stream::max_seq_and_created_at(conn, thread_id, ItemClass::Comments)?;

    let (last_seq, last_item_ms) = match last_item {
        Some((seq, at)) => (seq, Some(at.as_millis())),
        None => (SequenceNumber::NONE, None),
    };

    conn.execute(
        "UPDATE threads SET
             items_count = ?,
             comments_count = ?,
             salient_items_count = ?,
             first_sequence_number = ?,
             last_sequence_number = ?,
             last_comment_ms = ?,
             last_item_ms = ?
         WHERE thread_id = ?",
        params![
            items_count,
            comments_count,
            salient_count,
            first.as_raw(),
            last_seq.as_raw(),
            last_comment.map(|(_, at)| at.as_millis()),
            last_item_ms,
            thread_id.as_raw(),
        ],
    )?;

    let after = load_thread(conn, thread_id)?;
    if before != after {
        warn!(
            thread = thread_id.as_raw(),
            items_before = before.items_count,
            items_after = after.items_count,
            "aggregate repair changed derived state"
        );
    } else {
        debug!(thread = thread_id.as_raw(), "aggregate repair found no drift");
    }

    Ok(after)
}

// =============================================================================
// Tests
// =============================================================================
