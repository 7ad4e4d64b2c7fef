//! # Read Cursors
//!
//! One cursor per (thread, user) pair: a watermark timestamp plus cached
//! counts of the items, comments, and salient items at or before it. The
//! cached counts are what make unread badges cheap; the watermark is what
//! makes them recoverable.
//!
//! ## Prefix counts, not running tallies
//!
//! A cursor's count is "how many live items were created at or before my
//! watermark". That is a *time-prefix count* over the stream, not a tally
//! the cursor accumulated. The distinction matters on deletion: when an
//! item inside some cursor's prefix dies, decrementing the cached count
//! would be guessing (was the dead item inside this cursor's prefix or
//! not?). Recomputing against the stream is always right, and the scan is
//! bounded by the watermark. `mark_read` takes the same stance: every call
//! recomputes all three counts from the stream rather than patching them.
//!
//! ## Lazy creation
//!
//! Cursor rows appear on first write, through an upsert against the
//! `(thread_id, user_id)` primary key. Reads for a user with no row get a
//! never-read snapshot without creating one. Guests always get a transient
//! never-read snapshot and never touch storage.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::Result;
use crate::stream::{self, ItemClass};
use crate::types::{
    CursorSnapshot, Item, SequenceNumber, ThreadId, ThreadRecord, Timestamp, UserId, Volume,
};

// =============================================================================
// Policy Constants
// =============================================================================

/// The thread itself counts as "comment zero".
///
/// Until a user's first read, the thread body is unread content too, so
/// never-read comment and activity counts carry this offset. Fixed policy,
/// applied only at the unread-computation boundary below.
const COMMENT_ZERO: i64 = 1;

/// Stream page size assumed when callers do not pass one.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

// =============================================================================
// Row Access
// =============================================================================

fn cursor_from_row(
    row: &rusqlite::Row<'_>,
    thread_id: ThreadId,
    user_id: UserId,
) -> rusqlite::Result<CursorSnapshot> {
    Ok(CursorSnapshot {
        thread_id,
        user_id: Some(user_id),
        last_read_at: row.get::<_, Option<i64>>(0)?.map(Timestamp::from_millis),
        read_items_count: row.get(1)?,
        read_comments_count: row.get(2)?,
        read_salient_items_count: row.get(3)?,
        last_read_sequence_number: SequenceNumber::from_raw(row.get(4)?),
        explicit_volume: row.get::<_, Option<i64>>(5)?.and_then(Volume::from_raw),
    })
}

/// Loads the persisted cursor for a pair, if one exists.
pub fn load_cursor(
    conn: &Connection,
    thread_id: ThreadId,
    user_id: UserId,
) -> Result<Option<CursorSnapshot>> {
    let snapshot = conn
        .query_row(
            "SELECT last_read_ms, read_items_count, read_comments_count,
                    read_salient_items_count, last_read_sequence_number, volume
             FROM readers WHERE thread_id = ? AND user_id = ?",
            params![thread_id.as_raw(), user_id.as_raw()],
            |row| cursor_from_row(row, thread_id, user_id),
        )
        .optional()?;

    Ok(snapshot)
}

/// Returns the cursor for an actor, without creating one.
///
/// Logged-in users get their stored cursor or a never-read snapshot if they
/// have none yet. Guests get a throwaway never-read snapshot; it is never
/// shared and never written.
pub fn resolve(
    conn: &Connection,
    thread_id: ThreadId,
    user: Option<UserId>,
) -> Result<CursorSnapshot> {
    match user {
        Some(user_id) => Ok(load_cursor(conn, thread_id, user_id)?
            .unwrap_or_else(|| CursorSnapshot::never_read(thread_id, Some(user_id)))),
        None => Ok(CursorSnapshot::never_read(thread_id, None)),
    }
}

// =============================================================================
// Marking Read
// =============================================================================

/// Moves a user's watermark and recomputes the cached counts.
///
/// The watermark becomes `at`, or the thread's `last_activity_at()` when no
/// target is given. All three counts and the boundary sequence number are
/// recomputed from the stream and persisted atomically with the watermark
/// in a single upsert: concurrent calls race last-writer-wins on the row,
/// but a row always holds counts computed for its own watermark.
///
/// Guest no-ops live at the API layer; this function requires a user.
pub fn mark_read(
    conn: &Connection,
    thread: &ThreadRecord,
    user_id: UserId,
    at: Option<Timestamp>,
) -> Result<CursorSnapshot> {
    let watermark = at.unwrap_or_else(|| thread.last_activity_at());
    let counts = prefix_counts(conn, thread.thread_id, watermark)?;

    conn.execute(
        "INSERT INTO readers (thread_id, user_id, last_read_ms, read_items_count,
                              read_comments_count, read_salient_items_count,
                              last_read_sequence_number)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(thread_id, user_id) DO UPDATE SET
             last_read_ms = excluded.last_read_ms,
             read_items_count = excluded.read_items_count,
             read_comments_count = excluded.read_comments_count,
             read_salient_items_count = excluded.read_salient_items_count,
             last_read_sequence_number = excluded.last_read_sequence_number",
        params![
            thread.thread_id.as_raw(),
            user_id.as_raw(),
            watermark.as_millis(),
            counts.items,
            counts.comments,
            counts.salient,
            counts.boundary.as_raw(),
        ],
    )?;

    resolve(conn, thread.thread_id, Some(user_id))
}

/// Exact prefix counts for a watermark, straight from the stream.
struct PrefixCounts {
    items: i64,
    comments: i64,
    salient: i64,
    boundary: SequenceNumber,
}

fn prefix_counts(
    conn: &Connection,
    thread_id: ThreadId,
    watermark: Timestamp,
) -> Result<PrefixCounts> {
    let items = stream::count_items(conn, thread_id, ItemClass::All, Some(watermark))?;
    let comments = stream::count_items(conn, thread_id, ItemClass::Comments, Some(watermark))?;
    let salient = stream::count_items(conn, thread_id, ItemClass::Salient, Some(watermark))?;

    let boundary = if items == 0 {
        SequenceNumber::NONE
    } else {
        stream::last_read_boundary(conn, thread_id, watermark)?.unwrap_or(SequenceNumber::NONE)
    };

    Ok(PrefixCounts {
        items,
        comments,
        salient,
        boundary,
    })
}

// =============================================================================
// Unread Computation
// =============================================================================

/// Subtracts a cached count from an aggregate count, degrading to 0 on a
/// negative result.
///
/// A negative difference means the cursor and the aggregate have diverged.
/// Unread counts are best-effort UI signals, so the query degrades rather
/// than failing, but the violation is reported, never silently eaten.
fn checked_unread(thread_id: ThreadId, label: &str, total: i64, read: i64) -> i64 {
    let unread = total - read;
    if unread < 0 {
        warn!(
            thread = thread_id.as_raw(),
            total,
            read,
            "consistency violation: negative unread {label} count, degrading to 0"
        );
        return 0;
    }
    unread
}

/// Unread item count: aggregate total minus the cached prefix count.
///
/// No never-read offset here; items have no "item zero" sentinel. This
/// asymmetry with comments is inherited behavior, kept on purpose.
pub fn unread_items_count(thread: &ThreadRecord, cursor: &CursorSnapshot) -> i64 {
    checked_unread(
        thread.thread_id,
        "item",
        thread.items_count,
        cursor.read_items_count,
    )
}

/// Unread comment count. Before the first read the thread itself is
/// unread content, hence the [`COMMENT_ZERO`] offset.
pub fn unread_comments_count(thread: &ThreadRecord, cursor: &CursorSnapshot) -> i64 {
    if cursor.first_read() {
        return thread.comments_count + COMMENT_ZERO;
    }
    checked_unread(
        thread.thread_id,
        "comment",
        thread.comments_count,
        cursor.read_comments_count,
    )
}

/// Unread activity count over the salient subset, same offset rule as
/// comments.
pub fn unread_activity_count(thread: &ThreadRecord, cursor: &CursorSnapshot) -> i64 {
    if cursor.first_read() {
        return thread.salient_items_count + COMMENT_ZERO;
    }
    checked_unread(
        thread.thread_id,
        "activity",
        thread.salient_items_count,
        cursor.read_salient_items_count,
    )
}

/// True if the user has never read the thread, or activity has happened
/// since their watermark.
pub fn has_unread_activity(thread: &ThreadRecord, cursor: &CursorSnapshot) -> bool {
    match cursor.last_read_at {
        None => true,
        Some(watermark) => thread.last_activity_at() > watermark,
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// Maps a cursor's read-item count to the first page holding unread items.
///
/// With `r` items read and pages of `p`:
/// - nothing read: page 1
/// - `r` exactly fills its last page and more items exist beyond: the next
///   page is the first unread one
/// - otherwise the read prefix ends mid-page, and that page holds the first
///   unread item
pub fn first_unread_page(read_items_count: i64, items_count: i64, page_size: i64) -> i64 {
    let p = page_size.max(1);
    let r = read_items_count.max(0);

    if r == 0 {
        1
    } else if r % p == 0 && items_count > r {
        r / p + 1
    } else {
        // Ceiling division; r > 0 here.
        (r + p - 1) / p
    }
}

// =============================================================================
// Stale-Cursor Invalidation
// =============================================================================

/// Recomputes cached counts for every cursor whose watermark covers a
/// deleted item.
///
/// A cursor with `last_read_at >= deleted.created_at` had the dead item
/// inside its counted prefix; its counts are now stale and only a fresh
/// count against the stream is reliably correct. Cursors with earlier
/// watermarks never counted the item and are untouched.
///
/// Only the affected classes are recomputed: the item count and boundary
/// always, the comment count when a comment died, the salient count when a
/// salient item died. Idempotent: recomputation from the stream yields the
/// same row no matter how often it runs. Persists without validating
/// unrelated cursor state.
pub fn invalidate_stale(conn: &Connection, deleted: &Item) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT user_id, last_read_ms FROM readers
         WHERE thread_id = ? AND last_read_ms >= ?",
    )?;

    let stale: Vec<(i64, i64)> = stmt
        .query_map(
            params![deleted.thread_id.as_raw(), deleted.created_at.as_millis()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?
        .collect::<std::result::Result<_, _>>()?;

    for &(user_id, last_read_ms) in &stale {
        let watermark = Timestamp::from_millis(last_read_ms);
        let counts = prefix_counts(conn, deleted.thread_id, watermark)?;

        if deleted.kind.is_comment() {
            conn.execute(
                "UPDATE readers SET read_items_count = ?, read_comments_count = ?,
                        read_salient_items_count = ?, last_read_sequence_number = ?
                 WHERE thread_id = ? AND user_id = ?",
                params![
                    counts.items,
                    counts.comments,
                    counts.salient,
                    counts.boundary.as_raw(),
                    deleted.thread_id.as_raw(),
                    user_id,
                ],
            )?;
        } else if deleted.kind.is_salient() {
            conn.execute(
                "UPDATE readers SET read_items_count = ?, read_salient_items_count = ?,
                        last_read_sequence_number = ?
                 WHERE thread_id = ? AND user_id = ?",
                params![
                    counts.items,
                    counts.salient,
                    counts.boundary.as_raw(),
                    deleted.thread_id.as_raw(),
                    user_id,
                ],
            )?;
        } else {
            conn.execute(
                "UPDATE readers SET read_items_count = ?, last_read_sequence_number = ?
                 WHERE thread_id = ? AND user_id = ?",
                params![
                    counts.items,
                    counts.boundary.as_raw(),
                    deleted.thread_id.as_raw(),
                    user_id,
                ],
            )?;
        }
    }

    if !stale.is_empty() {
        debug!(
            thread = deleted.thread_id.as_raw(),
            cursors = stale.len(),
            deleted_seq = deleted.sequence_number.as_raw(),
            "recomputed stale cursors after deletion"
        );
    }

    Ok(stale.len())
}

// =============================================================================
// Tests
// =============================================================================
