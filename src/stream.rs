//! # Event Stream Store
//!
//! Direct SQL over the `items` table: the append-mostly, rarely-deleted
//! ordered stream each thread owns. This module is the engine's contract
//! with the stream; the aggregate and cursor modules never touch `items`
//! except through it.
//!
//! Sequence numbers arrive from the caller (the writer actor's allocator);
//! this module stores and queries them but never invents them. Queries that
//! feed cursor recomputes are all bounded prefix scans over
//! `(thread_id, created_ms)`.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::types::{Item, ItemKind, SequenceNumber, ThreadId, Timestamp};

// =============================================================================
// Item Classes
// =============================================================================

/// Which slice of the stream a count or bound query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemClass {
    /// Every live item.
    All,
    /// Comment items only.
    Comments,
    /// Salient items only (see [`ItemKind::is_salient`]).
    Salient,
}

impl ItemClass {
    /// SQL predicate fragment selecting this class. Kind codes are fixed by
    /// [`ItemKind::as_raw`]; the salient set must stay in sync with
    /// [`ItemKind::is_salient`].
    fn predicate(&self) -> &'static str {
        match self {
            ItemClass::All => "1 = 1",
            ItemClass::Comments => "kind = 0",
            ItemClass::Salient => "kind IN (0, 1)",
        }
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    let id: i64 = row.get(0)?;
    let thread_id: i64 = row.get(1)?;
    let kind: i64 = row.get(2)?;
    let sequence_number: i64 = row.get(3)?;
    let created_ms: i64 = row.get(4)?;

    let kind = ItemKind::from_raw(kind).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(2, kind)
    })?;

    Ok(Item {
        id,
        thread_id: ThreadId::from_raw(thread_id),
        sequence_number: SequenceNumber::from_raw(sequence_number),
        created_at: Timestamp::from_millis(created_ms),
        kind,
    })
}

// =============================================================================
// Mutations
// =============================================================================

/// Inserts one item into a thread's stream.
///
/// `seq` must come from the serializing allocator; the UNIQUE constraint on
/// `sequence_number` backstops an allocator bug but is not the allocator.
pub fn insert_item(
    conn: &Connection,
    thread_id: ThreadId,
    kind: ItemKind,
    created_at: Timestamp,
    seq: SequenceNumber,
) -> Result<Item> {
    conn.execute(
        "INSERT INTO items (thread_id, kind, sequence_number, created_ms)
         VALUES (?, ?, ?, ?)",
        params![
            thread_id.as_raw(),
            kind.as_raw(),
            seq.as_raw(),
            created_at.as_millis(),
        ],
    )?;

    Ok(Item {
        id: conn.last_insert_rowid(),
        thread_id,
        sequence_number: seq,
        created_at,
        kind,
    })
}

/// Removes an item row and returns what was deleted.
///
/// The returned item carries the `{sequence_number, created_at, kind}` the
/// aggregate and invalidation fan-out need; callers run inside the same
/// transaction so the snapshot cannot race a concurrent creation.
pub fn delete_item(conn: &Connection, item_id: i64) -> Result<Item> {
    let item = get_item(conn, item_id)?;

    let changed = conn.execute("DELETE FROM items WHERE item_id = ?", params![item_id])?;
    if changed == 0 {
        return Err(Error::item_not_found(item_id));
    }

    Ok(item)
}

/// Looks up one item by row id.
pub fn get_item(conn: &Connection, item_id: i64) -> Result<Item> {
    conn.query_row(
        "SELECT item_id, thread_id, kind, sequence_number, created_ms
         FROM items WHERE item_id = ?",
        params![item_id],
        item_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::item_not_found(item_id))
}

// =============================================================================
// Counts and Bounds
// =============================================================================

/// Counts live items of a class, optionally bounded by `created_ms <= t`.
///
/// With a bound this is the cursor prefix count; without, it is the
/// aggregate repair count.
pub fn count_items(
    conn: &Connection,
    thread_id: ThreadId,
    class: ItemClass,
    up_to: Option<Timestamp>,
) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM items
         WHERE thread_id = ? AND {} AND created_ms <= ?",
        class.predicate()
    );

    let bound = up_to.map(|t| t.as_millis()).unwrap_or(i64::MAX);

    let count = conn.query_row(&sql, params![thread_id.as_raw(), bound], |row| row.get(0))?;
    Ok(count)
}

/// Maximum sequence number and its creation time among live items of a
/// class, or `None` when the class is empty.
///
/// Sequence numbers are assigned in creation order, so the max-sequence item
/// is also the latest-created one; a single ORDER BY serves both fields.
pub fn max_seq_and_created_at(
    conn: &Connection,
    thread_id: ThreadId,
    class: ItemClass,
) -> Result<Option<(SequenceNumber, Timestamp)>> {
    let sql = format!(
        "SELECT sequence_number, created_ms FROM items
         WHERE thread_id = ? AND {}
         ORDER BY sequence_number DESC LIMIT 1",
        class.predicate()
    );

    let row = conn
        .query_row(&sql, params![thread_id.as_raw()], |row| {
            let seq: i64 = row.get(0)?;
            let created_ms: i64 = row.get(1)?;
            Ok((
                SequenceNumber::from_raw(seq),
                Timestamp::from_millis(created_ms),
            ))
        })
        .optional()?;

    Ok(row)
}

/// Minimum sequence number among live items, or `None` when the stream is
/// empty.
pub fn min_sequence_number(
    conn: &Connection,
    thread_id: ThreadId,
) -> Result<Option<SequenceNumber>> {
    let row: Option<i64> = conn
        .query_row(
            "SELECT MIN(sequence_number) FROM items WHERE thread_id = ?",
            params![thread_id.as_raw()],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    Ok(row.map(SequenceNumber::from_raw))
}

/// Sequence number of the temporally-last live item with
/// `created_at <= up_to`, or `None` when the prefix is empty.
///
/// Creation time orders the prefix; sequence number breaks timestamp ties
/// deterministically. This is what a cursor stores as
/// `last_read_sequence_number`.
pub fn last_read_boundary(
    conn: &Connection,
    thread_id: ThreadId,
    up_to: Timestamp,
) -> Result<Option<SequenceNumber>> {
    let row: Option<i64> = conn
        .query_row(
            "SELECT sequence_number FROM items
             WHERE thread_id = ? AND created_ms <= ?
             ORDER BY created_ms DESC, sequence_number DESC LIMIT 1",
            params![thread_id.as_raw(), up_to.as_millis()],
            |row| row.get(0),
        )
        .optional()?;

    Ok(row.map(SequenceNumber::from_raw))
}

/// Counts live comments created strictly after `t`.
pub fn comments_since(conn: &Connection, thread_id: ThreadId, t: Timestamp) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM items
         WHERE thread_id = ? AND kind = 0 AND created_ms > ?",
        params![thread_id.as_raw(), t.as_millis()],
        |row| row.get(0),
    )?;
    Ok(count)
}

// =============================================================================
// Tests
// =============================================================================
