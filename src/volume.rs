//! # Notification Volume Resolution
//!
//! Resolves the effective notification volume for a (user, thread) pair by
//! walking an ordered chain of optional providers: the cursor's explicit
//! per-thread setting, then the user's membership default for the thread's
//! owning group, then [`Volume::Normal`]. Each provider is consulted only
//! if the previous one yields nothing; the cursor never silently stores a
//! hardcoded default.
//!
//! Resolution is a pure read. The only state this module writes is the
//! explicit value on the cursor row and, as a collaborator seam, the
//! membership default used for fallback.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::types::{GroupId, ThreadId, UserId, Volume};

/// Fallback applied when neither the cursor nor the membership has a value.
const DEFAULT_VOLUME: Volume = Volume::Normal;

/// Resolves the effective volume for a pair.
///
/// `explicit` is the cursor's stored value, passed in so resolution stays
/// pure with respect to the cursor (callers already hold the snapshot).
/// Guests have no membership and resolve to the default unless a transient
/// explicit value is somehow present.
pub fn effective_volume(
    conn: &Connection,
    group_id: GroupId,
    user: Option<UserId>,
    explicit: Option<Volume>,
) -> Result<Volume> {
    if let Some(volume) = explicit {
        return Ok(volume);
    }

    if let Some(user_id) = user {
        if let Some(volume) = membership_volume(conn, group_id, user_id)? {
            return Ok(volume);
        }
    }

    Ok(DEFAULT_VOLUME)
}

/// The membership default for a user in a group, if a membership exists.
fn membership_volume(
    conn: &Connection,
    group_id: GroupId,
    user_id: UserId,
) -> Result<Option<Volume>> {
    let raw: Option<i64> = conn
        .query_row(
            "SELECT volume FROM memberships WHERE group_id = ? AND user_id = ?",
            params![group_id.as_raw(), user_id.as_raw()],
            |row| row.get(0),
        )
        .optional()?;

    Ok(raw.and_then(Volume::from_raw))
}

/// Sets the explicit per-thread volume on a user's cursor, creating the
/// cursor lazily if this is the user's first touch of the thread.
pub fn set_explicit_volume(
    conn: &Connection,
    thread_id: ThreadId,
    user_id: UserId,
    volume: Volume,
) -> Result<()> {
    conn.execute(
        "INSERT INTO readers (thread_id, user_id, volume)
         VALUES (?, ?, ?)
         ON CONFLICT(thread_id, user_id) DO UPDATE SET volume = excluded.volume",
        params![thread_id.as_raw(), user_id.as_raw(), volume.as_raw()],
    )?;

    Ok(())
}

/// Sets a user's membership default for a group.
///
/// Membership records belong to an external collaborator; this setter
/// exists so deployments embedding the engine can mirror the default in.
pub fn set_membership_volume(
    conn: &Connection,
    group_id: GroupId,
    user_id: UserId,
    volume: Volume,
) -> Result<()> {
    conn.execute(
        "INSERT INTO memberships (group_id, user_id, volume)
         VALUES (?, ?, ?)
         ON CONFLICT(group_id, user_id) DO UPDATE SET volume = excluded.volume",
        params![group_id.as_raw(), user_id.as_raw(), volume.as_raw()],
    )?;

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
