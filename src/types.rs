//! # Domain Types for Threadmark
//!
//! Core types for the read-tracking domain: threads, stream items, sequence
//! numbers, timestamps, read cursors, and notification volumes.
//!
//! Identifiers and ordinals are newtypes over integers. A `SequenceNumber`
//! cannot be passed where a `ThreadId` is expected, and the sentinel rules
//! (0 means "none") live in one place instead of being re-checked at every
//! call site.
//!
//! ## Invariants encoded here
//!
//! - [`SequenceNumber`]: strictly increasing process-wide, assigned at item
//!   creation by the single writer, never reused. 0 is the "no items"
//!   sentinel and is never assigned.
//! - [`Timestamp`]: unix milliseconds. Wall-clock time is only ever used for
//!   cursor/prefix comparisons, never to decide ordering between items;
//!   sequence numbers own ordering.
//! - [`ItemKind`]: the salient-item policy is a single method, not scattered
//!   kind checks.

use std::fmt;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a discussion thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(i64);

impl ThreadId {
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user. Guests have no `UserId`; APIs that accept an
/// anonymous actor take `Option<UserId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(i64);

impl UserId {
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the group that owns a thread. Group membership itself is
/// an external collaborator; the id is carried only so the volume resolver
/// can look up a membership default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(i64);

impl GroupId {
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Sequence Numbers and Timestamps
// =============================================================================

/// Position of an item in the process-wide creation order.
///
/// # Invariants
///
/// - Strictly increases with each item created, across all threads
/// - Assigned exactly once, at creation, by the writer's allocator
/// - Never reused, even after the item is deleted
/// - 0 is a sentinel ("no item") and is never assigned to a real item
///
/// The sentinel convention mirrors the aggregate columns: a thread with no
/// live items has `first_sequence_number == last_sequence_number == NONE`,
/// and a cursor that has read nothing has `last_read_sequence_number == NONE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(i64);

impl SequenceNumber {
    /// Sentinel meaning "no item". Never assigned at creation.
    pub const NONE: SequenceNumber = SequenceNumber(0);

    /// The first sequence number a fresh store assigns.
    pub const FIRST: SequenceNumber = SequenceNumber(1);

    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub fn as_raw(&self) -> i64 {
        self.0
    }

    /// Returns the next sequence number.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// True for the "no item" sentinel.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A point in time, unix milliseconds.
///
/// Timestamps join cursors to items (`created_at <= last_read_at` prefix
/// comparisons). They deliberately do not define item order; two items may
/// share a timestamp and are still totally ordered by sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_millis(value: i64) -> Self {
        Self(value)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// =============================================================================
// Item Kinds and the Salient Policy
// =============================================================================

/// Classification of a stream item.
///
/// Comments are the primary content; polls and edits are "other thread
/// activity" that still occupies a slot in the ordered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    /// A comment posted to the thread.
    Comment,
    /// A poll opened on the thread.
    Poll,
    /// An edit to the thread body or title.
    Edit,
}

impl ItemKind {
    /// True for items that count toward activity badges.
    ///
    /// Comments are always salient. Polls are salient because opening one is
    /// something readers want surfaced. Edits are housekeeping and excluded.
    /// This is the one place the policy is defined.
    pub fn is_salient(&self) -> bool {
        matches!(self, ItemKind::Comment | ItemKind::Poll)
    }

    /// True for comment items.
    pub fn is_comment(&self) -> bool {
        matches!(self, ItemKind::Comment)
    }

    /// Integer code used in the `items.kind` column.
    pub fn as_raw(&self) -> i64 {
        match self {
            ItemKind::Comment => 0,
            ItemKind::Poll => 1,
            ItemKind::Edit => 2,
        }
    }

    /// Decodes the `items.kind` column. Unknown codes indicate storage-level
    /// corruption, reported as `None` so callers can surface a schema error.
    pub fn from_raw(value: i64) -> Option<Self> {
        match value {
            0 => Some(ItemKind::Comment),
            1 => Some(ItemKind::Poll),
            2 => Some(ItemKind::Edit),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemKind::Comment => "comment",
            ItemKind::Poll => "poll",
            ItemKind::Edit => "edit",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Notification Volume
// =============================================================================

/// How loudly a user wants to hear about thread activity.
///
/// A cursor stores an *explicit* volume or nothing at all; the effective
/// value is resolved through the fallback chain (explicit, then the user's
/// membership default for the owning group, then [`Volume::Normal`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Volume {
    /// No notifications for this thread.
    Mute,
    /// In-app activity only.
    Normal,
    /// In-app activity plus email.
    Email,
}

impl Volume {
    /// Integer code used in the `readers.volume` and `memberships.volume`
    /// columns.
    pub fn as_raw(&self) -> i64 {
        match self {
            Volume::Mute => 0,
            Volume::Normal => 1,
            Volume::Email => 2,
        }
    }

    pub fn from_raw(value: i64) -> Option<Self> {
        match value {
            0 => Some(Volume::Mute),
            1 => Some(Volume::Normal),
            2 => Some(Volume::Email),
            _ => None,
        }
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Volume::Mute => "mute",
            Volume::Normal => "normal",
            Volume::Email => "email",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Items
// =============================================================================

/// One unit in a thread's ordered event stream.
///
/// Items are read-only to the cursor/aggregate engine once created; the
/// engine consumes them via creation and deletion notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Row id in the items store.
    pub id: i64,

    /// The thread whose stream this item belongs to.
    pub thread_id: ThreadId,

    /// Process-wide creation-order position. Never the sentinel for a
    /// stored item.
    pub sequence_number: SequenceNumber,

    /// Creation time. The join key between cursors and items.
    pub created_at: Timestamp,

    /// Comment, poll, or edit.
    pub kind: ItemKind,
}

// =============================================================================
// Thread Aggregate
// =============================================================================

/// Denormalized per-thread counters, one row in `threads`.
///
/// Every field besides `thread_id`, `group_id`, and `created_at` is derived
/// from the live item stream and mutated only by the aggregate handlers in
/// [`crate::thread`] (or the out-of-band repair pass). See the module docs
/// there for the exact invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub thread_id: ThreadId,
    pub group_id: GroupId,
    pub created_at: Timestamp,

    /// Number of live items in the stream.
    pub items_count: i64,

    /// Number of live comment items.
    pub comments_count: i64,

    /// Number of live salient items (see [`ItemKind::is_salient`]).
    pub salient_items_count: i64,

    /// Minimum sequence number among live items, or the sentinel.
    pub first_sequence_number: SequenceNumber,

    /// Maximum sequence number among live items, or the sentinel.
    pub last_sequence_number: SequenceNumber,

    /// Max `created_at` among live comments.
    pub last_comment_at: Option<Timestamp>,

    /// Max `created_at` among live items.
    pub last_item_at: Option<Timestamp>,

    /// Last-vote time of the active vote motion, fed in from outside.
    pub last_vote_at: Option<Timestamp>,
}

impl ThreadRecord {
    /// The authoritative "as of" time used when a user marks the thread read
    /// without naming a target: the latest of thread creation, last comment,
    /// and the active motion's last vote.
    pub fn last_activity_at(&self) -> Timestamp {
        let mut latest = self.created_at;
        if let Some(t) = self.last_comment_at {
            latest = latest.max(t);
        }
        if let Some(t) = self.last_vote_at {
            latest = latest.max(t);
        }
        latest
    }
}

// =============================================================================
// Read Cursors
// =============================================================================

/// A user's read position in one thread, one row in `readers`.
///
/// When `last_read_at` is set, the three count fields are exact counts of
/// live items of the respective class with `created_at <= last_read_at`,
/// and `last_read_sequence_number` is the sequence number of the
/// temporally-last such item. When `last_read_at` is `None` the cursor is
/// in the never-read state and all counts are zero.
///
/// Guests get a transient snapshot with `user_id == None` that is never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorSnapshot {
    pub thread_id: ThreadId,

    /// `None` for the throwaway guest cursor.
    pub user_id: Option<UserId>,

    /// The watermark: everything at or before this time has been read.
    pub last_read_at: Option<Timestamp>,

    pub read_items_count: i64,
    pub read_comments_count: i64,
    pub read_salient_items_count: i64,

    /// Sequence number of the last item covered by the watermark, or the
    /// sentinel when the read prefix is empty.
    pub last_read_sequence_number: SequenceNumber,

    /// Explicit per-thread volume, if the user set one.
    pub explicit_volume: Option<Volume>,
}

impl CursorSnapshot {
    /// A never-read cursor. Used for guests and as the lazy-creation
    /// starting state for users who have not touched the thread yet.
    pub fn never_read(thread_id: ThreadId, user_id: Option<UserId>) -> Self {
        Self {
            thread_id,
            user_id,
            last_read_at: None,
            read_items_count: 0,
            read_comments_count: 0,
            read_salient_items_count: 0,
            last_read_sequence_number: SequenceNumber::NONE,
            explicit_volume: None,
        }
    }

    /// True until the first `mark_read`.
    pub fn first_read(&self) -> bool {
        self.last_read_at.is_none()
    }

    /// True iff the watermark covers the item's creation time.
    pub fn has_read(&self, item: &Item) -> bool {
        match self.last_read_at {
            Some(watermark) => watermark >= item.created_at,
            None => false,
        }
    }
}

/// Unread tallies for one (user, thread) pair, as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadCounts {
    /// Live items beyond the watermark.
    pub items: i64,
    /// Live comments beyond the watermark, with the never-read offset.
    pub comments: i64,
    /// Live salient items beyond the watermark, with the never-read offset.
    pub activity: i64,
}

// =============================================================================
// Tests
// =============================================================================
