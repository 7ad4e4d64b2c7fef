//! # Error Handling for Threadmark
//!
//! A single crate-wide error enum covering every failure mode, with a
//! `Result` alias. Callers either propagate with `?` or match on the
//! variant that matters to them.
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical response |
//! |----------|----------|------------------|
//! | Caller bug | `InvalidSequence` | Fix the caller; never defaulted |
//! | Missing subject | `NotFound` | Surface to the requester |
//! | Lost update | `ConcurrentUpdateConflict` | Retry the whole operation |
//! | Divergence | `ConsistencyViolation` | Alert; queries degrade to 0 |
//! | Internal | `Sqlite`, `Schema` | Log and investigate |

use thiserror::Error;

/// All errors that can occur in threadmark operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The thread or cursor subject of an operation does not exist.
    #[error("{what} {id} not found")]
    NotFound {
        /// What kind of record was missing ("thread", "item", ...).
        what: &'static str,
        /// The identifier that failed to resolve.
        id: i64,
    },

    /// An item was presented for aggregate update without an assigned
    /// sequence number.
    ///
    /// Sequence numbers are assigned by the writer at creation; seeing the
    /// sentinel here means the caller skipped the allocator. This is an
    /// ordering bug upstream and must fail loudly rather than be defaulted,
    /// because every aggregate bound and cursor boundary keys off it.
    #[error("item {item_id} in thread {thread_id} has no assigned sequence number")]
    InvalidSequence {
        /// Row id of the offending item.
        item_id: i64,
        /// Thread whose aggregate was being updated.
        thread_id: i64,
    },

    /// A counter update found no row to apply its delta to.
    ///
    /// The aggregate row was loaded earlier in the same operation, so its
    /// disappearance means a concurrent destruction won the race. The
    /// triggering create/delete must fail and be retried by the caller;
    /// swallowing it would leave an item persisted without its counter
    /// effect.
    #[error("concurrent update conflict on thread {thread_id}")]
    ConcurrentUpdateConflict {
        /// Thread whose aggregate row went missing mid-update.
        thread_id: i64,
    },

    /// Derived state disagrees with itself: an unread count would be
    /// negative, or the sequence bounds would invert.
    ///
    /// This signals divergence between the aggregate counters and the true
    /// stream contents. It is reported, never silently clamped, in write
    /// paths; read paths log it and degrade to 0 because unread counts are
    /// best-effort UI signals.
    #[error("consistency violation on thread {thread_id}: {detail}")]
    ConsistencyViolation {
        /// Thread whose derived state diverged.
        thread_id: i64,
        /// Human-readable description of the disagreement.
        detail: String,
    },

    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema version mismatch, corrupted stored values, or an engine
    /// thread that is no longer running.
    #[error("schema error: {0}")]
    Schema(String),
}

impl Error {
    /// Shorthand for a missing thread.
    pub fn thread_not_found(thread_id: crate::types::ThreadId) -> Self {
        Error::NotFound {
            what: "thread",
            id: thread_id.as_raw(),
        }
    }

    /// Shorthand for a missing item.
    pub fn item_not_found(item_id: i64) -> Self {
        Error::NotFound {
            what: "item",
            id: item_id,
        }
    }
}

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
