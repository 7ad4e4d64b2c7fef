//! # Threadmark - Read-Cursor and Unread-Count Engine
//!
//! Threadmark tracks, per user and per discussion thread, how much of an
//! ordered event stream (comments plus other thread activity) has been
//! read, and maintains denormalized aggregate counters on the thread
//! itself. It is built on SQLite.
//!
//! The hard problem is keeping two independently-updated pieces of derived
//! state consistent under concurrent creation and deletion of stream items,
//! without re-scanning the stream on every write:
//!
//! - **Thread aggregates**: item/comment/salient counts, first/last
//!   sequence-number bounds, last-comment and last-item times
//! - **Read cursors**: a per-user watermark timestamp plus cached prefix
//!   counts of everything at or before it
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Async API Layer                          │
//! │          (post, delete, mark read, unread counts)               │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                ┌──────────────┴──────────────┐
//!                ▼                             ▼
//! ┌─────────────────────────────┐  ┌───────────────────────────────┐
//! │        Writer Actor         │  │         Reader Pool           │
//! │ (single thread, owns write  │  │ (N threads, read-only conns)  │
//! │  connection + seq allocator)│  │                               │
//! └─────────────────────────────┘  └───────────────────────────────┘
//!                │                             │
//!                └──────────────┬──────────────┘
//!                               ▼
//!                       ┌──────────────┐
//!                       │    SQLite    │
//!                       │    (WAL)     │
//!                       └──────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Serialized ordering**: sequence numbers are assigned by the single
//!    writer, strictly increase, and are never reused
//! 2. **Aggregate exactness**: thread counters always equal the true
//!    live-item tallies; counter deltas commit atomically with the item
//!    mutation that caused them
//! 3. **Prefix semantics**: a cursor's counts are exact counts of live
//!    items at or before its watermark; after an out-of-order deletion they
//!    are recomputed from the stream, never patched
//! 4. **Lazy uniqueness**: one cursor per (thread, user), created by upsert
//!    on first write; guests get transient cursors that are never stored
//!
//! ## Module Organization
//!
//! - [`error`]: crate-wide error enum and `Result` alias
//! - [`types`]: domain newtypes (ids, sequence numbers, timestamps, kinds)
//! - [`schema`]: SQLite DDL and database initialization
//! - [`stream`]: the per-thread ordered item store
//! - [`thread`]: thread aggregate counter maintenance
//! - [`cursor`]: read cursors, unread computation, stale invalidation
//! - [`volume`]: notification volume fallback chain
//! - [`writer`]: single-writer actor and its async handle
//! - [`reader`]: pooled read-only query path
//! - [`api`]: the [`Threadmark`](api::Threadmark) facade

pub mod error;

pub mod types;

pub mod schema;

/// The per-thread ordered item store.
pub mod stream;

/// Thread aggregate counter maintenance.
pub mod thread;

/// Read cursors: watermarks, cached prefix counts, unread computation.
pub mod cursor;

/// Notification volume resolution.
pub mod volume;

/// Single-writer actor owning the write connection.
pub mod writer;

/// Read-only query path.
pub mod reader;

/// Async facade.
pub mod api;

pub use api::{EngineConfig, Threadmark};
pub use error::{Error, Result};
pub use schema::Database;
pub use writer::{spawn_writer, WriterConfig, WriterHandle};

pub use types::{
    CursorSnapshot, GroupId, Item, ItemKind, SequenceNumber, ThreadId, ThreadRecord, Timestamp,
    UnreadCounts, UserId, Volume,
};
