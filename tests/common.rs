#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use threadmark::{GroupId, ItemKind, ThreadId, Threadmark, Timestamp, UserId};

/// Creates an engine backed by a fresh temp database.
/// The temp dir must be kept alive for the engine to work.
pub async fn test_engine(name: &str) -> (Threadmark, tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let engine = Threadmark::open(&path).await.expect("open engine");
    (engine, dir, path)
}

/// Direct read-write connection to a test database, for inspecting or
/// corrupting state outside the engine.
pub fn open_read_write(path: &Path) -> Connection {
    Connection::open(path).expect("open read-write connection")
}

pub fn ts(ms: i64) -> Timestamp {
    Timestamp::from_millis(ms)
}

pub fn user(id: i64) -> UserId {
    UserId::from_raw(id)
}

pub fn group(id: i64) -> GroupId {
    GroupId::from_raw(id)
}

/// Creates a thread at time zero under group 1.
pub async fn seed_thread(engine: &Threadmark) -> ThreadId {
    engine
        .create_thread(group(1), ts(0))
        .await
        .expect("create thread")
        .thread_id
}

/// Posts `n` comments at 100ms intervals starting at t=100.
pub async fn seed_comments(engine: &Threadmark, thread_id: ThreadId, n: i64) -> Vec<threadmark::Item> {
    let mut items = Vec::with_capacity(n as usize);
    for i in 1..=n {
        let item = engine
            .post_item(thread_id, ItemKind::Comment, ts(i * 100))
            .await
            .expect("post comment");
        items.push(item);
    }
    items
}
