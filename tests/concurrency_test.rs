mod common;

use threadmark::{ItemKind, SequenceNumber};

/// Concurrent posts to one thread: the serializing allocator hands out a
/// gapless 1..=N and the aggregate count lands exactly on N.
#[tokio::test]
async fn concurrent_posts_to_one_thread() {
    let (engine, _dir, _path) = common::test_engine("conc_posts.db").await;
    let t = common::seed_thread(&engine).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .post_item(t, ItemKind::Comment, common::ts(1_000 + i))
                .await
                .unwrap()
        }));
    }

    let mut seqs: Vec<i64> = Vec::new();
    for handle in handles {
        seqs.push(handle.await.unwrap().sequence_number.as_raw());
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=20).collect::<Vec<i64>>());

    let record = engine.thread(t).await.unwrap();
    assert_eq!(record.items_count, 20);
    assert_eq!(record.comments_count, 20);
    assert_eq!(record.first_sequence_number, SequenceNumber::FIRST);
    assert_eq!(record.last_sequence_number.as_raw(), 20);

    engine.shutdown().await;
}

/// Sequence numbers are process-wide: concurrent posts across independent
/// threads still produce one gapless global order.
#[tokio::test]
async fn sequence_numbers_are_global_across_threads() {
    let (engine, _dir, _path) = common::test_engine("conc_global.db").await;

    let t1 = common::seed_thread(&engine).await;
    let t2 = engine
        .create_thread(common::group(2), common::ts(0))
        .await
        .unwrap()
        .thread_id;

    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = engine.clone();
        let target = if i % 2 == 0 { t1 } else { t2 };
        handles.push(tokio::spawn(async move {
            engine
                .post_item(target, ItemKind::Comment, common::ts(1_000 + i))
                .await
                .unwrap()
        }));
    }

    let mut seqs: Vec<i64> = Vec::new();
    for handle in handles {
        seqs.push(handle.await.unwrap().sequence_number.as_raw());
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=10).collect::<Vec<i64>>());

    let r1 = engine.thread(t1).await.unwrap();
    let r2 = engine.thread(t2).await.unwrap();
    assert_eq!(r1.items_count, 5);
    assert_eq!(r2.items_count, 5);

    engine.shutdown().await;
}

/// Posts racing deletions: after the dust settles, counters match the
/// surviving items exactly.
#[tokio::test]
async fn posts_racing_deletions() {
    let (engine, _dir, _path) = common::test_engine("conc_delete.db").await;
    let t = common::seed_thread(&engine).await;

    let initial = common::seed_comments(&engine, t, 10).await;

    let mut handles = Vec::new();

    // Half the initial items get deleted while new ones land.
    for item in initial.iter().take(5).cloned() {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.delete_item(item.id).await.unwrap();
        }));
    }
    for i in 0..5 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .post_item(t, ItemKind::Comment, common::ts(2_000 + i))
                .await
                .unwrap();
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let record = engine.thread(t).await.unwrap();
    assert_eq!(record.items_count, 10);
    assert_eq!(record.comments_count, 10);
    // Original items 1..=5 died; 6 is now the oldest survivor.
    assert_eq!(record.first_sequence_number.as_raw(), 6);
    assert_eq!(record.last_sequence_number.as_raw(), 15);

    engine.shutdown().await;
}

/// Concurrent mark_read calls for the same pair: last writer wins, and the
/// surviving row's counts are consistent with its own watermark.
#[tokio::test]
async fn racing_mark_reads_stay_self_consistent() {
    let (engine, _dir, _path) = common::test_engine("conc_mark.db").await;
    let t = common::seed_thread(&engine).await;
    let u = common::user(1);

    common::seed_comments(&engine, t, 6).await;

    let mut handles = Vec::new();
    for watermark in [150, 250, 350, 450, 550, 650] {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .mark_read(Some(u), t, Some(common::ts(watermark)))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Whichever write landed last, its counts must match its watermark.
    let cursor = engine.cursor(Some(u), t).await.unwrap();
    let watermark = cursor.last_read_at.expect("cursor was marked read");
    let expected = watermark.as_millis() / 100; // items land at 100, 200, ...
    assert_eq!(cursor.read_items_count, expected);
    assert_eq!(cursor.read_comments_count, expected);
    assert_eq!(cursor.last_read_sequence_number.as_raw(), expected);

    engine.shutdown().await;
}

/// Independent (user, thread) pairs do not disturb each other.
#[tokio::test]
async fn independent_pairs_do_not_interfere() {
    let (engine, _dir, _path) = common::test_engine("conc_pairs.db").await;

    let t1 = common::seed_thread(&engine).await;
    let t2 = engine
        .create_thread(common::group(1), common::ts(0))
        .await
        .unwrap()
        .thread_id;

    common::seed_comments(&engine, t1, 3).await;
    common::seed_comments(&engine, t2, 5).await;

    let mut handles = Vec::new();
    for user_id in 1..=4 {
        let engine = engine.clone();
        let target = if user_id % 2 == 0 { t1 } else { t2 };
        handles.push(tokio::spawn(async move {
            engine
                .mark_read(Some(common::user(user_id)), target, None)
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Readers of t1 see t1 fully read and t2 untouched, and vice versa.
    let counts = engine.unread_counts(Some(common::user(2)), t1).await.unwrap();
    assert_eq!(counts.comments, 0);
    let counts = engine.unread_counts(Some(common::user(2)), t2).await.unwrap();
    assert_eq!(counts.comments, 6);

    let counts = engine.unread_counts(Some(common::user(1)), t2).await.unwrap();
    assert_eq!(counts.comments, 0);
    let counts = engine.unread_counts(Some(common::user(1)), t1).await.unwrap();
    assert_eq!(counts.comments, 4);

    engine.shutdown().await;
}
