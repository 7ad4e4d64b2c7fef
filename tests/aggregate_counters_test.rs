mod common;

use threadmark::{ItemKind, SequenceNumber};

/// After every creation, the aggregate's last bound equals the new item's
/// sequence number and the count equals the number of creations so far.
#[tokio::test]
async fn creation_tracks_last_sequence_and_count() {
    let (engine, _dir, _path) = common::test_engine("create.db").await;
    let t = common::seed_thread(&engine).await;

    for i in 1..=10 {
        let item = engine
            .post_item(t, ItemKind::Comment, common::ts(i * 100))
            .await
            .unwrap();

        let record = engine.thread(t).await.unwrap();
        assert_eq!(record.last_sequence_number, item.sequence_number);
        assert_eq!(record.items_count, i);
        assert_eq!(record.first_sequence_number.as_raw(), 1);
    }

    engine.shutdown().await;
}

/// Under an arbitrary interleaving of creations and deletions, the bounds
/// always equal the min and max sequence number among currently-live items.
#[tokio::test]
async fn interleaved_bounds_match_live_min_max() {
    let (engine, _dir, _path) = common::test_engine("interleave.db").await;
    let t = common::seed_thread(&engine).await;

    let mut live = Vec::new();
    let mut clock = 0i64;

    // Encoded interleaving: true = create, false = delete the item at the
    // given slot of the live set.
    let script: &[(bool, usize)] = &[
        (true, 0),
        (true, 0),
        (true, 0),
        (false, 1), // middle
        (true, 0),
        (false, 0), // first
        (true, 0),
        (false, 2), // last
        (true, 0),
        (false, 0),
        (false, 0),
    ];

    for &(create, slot) in script {
        if create {
            clock += 100;
            let item = engine.post_item(t, ItemKind::Comment, common::ts(clock)).await.unwrap();
            live.push(item);
        } else {
            let victim = live.remove(slot);
            engine.delete_item(victim.id).await.unwrap();
        }

        let record = engine.thread(t).await.unwrap();
        let expect_min = live
            .iter()
            .map(|i| i.sequence_number)
            .min()
            .unwrap_or(SequenceNumber::NONE);
        let expect_max = live
            .iter()
            .map(|i| i.sequence_number)
            .max()
            .unwrap_or(SequenceNumber::NONE);

        assert_eq!(record.first_sequence_number, expect_min);
        assert_eq!(record.last_sequence_number, expect_max);
        assert_eq!(record.items_count, live.len() as i64);
    }

    engine.shutdown().await;
}

/// Deleting the sole remaining item resets both bounds to the sentinel and
/// both activity times to null.
#[tokio::test]
async fn deleting_sole_item_resets_sentinels() {
    let (engine, _dir, _path) = common::test_engine("sole.db").await;
    let t = common::seed_thread(&engine).await;

    let only = engine
        .post_item(t, ItemKind::Comment, common::ts(100))
        .await
        .unwrap();
    engine.delete_item(only.id).await.unwrap();

    let record = engine.thread(t).await.unwrap();
    assert!(record.first_sequence_number.is_none());
    assert!(record.last_sequence_number.is_none());
    assert_eq!(record.last_item_at, None);
    assert_eq!(record.last_comment_at, None);
    assert_eq!(record.items_count, 0);
    assert_eq!(record.comments_count, 0);

    engine.shutdown().await;
}

/// Mixed kinds: comment-specific counters move only for comments, salient
/// counters only for salient kinds.
#[tokio::test]
async fn kind_specific_counters() {
    let (engine, _dir, _path) = common::test_engine("kinds.db").await;
    let t = common::seed_thread(&engine).await;

    engine.post_item(t, ItemKind::Comment, common::ts(100)).await.unwrap();
    engine.post_item(t, ItemKind::Poll, common::ts(200)).await.unwrap();
    let edit = engine.post_item(t, ItemKind::Edit, common::ts(300)).await.unwrap();

    let record = engine.thread(t).await.unwrap();
    assert_eq!(record.items_count, 3);
    assert_eq!(record.comments_count, 1);
    assert_eq!(record.salient_items_count, 2);
    assert_eq!(record.last_comment_at, Some(common::ts(100)));
    assert_eq!(record.last_item_at, Some(common::ts(300)));

    // Deleting the edit moves the item bound back but leaves comment state.
    engine.delete_item(edit.id).await.unwrap();
    let record = engine.thread(t).await.unwrap();
    assert_eq!(record.items_count, 2);
    assert_eq!(record.comments_count, 1);
    assert_eq!(record.salient_items_count, 2);
    assert_eq!(record.last_item_at, Some(common::ts(200)));

    engine.shutdown().await;
}

/// The out-of-band repair pass rebuilds a deliberately corrupted aggregate
/// from the live stream, and the writer reseeds its sequence allocator from
/// the store on restart.
#[tokio::test]
async fn repair_restores_corrupted_aggregate() {
    let (engine, _dir, path) = common::test_engine("repair.db").await;
    let t = common::seed_thread(&engine).await;

    common::seed_comments(&engine, t, 3).await;
    engine.shutdown().await;

    // Corrupt the aggregate row behind the engine's back.
    {
        let conn = common::open_read_write(&path);
        conn.execute(
            "UPDATE threads SET items_count = 0, comments_count = 7,
                 last_sequence_number = 999",
            [],
        )
        .unwrap();
    }

    let engine = threadmark::Threadmark::open(&path).await.unwrap();

    let repaired = engine.repair_thread(t).await.unwrap();
    assert_eq!(repaired.items_count, 3);
    assert_eq!(repaired.comments_count, 3);
    assert_eq!(repaired.first_sequence_number.as_raw(), 1);
    assert_eq!(repaired.last_sequence_number.as_raw(), 3);
    assert_eq!(repaired.last_comment_at, Some(common::ts(300)));

    // The reseeded allocator continues after the highest stored number.
    let next = engine
        .post_item(t, ItemKind::Comment, common::ts(400))
        .await
        .unwrap();
    assert_eq!(next.sequence_number.as_raw(), 4);

    engine.shutdown().await;
}

/// Thread destruction cascades to items and cursors.
#[tokio::test]
async fn destroy_thread_cascades() {
    let (engine, _dir, path) = common::test_engine("destroy.db").await;
    let t = common::seed_thread(&engine).await;

    common::seed_comments(&engine, t, 2).await;
    engine.mark_read(Some(common::user(1)), t, None).await.unwrap();

    engine.destroy_thread(t).await.unwrap();

    let err = engine.thread(t).await.unwrap_err();
    assert!(matches!(err, threadmark::Error::NotFound { .. }));

    engine.shutdown().await;

    let conn = common::open_read_write(&path);
    for table in ["items", "readers"] {
        let rows: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0, "{table} should be empty after cascade");
    }
}
