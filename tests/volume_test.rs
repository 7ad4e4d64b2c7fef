mod common;

use threadmark::Volume;

/// The full fallback chain: hardcoded default, then membership default,
/// then explicit per-thread setting, each shadowing the previous.
#[tokio::test]
async fn fallback_chain_in_order() {
    let (engine, _dir, _path) = common::test_engine("volume.db").await;
    let t = common::seed_thread(&engine).await;
    let u = common::user(1);

    // No cursor, no membership: hardcoded default.
    assert_eq!(
        engine.effective_volume(Some(u), t).await.unwrap(),
        Volume::Normal
    );

    // Membership default takes over.
    engine
        .set_membership_volume(u, common::group(1), Volume::Email)
        .await
        .unwrap();
    assert_eq!(
        engine.effective_volume(Some(u), t).await.unwrap(),
        Volume::Email
    );

    // Explicit per-thread setting wins.
    engine.set_volume(u, t, Volume::Mute).await.unwrap();
    assert_eq!(
        engine.effective_volume(Some(u), t).await.unwrap(),
        Volume::Mute
    );

    engine.shutdown().await;
}

/// The explicit value is per-thread: another thread in the same group
/// still resolves through the membership default.
#[tokio::test]
async fn explicit_volume_is_scoped_to_its_thread() {
    let (engine, _dir, _path) = common::test_engine("volume_scope.db").await;
    let t1 = common::seed_thread(&engine).await;
    let t2 = engine
        .create_thread(common::group(1), common::ts(0))
        .await
        .unwrap()
        .thread_id;
    let u = common::user(1);

    engine
        .set_membership_volume(u, common::group(1), Volume::Email)
        .await
        .unwrap();
    engine.set_volume(u, t1, Volume::Mute).await.unwrap();

    assert_eq!(
        engine.effective_volume(Some(u), t1).await.unwrap(),
        Volume::Mute
    );
    assert_eq!(
        engine.effective_volume(Some(u), t2).await.unwrap(),
        Volume::Email
    );

    engine.shutdown().await;
}

/// Guests resolve straight to the hardcoded default.
#[tokio::test]
async fn guest_volume_is_default() {
    let (engine, _dir, _path) = common::test_engine("volume_guest.db").await;
    let t = common::seed_thread(&engine).await;

    assert_eq!(
        engine.effective_volume(None, t).await.unwrap(),
        Volume::Normal
    );

    engine.shutdown().await;
}

/// Setting a volume before ever reading creates the cursor lazily, and a
/// later mark_read leaves the explicit volume in place.
#[tokio::test]
async fn volume_survives_mark_read() {
    let (engine, _dir, _path) = common::test_engine("volume_persist.db").await;
    let t = common::seed_thread(&engine).await;
    let u = common::user(1);

    engine.set_volume(u, t, Volume::Email).await.unwrap();

    let cursor = engine.cursor(Some(u), t).await.unwrap();
    assert!(cursor.first_read());
    assert_eq!(cursor.explicit_volume, Some(Volume::Email));

    common::seed_comments(&engine, t, 2).await;
    engine.mark_read(Some(u), t, None).await.unwrap();

    let cursor = engine.cursor(Some(u), t).await.unwrap();
    assert!(!cursor.first_read());
    assert_eq!(cursor.explicit_volume, Some(Volume::Email));
    assert_eq!(
        engine.effective_volume(Some(u), t).await.unwrap(),
        Volume::Email
    );

    engine.shutdown().await;
}
