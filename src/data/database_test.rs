//! Database tests

use super::*;
use chrono::Utc;
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn sample_checkin(rkey: &str, author_did: &str, created_at: &str) -> Checkin {
    Checkin {
        id: rkey.to_string(),
        uri: format!("at://{}/app.dropanchor.checkin/{}", author_did, rkey),
        author_did: author_did.to_string(),
        text: "Dropped anchor".to_string(),
        created_at: created_at.to_string(),
        latitude: Some(52.3676),
        longitude: Some(4.9041),
        address_ref_uri: None,
        address_ref_cid: None,
        cached_address_name: None,
        cached_address_street: None,
        cached_address_locality: None,
        cached_address_region: None,
        cached_address_country: None,
        cached_address_postal_code: None,
        indexed_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
    // Connection successful if we get here without panicking
}

#[tokio::test]
async fn test_checkin_insert_is_idempotent() {
    let (db, _temp_dir) = create_test_db().await;

    let checkin = sample_checkin("3kabc", "did:plc:alice", "2025-01-18T10:00:00Z");

    // First insert stores the row
    assert!(db.insert_checkin_if_new(&checkin).await.unwrap());

    // Re-processing the identical creation event is a silent skip
    assert!(!db.insert_checkin_if_new(&checkin).await.unwrap());

    assert_eq!(db.count_checkins().await.unwrap(), 1);
    assert!(db.checkin_exists("did:plc:alice", "3kabc").await.unwrap());
}

#[tokio::test]
async fn test_same_rkey_different_authors_both_stored() {
    let (db, _temp_dir) = create_test_db().await;

    db.insert_checkin_if_new(&sample_checkin("3kabc", "did:plc:alice", "2025-01-18T10:00:00Z"))
        .await
        .unwrap();
    db.insert_checkin_if_new(&sample_checkin("3kabc", "did:plc:bob", "2025-01-18T11:00:00Z"))
        .await
        .unwrap();

    assert_eq!(db.count_checkins().await.unwrap(), 2);
    assert_eq!(db.count_authors().await.unwrap(), 2);
}

#[tokio::test]
async fn test_global_feed_order_and_cursor() {
    let (db, _temp_dir) = create_test_db().await;

    for (rkey, created_at) in [
        ("3ka", "2025-01-18T08:00:00Z"),
        ("3kb", "2025-01-18T10:00:00Z"),
        ("3kc", "2025-01-18T09:00:00Z"),
    ] {
        db.insert_checkin_if_new(&sample_checkin(rkey, "did:plc:alice", created_at))
            .await
            .unwrap();
    }

    let page = db.get_global_feed(2, None).await.unwrap();
    let ids: Vec<_> = page.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["3kb", "3kc"]);

    // Paging from the last created_at never repeats that row
    let cursor = page.last().unwrap().created_at.clone();
    let next = db.get_global_feed(2, Some(&cursor)).await.unwrap();
    let next_ids: Vec<_> = next.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(next_ids, vec!["3ka"]);
}

#[tokio::test]
async fn test_user_checkins_newest_first() {
    let (db, _temp_dir) = create_test_db().await;

    db.insert_checkin_if_new(&sample_checkin("3ka", "did:plc:alice", "2025-01-18T10:00:00Z"))
        .await
        .unwrap();
    db.insert_checkin_if_new(&sample_checkin("3kb", "did:plc:alice", "2025-01-18T09:00:00Z"))
        .await
        .unwrap();
    db.insert_checkin_if_new(&sample_checkin("3kc", "did:plc:bob", "2025-01-18T12:00:00Z"))
        .await
        .unwrap();

    let checkins = db.get_user_checkins("did:plc:alice", 50).await.unwrap();
    let created: Vec<_> = checkins.iter().map(|c| c.created_at.as_str()).collect();
    assert_eq!(created, vec!["2025-01-18T10:00:00Z", "2025-01-18T09:00:00Z"]);
}

#[tokio::test]
async fn test_located_checkins_skip_null_coordinates() {
    let (db, _temp_dir) = create_test_db().await;

    let mut unlocated = sample_checkin("3ka", "did:plc:alice", "2025-01-18T10:00:00Z");
    unlocated.latitude = None;
    unlocated.longitude = None;
    db.insert_checkin_if_new(&unlocated).await.unwrap();
    db.insert_checkin_if_new(&sample_checkin("3kb", "did:plc:alice", "2025-01-18T09:00:00Z"))
        .await
        .unwrap();

    let located = db.get_recent_located_checkins(10).await.unwrap();
    assert_eq!(located.len(), 1);
    assert_eq!(located[0].id, "3kb");
}

#[tokio::test]
async fn test_replace_follows_makes_stored_set_exact() {
    let (db, _temp_dir) = create_test_db().await;

    let now = Utc::now();
    let edge = |following: &str| FollowEdge {
        follower_did: "did:plc:alice".to_string(),
        following_did: following.to_string(),
        created_at: now,
        synced_at: now,
    };

    db.replace_follows("did:plc:alice", &[edge("did:plc:bob"), edge("did:plc:carol")])
        .await
        .unwrap();
    assert_eq!(db.count_follows("did:plc:alice").await.unwrap(), 2);

    // A later sync fully replaces the previous set
    db.replace_follows("did:plc:alice", &[edge("did:plc:dan")])
        .await
        .unwrap();

    let targets = db.get_follow_targets("did:plc:alice").await.unwrap();
    assert_eq!(targets.len(), 1);
    assert!(targets.contains("did:plc:dan"));
}

#[tokio::test]
async fn test_follow_edge_insert_and_delete() {
    let (db, _temp_dir) = create_test_db().await;

    let now = Utc::now();
    let edge = FollowEdge {
        follower_did: "did:plc:alice".to_string(),
        following_did: "did:plc:bob".to_string(),
        created_at: now,
        synced_at: now,
    };

    db.insert_follow_edge(&edge).await.unwrap();
    assert_eq!(db.count_follows("did:plc:alice").await.unwrap(), 1);

    db.delete_follow_edge("did:plc:alice", "did:plc:bob")
        .await
        .unwrap();
    assert_eq!(db.count_follows("did:plc:alice").await.unwrap(), 0);
}

#[tokio::test]
async fn test_following_feed_restricted_to_followed_authors() {
    let (db, _temp_dir) = create_test_db().await;

    db.insert_checkin_if_new(&sample_checkin("3ka", "did:plc:bob", "2025-01-18T10:00:00Z"))
        .await
        .unwrap();
    db.insert_checkin_if_new(&sample_checkin("3kb", "did:plc:carol", "2025-01-18T11:00:00Z"))
        .await
        .unwrap();

    let now = Utc::now();
    db.insert_follow_edge(&FollowEdge {
        follower_did: "did:plc:alice".to_string(),
        following_did: "did:plc:bob".to_string(),
        created_at: now,
        synced_at: now,
    })
    .await
    .unwrap();

    let feed = db
        .get_following_feed("did:plc:alice", 50, None)
        .await
        .unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].author_did, "did:plc:bob");
}

#[tokio::test]
async fn test_profile_cache_roundtrip_and_staleness() {
    let (db, _temp_dir) = create_test_db().await;

    let stale = ProfileCacheEntry {
        did: "did:plc:alice".to_string(),
        handle: "alice.test".to_string(),
        display_name: Some("Alice".to_string()),
        avatar_url: None,
        fetched_at: Utc::now() - chrono::Duration::days(2),
    };
    let fresh = ProfileCacheEntry {
        did: "did:plc:bob".to_string(),
        handle: "bob.test".to_string(),
        display_name: None,
        avatar_url: None,
        fetched_at: Utc::now(),
    };
    db.upsert_profile(&stale).await.unwrap();
    db.upsert_profile(&fresh).await.unwrap();

    let retrieved = db.get_profile("did:plc:alice").await.unwrap().unwrap();
    assert_eq!(retrieved.handle, "alice.test");

    let threshold = Utc::now() - chrono::Duration::days(1);
    let stale_entries = db.get_stale_profiles(threshold, 10).await.unwrap();
    assert_eq!(stale_entries.len(), 1);
    assert_eq!(stale_entries[0].did, "did:plc:alice");
}

#[tokio::test]
async fn test_address_cache_failure_then_resolution() {
    let (db, _temp_dir) = create_test_db().await;

    let uri = "at://did:plc:alice/community.lexicon.location.address/3kaddr";

    db.mark_address_failed(uri, Utc::now()).await.unwrap();
    let entry = db.get_address(uri).await.unwrap().unwrap();
    assert!(entry.failed_at.is_some());
    assert!(!entry.is_fresh(Utc::now()));

    let resolved = AddressCacheEntry {
        uri: uri.to_string(),
        cid: Some("bafyabc".to_string()),
        name: Some("Cafe de Pijp".to_string()),
        street: Some("Ferdinand Bolstraat 17".to_string()),
        locality: Some("Amsterdam".to_string()),
        region: Some("NH".to_string()),
        country: Some("NL".to_string()),
        postal_code: Some("1072 LA".to_string()),
        resolved_at: Some(Utc::now()),
        failed_at: None,
    };
    db.upsert_address(&resolved).await.unwrap();

    let entry = db.get_address(uri).await.unwrap().unwrap();
    assert!(entry.is_fresh(Utc::now()));
    assert_eq!(entry.name.as_deref(), Some("Cafe de Pijp"));
}

#[tokio::test]
async fn test_processing_log_latest() {
    let (db, _temp_dir) = create_test_db().await;

    assert!(db.latest_processing_log().await.unwrap().is_none());

    let older = ProcessingLogEntry {
        id: EntityId::new().0,
        run_at: Utc::now() - chrono::Duration::minutes(10),
        source: "jetstream".to_string(),
        events_processed: 5,
        errors: 0,
        duration_ms: 1200,
    };
    let newer = ProcessingLogEntry {
        id: EntityId::new().0,
        run_at: Utc::now(),
        source: "mixed".to_string(),
        events_processed: 2,
        errors: 1,
        duration_ms: 900,
    };
    db.append_processing_log(&older).await.unwrap();
    db.append_processing_log(&newer).await.unwrap();

    let latest = db.latest_processing_log().await.unwrap().unwrap();
    assert_eq!(latest.source, "mixed");
    assert_eq!(latest.errors, 1);
}

#[tokio::test]
async fn test_ingest_cursor_roundtrip() {
    let (db, _temp_dir) = create_test_db().await;

    assert!(db.get_ingest_cursor().await.unwrap().is_none());

    db.set_ingest_cursor(1_737_200_000_000_000).await.unwrap();
    assert_eq!(
        db.get_ingest_cursor().await.unwrap(),
        Some(1_737_200_000_000_000)
    );

    // Cursor is monotonically overwritten
    db.set_ingest_cursor(1_737_200_500_000_000).await.unwrap();
    assert_eq!(
        db.get_ingest_cursor().await.unwrap(),
        Some(1_737_200_500_000_000)
    );
}
