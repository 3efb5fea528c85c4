//! Trait contract tests for SessionStore.
//!
//! Every behavioral check runs against both the in-memory fake and the
//! SurrealDB store. Expiry checks drive the fake with paused tokio time and
//! the SurrealDB store with short real TTLs.

use std::time::Duration;

use greenbranch_state::fakes::MemorySessionStore;
use greenbranch_state::{
    IndexScope, NewSession, SessionId, SessionPatch, SessionStatus, SessionStore, StorageError,
    SurrealSessionStore,
};

fn python_session() -> NewSession {
    NewSession::new(
        "https://github.com/acme/calc.git",
        "/workspace/calc",
        "python",
    )
}

async fn stores() -> Vec<(&'static str, Box<dyn SessionStore>)> {
    vec![
        ("memory", Box::new(MemorySessionStore::new())),
        (
            "surreal",
            Box::new(SurrealSessionStore::in_memory().await.unwrap()),
        ),
    ]
}

// ===========================================================================
// create / get
// ===========================================================================

#[tokio::test]
async fn get_returns_created_data_plus_timestamps() {
    for (name, store) in stores().await {
        let id = SessionId::new();
        let data = python_session().with_owner("dana");
        let created = store.create(&id, data.clone()).await.unwrap();
        let fetched = store.get(&id).await.unwrap();

        assert_eq!(fetched.to_new_session(), data, "{name}");
        assert_eq!(fetched.session_id, id, "{name}");
        assert_eq!(
            fetched.created_at.timestamp_millis(),
            created.created_at.timestamp_millis(),
            "{name}"
        );
        let ttl = store.ttl_remaining(&id).await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(7100), "{name}: ttl {ttl:?}");
        assert!(ttl <= Duration::from_secs(7200), "{name}: ttl {ttl:?}");
    }
}

#[tokio::test]
async fn create_twice_fails_with_already_exists() {
    for (name, store) in stores().await {
        let id = SessionId::new();
        store.create(&id, python_session()).await.unwrap();
        let err = store.create(&id, python_session()).await.unwrap_err();

        assert!(
            matches!(err, StorageError::AlreadyExists { .. }),
            "{name}: {err:?}"
        );
        assert_eq!(store.index_len(IndexScope::All).await.unwrap(), 1, "{name}");
    }
}

#[tokio::test]
async fn get_unknown_is_not_found() {
    for (name, store) in stores().await {
        let err = store.get(&SessionId::from("missing")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }), "{name}");
        assert!(!store.exists(&SessionId::from("missing")).await.unwrap());
    }
}

// ===========================================================================
// update
// ===========================================================================

#[tokio::test]
async fn update_merges_fields_and_refreshes_updated_at() {
    for (name, store) in stores().await {
        let id = SessionId::new();
        let created = store.create(&id, python_session()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let updated = store
            .update(&id, SessionPatch::status(SessionStatus::Running))
            .await
            .unwrap();

        assert_eq!(updated.status, SessionStatus::Running, "{name}");
        assert_eq!(updated.repo_location, "/workspace/calc", "{name}");
        assert!(updated.updated_at >= created.updated_at, "{name}");
        assert_eq!(store.get(&id).await.unwrap().status, SessionStatus::Running);
    }
}

#[tokio::test]
async fn update_missing_is_not_found() {
    for (name, store) in stores().await {
        let err = store
            .update(&SessionId::from("ghost"), SessionPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }), "{name}");
    }
}

#[tokio::test]
async fn update_keeps_remaining_ttl() {
    for (name, store) in stores().await {
        let id = SessionId::new();
        store
            .create_with_ttl(&id, python_session(), Some(Duration::from_secs(500)))
            .await
            .unwrap();

        store
            .update(&id, SessionPatch::status(SessionStatus::Running))
            .await
            .unwrap();

        let ttl = store.ttl_remaining(&id).await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(500), "{name}: ttl {ttl:?}");
        assert!(ttl > Duration::from_secs(490), "{name}: ttl {ttl:?}");
    }
}

#[tokio::test]
async fn update_applies_default_ttl_when_none_set() {
    for (name, store) in stores().await {
        let id = SessionId::new();
        store
            .create_with_ttl(&id, python_session(), None)
            .await
            .unwrap();
        assert_eq!(store.ttl_remaining(&id).await.unwrap(), None, "{name}");

        store.update(&id, SessionPatch::default()).await.unwrap();

        let ttl = store.ttl_remaining(&id).await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(7100), "{name}: ttl {ttl:?}");
    }
}

// ===========================================================================
// delete
// ===========================================================================

#[tokio::test]
async fn delete_removes_record_and_indexes() {
    for (name, store) in stores().await {
        let id = SessionId::new();
        store
            .create(&id, python_session().with_owner("kai"))
            .await
            .unwrap();
        store.delete(&id).await.unwrap();

        assert!(!store.exists(&id).await.unwrap(), "{name}");
        assert_eq!(store.index_len(IndexScope::All).await.unwrap(), 0, "{name}");
        assert_eq!(
            store
                .index_len(IndexScope::Owner("kai".into()))
                .await
                .unwrap(),
            0,
            "{name}"
        );

        let err = store.delete(&id).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }), "{name}");
    }
}

#[tokio::test]
async fn deleted_id_can_be_created_again() {
    for (name, store) in stores().await {
        let id = SessionId::new();
        store.create(&id, python_session()).await.unwrap();
        store.delete(&id).await.unwrap();
        store.create(&id, python_session()).await.unwrap();
        assert!(store.exists(&id).await.unwrap(), "{name}");
    }
}

// ===========================================================================
// listing
// ===========================================================================

#[tokio::test]
async fn list_by_owner_filters_and_defaults_to_anonymous() {
    for (name, store) in stores().await {
        let a = SessionId::from("a");
        let b = SessionId::from("b");
        let c = SessionId::from("c");
        store
            .create(&a, python_session().with_owner("dana"))
            .await
            .unwrap();
        store
            .create(&b, python_session().with_owner("kai"))
            .await
            .unwrap();
        store.create(&c, python_session()).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 3, "{name}");

        let dana: Vec<_> = store
            .list_by_owner("dana")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.session_id)
            .collect();
        assert_eq!(dana, vec![a.clone()], "{name}");

        let anonymous = store.list_by_owner("anonymous").await.unwrap();
        assert_eq!(anonymous.len(), 1, "{name}");
        assert_eq!(anonymous[0].session_id, c, "{name}");
        assert!(store.list_by_owner("nobody").await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn ping_succeeds() {
    for (name, store) in stores().await {
        assert!(store.ping().await.is_ok(), "{name}");
    }
}

// ===========================================================================
// expiry (memory fake, paused clock)
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn memory_ttl_preserved_across_update() {
    let store = MemorySessionStore::new();
    let id = SessionId::new();
    store.create(&id, python_session()).await.unwrap();

    tokio::time::advance(Duration::from_secs(6700)).await;
    store
        .update(&id, SessionPatch::status(SessionStatus::Running))
        .await
        .unwrap();

    let ttl = store.ttl_remaining(&id).await.unwrap().unwrap();
    assert_eq!(ttl, Duration::from_secs(500));
}

#[tokio::test(start_paused = true)]
async fn memory_expired_records_are_invisible() {
    let store = MemorySessionStore::with_default_ttl(Duration::from_secs(60));
    let id = SessionId::new();
    store.create(&id, python_session()).await.unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;

    assert!(matches!(
        store.get(&id).await,
        Err(StorageError::NotFound { .. })
    ));
    assert!(matches!(
        store.update(&id, SessionPatch::default()).await,
        Err(StorageError::NotFound { .. })
    ));
    // An expired id is free again.
    store.create(&id, python_session()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn memory_listing_sweeps_stale_index_entries() {
    let store = MemorySessionStore::with_default_ttl(Duration::from_secs(60));
    let short = SessionId::from("short");
    let long = SessionId::from("long");
    store
        .create(&short, python_session().with_owner("dana"))
        .await
        .unwrap();
    store
        .create_with_ttl(
            &long,
            python_session().with_owner("dana"),
            Some(Duration::from_secs(600)),
        )
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(store.index_len(IndexScope::All).await.unwrap(), 2);

    let live = store.list_all().await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].session_id, long);
    assert_eq!(store.index_len(IndexScope::All).await.unwrap(), 1);

    let owner_scope = IndexScope::Owner("dana".into());
    assert_eq!(store.index_len(owner_scope.clone()).await.unwrap(), 2);
    assert_eq!(store.list_by_owner("dana").await.unwrap().len(), 1);
    assert_eq!(store.index_len(owner_scope).await.unwrap(), 1);
}

// ===========================================================================
// expiry (SurrealDB, real clock)
// ===========================================================================

#[tokio::test]
async fn surreal_listing_sweeps_stale_index_entries() {
    let store = SurrealSessionStore::in_memory().await.unwrap();
    let short = SessionId::from("short");
    let long = SessionId::from("long");
    store
        .create_with_ttl(
            &short,
            python_session().with_owner("dana"),
            Some(Duration::from_millis(200)),
        )
        .await
        .unwrap();
    store
        .create(&long, python_session().with_owner("dana"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(!store.exists(&short).await.unwrap());
    assert_eq!(store.index_len(IndexScope::All).await.unwrap(), 2);

    let live = store.list_all().await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].session_id, long);
    assert_eq!(store.index_len(IndexScope::All).await.unwrap(), 1);

    assert_eq!(store.list_by_owner("dana").await.unwrap().len(), 1);
    assert_eq!(
        store
            .index_len(IndexScope::Owner("dana".into()))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn surreal_expired_id_can_be_recreated() {
    let store = SurrealSessionStore::in_memory().await.unwrap();
    let id = SessionId::new();
    store
        .create_with_ttl(&id, python_session(), Some(Duration::from_millis(150)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(matches!(
        store.delete(&id).await,
        Err(StorageError::NotFound { .. })
    ));
    store.create(&id, python_session()).await.unwrap();
    assert!(store.exists(&id).await.unwrap());
}
