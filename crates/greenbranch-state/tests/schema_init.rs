//! Schema initialization must be idempotent across reconnects.

use greenbranch_state::migrations::init_schema;
use greenbranch_state::{NewSession, SessionId, SessionStore, StoreConfig, SurrealSessionStore};

#[tokio::test]
async fn init_schema_twice_is_harmless() {
    let config = StoreConfig::in_memory();
    let db = config.connect().await.unwrap();

    init_schema(&db).await.unwrap();
    init_schema(&db).await.unwrap();

    let store = SurrealSessionStore::with_connection(db, config.default_ttl);
    let id = SessionId::new();
    store
        .create(&id, NewSession::new("u", "/w/u", "nodejs"))
        .await
        .unwrap();
    assert!(store.exists(&id).await.unwrap());
}

#[tokio::test]
async fn custom_namespace_isolates_sessions() {
    let store = SurrealSessionStore::connect(
        &StoreConfig::in_memory()
            .with_namespace("tenant_a")
            .with_database("runs"),
    )
    .await
    .unwrap();

    assert!(store.list_all().await.unwrap().is_empty());
    store.ping().await.unwrap();
}
