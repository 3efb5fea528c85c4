//! SurrealDB schema migrations and initialization
//!
//! Safe to call multiple times (idempotent).

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all session tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing greenbranch session schema");

    init_sessions_table(db).await?;
    init_index_tables(db).await?;

    info!("Session schema initialization complete");
    Ok(())
}

/// Initialize `sessions` table
///
/// Schema:
/// ```text
/// TABLE sessions {
///   session_id:    STRING (unique)
///   owner_key:     STRING (indexed)
///   owner:         STRING?
///   status:        STRING (created | running | fixed | fix_failed | committed | expired)
///   repo_url:      STRING
///   repo_location: STRING
///   ecosystem:     STRING
///   created_at:    DATETIME
///   updated_at:    DATETIME
///   expires_at:    DATETIME? (absent = no TTL)
/// }
/// ```
///
/// The unique index on `session_id` is what makes `create` insert-if-absent.
async fn init_sessions_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing sessions table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS sessions SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_session_id ON TABLE sessions COLUMNS session_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_session_owner ON TABLE sessions COLUMNS owner_key;
        DEFINE INDEX IF NOT EXISTS idx_session_expiry ON TABLE sessions COLUMNS expires_at;
    "#;

    db.query(sql)
        .await
        .and_then(|r| r.check())
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    info!("✓ sessions table initialized");
    Ok(())
}

/// Initialize `session_index` (global) and `owner_index` (per owner) tables
///
/// Both hold one row per indexed id and may briefly contain ids whose
/// record has expired; listing sweeps them.
async fn init_index_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing session index tables");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS session_index SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_session_index_id ON TABLE session_index COLUMNS session_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS owner_index SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_owner_index_pair ON TABLE owner_index COLUMNS owner, session_id UNIQUE;
    "#;

    db.query(sql)
        .await
        .and_then(|r| r.check())
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    info!("✓ session index tables initialized");
    Ok(())
}
