//! SurrealDB-backed SessionStore implementation
//!
//! Every multi-step operation runs as one `BEGIN TRANSACTION ... COMMIT
//! TRANSACTION` query, so independent processes sharing the database never
//! observe a record without its index entries or the reverse.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use surrealdb::engine::any::Any;
use surrealdb::{Response, Surreal};
use tracing::{debug, info, instrument, warn};

use crate::error::StorageError;
use crate::handle::StoreConfig;
use crate::migrations;
use crate::schema::{remaining, SessionPatchRow, SessionRow};
use crate::storage_traits::*;

/// Predicate selecting rows that have not expired.
const LIVE: &str = "(expires_at = NONE OR expires_at > time::now())";

const CREATE_TX: &str = r#"
    BEGIN TRANSACTION;
    DELETE sessions WHERE session_id = $sid AND expires_at != NONE AND expires_at <= time::now();
    DELETE session_index WHERE session_id = $sid;
    DELETE owner_index WHERE session_id = $sid;
    CREATE sessions CONTENT $row;
    CREATE session_index CONTENT { session_id: $sid };
    CREATE owner_index CONTENT { owner: $owner, session_id: $sid };
    COMMIT TRANSACTION;
"#;

const DELETE_TX: &str = r#"
    BEGIN TRANSACTION;
    DELETE session_index WHERE session_id = $sid;
    DELETE owner_index WHERE session_id = $sid;
    DELETE sessions WHERE session_id = $sid AND expires_at != NONE AND expires_at <= time::now();
    DELETE sessions WHERE session_id = $sid RETURN BEFORE;
    COMMIT TRANSACTION;
"#;

/// SurrealDB-backed implementation of [`SessionStore`].
#[derive(Clone)]
pub struct SurrealSessionStore {
    db: Surreal<Any>,
    default_ttl: Duration,
}

impl SurrealSessionStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect(&StoreConfig::in_memory()).await
    }

    /// Connect using `config` and run schema migrations.
    pub async fn connect(config: &StoreConfig) -> crate::Result<Self> {
        config.validate()?;
        let db = config.connect().await?;
        migrations::init_schema(&db).await?;
        info!(url = %config.url, "SurrealSessionStore ready");
        Ok(Self {
            db,
            default_ttl: config.default_ttl,
        })
    }

    /// Create from environment variables, see [`StoreConfig::from_env`].
    pub async fn from_env() -> crate::Result<Self> {
        Self::connect(&StoreConfig::from_env()?).await
    }

    /// Wrap an existing connection whose schema is already initialized.
    pub fn with_connection(db: Surreal<Any>, default_ttl: Duration) -> Self {
        Self { db, default_ttl }
    }

    // -- private helpers -----------------------------------------------------

    fn backend(e: surrealdb::Error) -> StorageError {
        StorageError::Backend(e.to_string())
    }

    fn not_found(id: &SessionId) -> StorageError {
        StorageError::NotFound {
            session_id: id.0.clone(),
        }
    }

    /// Rows returned by the last statement of a transaction.
    fn take_last<T: DeserializeOwned>(mut res: Response) -> StorageResult<Vec<T>> {
        let last = res.num_statements().saturating_sub(1);
        res.take(last).map_err(Self::backend)
    }

    fn into_records(rows: Vec<SessionRow>) -> StorageResult<Vec<SessionRecord>> {
        rows.into_iter().map(SessionRow::into_record).collect()
    }

    /// Fetch the live row for `id`, if any.
    async fn fetch_live(&self, id: &SessionId) -> StorageResult<Option<SessionRow>> {
        let sid = id.0.clone();
        let mut res = self
            .db
            .query(format!(
                "SELECT * FROM sessions WHERE session_id = $sid AND {LIVE}"
            ))
            .bind(("sid", sid))
            .await
            .map_err(Self::backend)?;

        let rows: Vec<SessionRow> = res.take(0).map_err(Self::backend)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl SessionStore for SurrealSessionStore {
    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    #[instrument(skip(self, session), fields(session_id = %id))]
    async fn create_with_ttl(
        &self,
        id: &SessionId,
        session: NewSession,
        ttl: Option<Duration>,
    ) -> StorageResult<SessionRecord> {
        let now = Utc::now();
        let owner = session.owner_key().to_string();
        let record = SessionRecord::from_new(id, session, now);
        let expires_at = ttl
            .map(|ttl| {
                chrono::Duration::from_std(ttl)
                    .map(|d| now + d)
                    .map_err(|e| StorageError::Backend(format!("invalid ttl: {e}")))
            })
            .transpose()?;
        let row = SessionRow::new(&record, &owner, expires_at);

        let outcome = self
            .db
            .query(CREATE_TX)
            .bind(("sid", id.0.clone()))
            .bind(("owner", owner))
            .bind(("row", row))
            .await
            .and_then(Response::check);

        match outcome {
            Ok(_) => {
                debug!("session created");
                Ok(record)
            }
            // The unique index rejected the insert; tell a live duplicate apart
            // from any other failure.
            Err(e) => {
                if self.fetch_live(id).await?.is_some() {
                    Err(StorageError::AlreadyExists {
                        session_id: id.0.clone(),
                    })
                } else {
                    Err(Self::backend(e))
                }
            }
        }
    }

    async fn get(&self, id: &SessionId) -> StorageResult<SessionRecord> {
        self.fetch_live(id)
            .await?
            .ok_or_else(|| Self::not_found(id))?
            .into_record()
    }

    #[instrument(skip(self, patch), fields(session_id = %id))]
    async fn update(&self, id: &SessionId, patch: SessionPatch) -> StorageResult<SessionRecord> {
        let now = Utc::now();
        let default_expiry = chrono::Duration::from_std(self.default_ttl)
            .map(|d| surrealdb::sql::Datetime::from(now + d))
            .map_err(|e| StorageError::Backend(format!("invalid ttl: {e}")))?;

        // MERGE never touches expires_at, so the remaining TTL carries over.
        let sql = format!(
            r#"
            BEGIN TRANSACTION;
            UPDATE sessions MERGE $patch WHERE session_id = $sid AND {LIVE};
            UPDATE sessions SET expires_at = $default_expiry WHERE session_id = $sid AND expires_at = NONE;
            SELECT * FROM sessions WHERE session_id = $sid AND {LIVE};
            COMMIT TRANSACTION;
            "#
        );

        let res = self
            .db
            .query(sql)
            .bind(("sid", id.0.clone()))
            .bind(("patch", SessionPatchRow::new(patch, now)))
            .bind(("default_expiry", default_expiry))
            .await
            .and_then(Response::check)
            .map_err(Self::backend)?;

        let rows: Vec<SessionRow> = Self::take_last(res)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Self::not_found(id))?
            .into_record()
    }

    #[instrument(skip(self), fields(session_id = %id))]
    async fn delete(&self, id: &SessionId) -> StorageResult<()> {
        let res = self
            .db
            .query(DELETE_TX)
            .bind(("sid", id.0.clone()))
            .await
            .and_then(Response::check)
            .map_err(Self::backend)?;

        let removed: Vec<SessionRow> = Self::take_last(res)?;
        if removed.is_empty() {
            return Err(Self::not_found(id));
        }
        debug!("session deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_all(&self) -> StorageResult<Vec<SessionRecord>> {
        let sql = format!(
            r#"
            BEGIN TRANSACTION;
            LET $live = (SELECT VALUE session_id FROM sessions WHERE {LIVE});
            DELETE session_index WHERE session_id NOTINSIDE $live;
            DELETE sessions WHERE session_id NOTINSIDE $live;
            LET $indexed = (SELECT VALUE session_id FROM session_index);
            SELECT * FROM sessions WHERE session_id INSIDE $indexed ORDER BY created_at ASC;
            COMMIT TRANSACTION;
            "#
        );

        let res = self
            .db
            .query(sql)
            .await
            .and_then(Response::check)
            .map_err(Self::backend)?;

        let rows: Vec<SessionRow> = Self::take_last(res)?;
        Self::into_records(rows)
    }

    #[instrument(skip(self))]
    async fn list_by_owner(&self, owner: &str) -> StorageResult<Vec<SessionRecord>> {
        let sql = format!(
            r#"
            BEGIN TRANSACTION;
            LET $live = (SELECT VALUE session_id FROM sessions WHERE {LIVE});
            DELETE owner_index WHERE owner = $owner AND session_id NOTINSIDE $live;
            LET $owned = (SELECT VALUE session_id FROM owner_index WHERE owner = $owner);
            SELECT * FROM sessions WHERE session_id INSIDE $owned AND {LIVE} ORDER BY created_at ASC;
            COMMIT TRANSACTION;
            "#
        );

        let res = self
            .db
            .query(sql)
            .bind(("owner", owner.to_string()))
            .await
            .and_then(Response::check)
            .map_err(Self::backend)?;

        let rows: Vec<SessionRow> = Self::take_last(res)?;
        Self::into_records(rows)
    }

    async fn exists(&self, id: &SessionId) -> StorageResult<bool> {
        Ok(self.fetch_live(id).await?.is_some())
    }

    async fn ttl_remaining(&self, id: &SessionId) -> StorageResult<Option<Duration>> {
        let row = self
            .fetch_live(id)
            .await?
            .ok_or_else(|| Self::not_found(id))?;
        Ok(row.expires_at.map(|at| remaining(at, Utc::now())))
    }

    async fn index_len(&self, scope: IndexScope) -> StorageResult<usize> {
        let mut res = match scope {
            IndexScope::All => self
                .db
                .query("SELECT VALUE session_id FROM session_index")
                .await
                .map_err(Self::backend)?,
            IndexScope::Owner(owner) => self
                .db
                .query("SELECT VALUE session_id FROM owner_index WHERE owner = $owner")
                .bind(("owner", owner))
                .await
                .map_err(Self::backend)?,
        };
        let ids: Vec<String> = res.take(0).map_err(Self::backend)?;
        Ok(ids.len())
    }

    async fn ping(&self) -> StorageResult<()> {
        self.db.health().await.map_err(|e| {
            warn!(error = %e, "session store health check failed");
            Self::backend(e)
        })
    }
}
