//! Connection settings for the session store
//!
//! Supports in-memory (`mem://`), embedded (`surrealkv://`) and remote
//! (`ws://`, `wss://`) SurrealDB endpoints.

use std::time::Duration;

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StateError;
use crate::storage_traits::DEFAULT_SESSION_TTL;
use crate::Result;

/// Root credentials for a remote SurrealDB instance
#[derive(Clone)]
pub struct StoreCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for the SurrealDB-backed session store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Endpoint URL, e.g. "mem://", "surrealkv://.greenbranch/db", "wss://..."
    pub url: String,
    /// Namespace (default: "greenbranch")
    pub namespace: String,
    /// Database name (default: "sessions")
    pub database: String,
    /// Optional root credentials for remote endpoints
    pub credentials: Option<StoreCredentials>,
    /// TTL applied to new sessions
    pub default_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StoreConfig {
    /// In-memory store, mostly useful for tests and single-process runs
    pub fn in_memory() -> Self {
        Self::new("mem://")
    }

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: "greenbranch".to_string(),
            database: "sessions".to_string(),
            credentials: None,
            default_ttl: DEFAULT_SESSION_TTL,
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(StoreCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - GREENBRANCH_STORE_URL (optional, default: "mem://")
    /// - GREENBRANCH_STORE_NAMESPACE (optional, default: "greenbranch")
    /// - GREENBRANCH_STORE_DATABASE (optional, default: "sessions")
    /// - GREENBRANCH_STORE_USERNAME / GREENBRANCH_STORE_PASSWORD (optional, root auth)
    /// - GREENBRANCH_SESSION_TTL_SECS (optional, default: 7200)
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("GREENBRANCH_STORE_URL").unwrap_or_else(|_| "mem://".to_string());
        let mut config = Self::new(url);

        if let Ok(ns) = std::env::var("GREENBRANCH_STORE_NAMESPACE") {
            config.namespace = ns;
        }
        if let Ok(db) = std::env::var("GREENBRANCH_STORE_DATABASE") {
            config.database = db;
        }
        if let (Ok(username), Ok(password)) = (
            std::env::var("GREENBRANCH_STORE_USERNAME"),
            std::env::var("GREENBRANCH_STORE_PASSWORD"),
        ) {
            config = config.with_credentials(username, password);
        }
        if let Ok(raw) = std::env::var("GREENBRANCH_SESSION_TTL_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                StateError::Config(format!("GREENBRANCH_SESSION_TTL_SECS is not a number: {raw}"))
            })?;
            config.default_ttl = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(StateError::Config("session TTL must be positive".into()));
        }
        Ok(())
    }

    /// Open a connection, authenticate if configured, and select ns/db.
    #[instrument(skip(self), fields(url = %self.url, namespace = %self.namespace, database = %self.database))]
    pub async fn connect(&self) -> Result<Surreal<Any>> {
        let db = surrealdb::engine::any::connect(self.url.as_str())
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", self.url, e))
            })?;

        if let Some(creds) = &self.credentials {
            db.signin(Root {
                username: &creds.username,
                password: &creds.password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("Root authentication failed: {}", e)))?;
        }

        db.use_ns(&self.namespace)
            .use_db(&self.database)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        info!("SurrealDB session store connected");
        Ok(db)
    }
}
