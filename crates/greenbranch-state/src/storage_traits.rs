//! Session coordination contract
//!
//! A session is the server-side handle to one cloned working copy under
//! repair. The `SessionStore` trait is the only owner of session records;
//! every other component refers to a session by its id.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Default lifetime of a session record.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7200);

/// Owner key used to index sessions created without an owner.
pub const ANONYMOUS_OWNER: &str = "anonymous";

// ---------------------------------------------------------------------------
// Identifiers and status
// ---------------------------------------------------------------------------

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh, unguessable identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a session.
///
/// Order: `created → running → {fixed | fix_failed} → committed`.
/// `expired` is terminal and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Running,
    Fixed,
    FixFailed,
    Committed,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Running => "running",
            SessionStatus::Fixed => "fixed",
            SessionStatus::FixFailed => "fix_failed",
            SessionStatus::Committed => "committed",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(SessionStatus::Created),
            "running" => Some(SessionStatus::Running),
            "fixed" => Some(SessionStatus::Fixed),
            "fix_failed" => Some(SessionStatus::FixFailed),
            "committed" => Some(SessionStatus::Committed),
            "expired" => Some(SessionStatus::Expired),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SessionStatus::Created => 0,
            SessionStatus::Running => 1,
            SessionStatus::Fixed | SessionStatus::FixFailed => 2,
            SessionStatus::Committed => 3,
            SessionStatus::Expired => 4,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    ///
    /// Re-entering the same status is allowed; an expired session never
    /// comes back, and the two outcome statuses do not replace each other.
    pub fn can_advance_to(&self, next: SessionStatus) -> bool {
        if *self == SessionStatus::Expired {
            return next == SessionStatus::Expired;
        }
        if *self == next {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Caller-supplied data for a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub owner: Option<String>,
    pub status: SessionStatus,
    pub repo_url: String,
    /// Location of the working copy inside the execution backend
    pub repo_location: String,
    /// Ecosystem tag, e.g. "python" or "nodejs"
    pub ecosystem: String,
}

impl NewSession {
    pub fn new(
        repo_url: impl Into<String>,
        repo_location: impl Into<String>,
        ecosystem: impl Into<String>,
    ) -> Self {
        Self {
            owner: None,
            status: SessionStatus::Created,
            repo_url: repo_url.into(),
            repo_location: repo_location.into(),
            ecosystem: ecosystem.into(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Index key for the owner, falling back to [`ANONYMOUS_OWNER`].
    pub fn owner_key(&self) -> &str {
        self.owner.as_deref().unwrap_or(ANONYMOUS_OWNER)
    }
}

/// A live session record as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub owner: Option<String>,
    pub status: SessionStatus,
    pub repo_url: String,
    pub repo_location: String,
    pub ecosystem: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub(crate) fn from_new(id: &SessionId, session: NewSession, now: DateTime<Utc>) -> Self {
        Self {
            session_id: id.clone(),
            owner: session.owner,
            status: session.status,
            repo_url: session.repo_url,
            repo_location: session.repo_location,
            ecosystem: session.ecosystem,
            created_at: now,
            updated_at: now,
        }
    }

    /// Project the record back onto the data originally passed to `create`.
    pub fn to_new_session(&self) -> NewSession {
        NewSession {
            owner: self.owner.clone(),
            status: self.status,
            repo_url: self.repo_url.clone(),
            repo_location: self.repo_location.clone(),
            ecosystem: self.ecosystem.clone(),
        }
    }

    pub(crate) fn apply(&mut self, patch: &SessionPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(location) = &patch.repo_location {
            self.repo_location = location.clone();
        }
        if let Some(ecosystem) = &patch.ecosystem {
            self.ecosystem = ecosystem.clone();
        }
        self.updated_at = now;
    }
}

/// Partial update merged into an existing record. `None` fields are untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub repo_location: Option<String>,
    pub ecosystem: Option<String>,
}

impl SessionPatch {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Which index to inspect with [`SessionStore::index_len`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexScope {
    All,
    Owner(String),
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// TTL-backed session coordination store.
///
/// Guarantees:
/// - At most one live record per id; `create` fails with `AlreadyExists`.
/// - Expired records are invisible to every read.
/// - `update` merges fields and keeps the remaining TTL.
/// - Record and index mutations happen in one atomic step of the backing store.
/// - Listing evicts index entries whose record has expired.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// TTL applied by [`SessionStore::create`] and by updates on records without one.
    fn default_ttl(&self) -> Duration;

    /// Insert a record with the default TTL. Fails if a live record exists.
    async fn create(&self, id: &SessionId, session: NewSession) -> StorageResult<SessionRecord> {
        self.create_with_ttl(id, session, Some(self.default_ttl()))
            .await
    }

    /// Insert a record with an explicit TTL; `None` stores it without expiry.
    async fn create_with_ttl(
        &self,
        id: &SessionId,
        session: NewSession,
        ttl: Option<Duration>,
    ) -> StorageResult<SessionRecord>;

    /// Fetch a live record.
    async fn get(&self, id: &SessionId) -> StorageResult<SessionRecord>;

    /// Merge `patch` into a live record and refresh `updated_at`.
    async fn update(&self, id: &SessionId, patch: SessionPatch) -> StorageResult<SessionRecord>;

    /// Remove a live record and its index entries.
    async fn delete(&self, id: &SessionId) -> StorageResult<()>;

    /// All live records, oldest first. Sweeps the global index.
    async fn list_all(&self) -> StorageResult<Vec<SessionRecord>>;

    /// Live records of one owner, oldest first. Sweeps that owner's index.
    async fn list_by_owner(&self, owner: &str) -> StorageResult<Vec<SessionRecord>>;

    /// Whether a live record exists.
    async fn exists(&self, id: &SessionId) -> StorageResult<bool>;

    /// Remaining lifetime of a live record, `None` if it has no TTL.
    async fn ttl_remaining(&self, id: &SessionId) -> StorageResult<Option<Duration>>;

    /// Number of entries currently held by an index, stale ones included.
    async fn index_len(&self, scope: IndexScope) -> StorageResult<usize>;

    /// Cheap liveness probe of the backing store.
    async fn ping(&self) -> StorageResult<()>;
}
