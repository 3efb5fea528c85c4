//! Database row types for SurrealDB
//!
//! Rows are converted to and from the `storage_traits` types at the
//! `SurrealSessionStore` boundary.

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = date.map(SurrealDatetime::from);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{SessionId, SessionPatch, SessionRecord, SessionStatus};

/// One row of the `sessions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SessionRow {
    pub session_id: String,
    /// Index key; `anonymous` for unowned sessions
    pub owner_key: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub status: String,
    pub repo_url: String,
    pub repo_location: String,
    pub ecosystem: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime_opt", default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    pub fn new(record: &SessionRecord, owner_key: &str, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            session_id: record.session_id.0.clone(),
            owner_key: owner_key.to_string(),
            owner: record.owner.clone(),
            status: record.status.as_str().to_string(),
            repo_url: record.repo_url.clone(),
            repo_location: record.repo_location.clone(),
            ecosystem: record.ecosystem.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            expires_at,
        }
    }

    pub fn into_record(self) -> Result<SessionRecord, StorageError> {
        let status = SessionStatus::parse(&self.status).ok_or_else(|| {
            StorageError::Serialization(format!("unknown session status: {}", self.status))
        })?;
        Ok(SessionRecord {
            session_id: SessionId(self.session_id),
            owner: self.owner,
            status,
            repo_url: self.repo_url,
            repo_location: self.repo_location,
            ecosystem: self.ecosystem,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Fields merged into a `sessions` row; absent fields are left untouched.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SessionPatchRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecosystem: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl SessionPatchRow {
    pub fn new(patch: SessionPatch, now: DateTime<Utc>) -> Self {
        Self {
            status: patch.status.map(|s| s.as_str().to_string()),
            repo_location: patch.repo_location,
            ecosystem: patch.ecosystem,
            updated_at: now,
        }
    }
}

/// Remaining lifetime of a row, clamped at zero.
pub(crate) fn remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (expires_at - now).to_std().unwrap_or_default()
}
