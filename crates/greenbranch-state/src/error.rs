//! Error types for greenbranch-state

use thiserror::Error;

/// Errors raised while connecting to the backing database or preparing its schema
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Invalid configuration value
    #[error("Invalid store configuration: {0}")]
    Config(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by [`crate::SessionStore`] operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No live record for the id (absent or expired)
    #[error("session not found: {session_id}")]
    NotFound { session_id: String },

    /// A live record already exists for the id
    #[error("session already exists: {session_id}")]
    AlreadyExists { session_id: String },

    /// Stored data could not be converted
    #[error("session serialization failed: {0}")]
    Serialization(String),

    /// Backing store failure
    #[error("session backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
