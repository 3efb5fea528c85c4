//! greenbranch-state: session coordination for healing runs
//!
//! Every healing run works against one cloned working copy, identified by a
//! session id. This crate owns those session records: it guarantees at most
//! one live record per id, expires records after a TTL, and keeps a global
//! and a per-owner index that heal themselves when records expire.
//!
//! ## Key Components
//!
//! - [`SessionStore`]: the coordination contract every backend satisfies
//! - [`SurrealSessionStore`]: SurrealDB implementation using transactions
//! - [`fakes::MemorySessionStore`]: in-process implementation for tests
//! - [`StoreConfig`]: connection settings read from the environment

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_sessions;

pub use error::{StateError, StorageError};
pub use handle::{StoreConfig, StoreCredentials};
pub use storage_traits::{
    IndexScope, NewSession, SessionId, SessionPatch, SessionRecord, SessionStatus, SessionStore,
    StorageResult, ANONYMOUS_OWNER, DEFAULT_SESSION_TTL,
};
pub use surreal_sessions::SurrealSessionStore;

/// Result type for connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
