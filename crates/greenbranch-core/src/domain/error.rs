//! Run-level error taxonomy for greenbranch.
//!
//! Every variant carries its own HTTP-style status code and retry hint, so
//! callers never have to infer meaning from an error's printed name.

use greenbranch_state::StorageError;

use crate::exec::ExecError;
use crate::llm::PatchGenerationError;

/// greenbranch run errors.
#[derive(Debug, thiserror::Error)]
pub enum HealError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already exists: {0}")]
    SessionAlreadyExists(String),

    #[error("session creation failed: {0}")]
    SessionCreation(String),

    #[error("execution backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("execution backend error during {operation}: {detail}")]
    BackendError {
        operation: String,
        status: Option<u16>,
        detail: String,
    },

    #[error("patch generation failed: {0}")]
    PatchGeneration(String),

    #[error("unsupported ecosystem: {0}")]
    UnsupportedEcosystem(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HealError {
    /// HTTP status a service boundary should report for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            HealError::SessionNotFound(_) => 404,
            HealError::SessionAlreadyExists(_) => 409,
            HealError::UnsupportedEcosystem(_) => 422,
            HealError::InvalidRequest(_) => 400,
            HealError::BackendUnreachable(_) => 503,
            HealError::BackendError { .. } | HealError::SessionCreation(_) => 502,
            HealError::PatchGeneration(_)
            | HealError::Storage(_)
            | HealError::DigestMismatch { .. }
            | HealError::Serialization(_)
            | HealError::Io(_) => 500,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HealError::BackendUnreachable(_))
    }

    /// Stable machine-readable tag.
    pub fn kind(&self) -> &'static str {
        match self {
            HealError::SessionNotFound(_) => "session_not_found",
            HealError::SessionAlreadyExists(_) => "session_already_exists",
            HealError::SessionCreation(_) => "session_creation",
            HealError::BackendUnreachable(_) => "backend_unreachable",
            HealError::BackendError { .. } => "backend_error",
            HealError::PatchGeneration(_) => "patch_generation",
            HealError::UnsupportedEcosystem(_) => "unsupported_ecosystem",
            HealError::InvalidRequest(_) => "invalid_request",
            HealError::Storage(_) => "storage",
            HealError::DigestMismatch { .. } => "digest_mismatch",
            HealError::Serialization(_) => "serialization",
            HealError::Io(_) => "io",
        }
    }
}

impl From<StorageError> for HealError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { session_id } => HealError::SessionNotFound(session_id),
            StorageError::AlreadyExists { session_id } => {
                HealError::SessionAlreadyExists(session_id)
            }
            other => HealError::Storage(other.to_string()),
        }
    }
}

impl From<ExecError> for HealError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Unreachable(detail) => HealError::BackendUnreachable(detail),
            ExecError::Remote {
                operation,
                status,
                detail,
            } => HealError::BackendError {
                operation,
                status,
                detail,
            },
        }
    }
}

impl From<PatchGenerationError> for HealError {
    fn from(err: PatchGenerationError) -> Self {
        HealError::PatchGeneration(err.to_string())
    }
}

/// Result type for greenbranch operations.
pub type Result<T> = std::result::Result<T, HealError>;
