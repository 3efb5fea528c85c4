//! Execution Client: typed interface to the remote execution backend.
//!
//! The backend owns the working copies and runs install/test commands in
//! isolation. This module defines the [`ExecutionBackend`] seam and its wire
//! types; [`HttpExecutionClient`] talks to the REST service.
//!
//! The client never retries. Transport failures surface as
//! [`ExecError::Unreachable`], failures reported by the backend as
//! [`ExecError::Remote`].

mod http;
pub mod sse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::domain::Ecosystem;

pub use http::{ExecClientConfig, HttpExecutionClient, DEFAULT_EXEC_TIMEOUT};

/// Errors surfaced by an [`ExecutionBackend`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    /// Connection refused, DNS failure, timeout. Retryable by the caller.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with a failure.
    #[error("backend error during {operation}: {detail}")]
    Remote {
        operation: String,
        status: Option<u16>,
        detail: String,
    },
}

impl ExecError {
    pub fn remote(operation: &str, detail: impl Into<String>) -> Self {
        ExecError::Remote {
            operation: operation.to_string(),
            status: None,
            detail: detail.into(),
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, ExecError::Unreachable(_))
    }
}

/// Short-lived push credential. Never serialized and never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Backend health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: String,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl BackendHealth {
    pub fn is_ok(&self) -> bool {
        matches!(self.status.as_str(), "ok" | "healthy")
    }
}

/// A working copy created by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session_id: String,
    /// Path of the clone inside the backend
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunRequest {
    pub session_id: String,
    pub ecosystem: Ecosystem,
    pub branch: String,
    pub install_command: Option<String>,
    pub test_command: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Success,
    Failed,
}

/// Structured result of one test execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub status: TestStatus,
    #[serde(default)]
    pub raw_output: String,
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
    /// Seconds spent by the backend
    #[serde(default)]
    pub duration: f64,
}

impl TestRun {
    pub fn succeeded(&self) -> bool {
        self.status == TestStatus::Success
    }
}

/// Which command produced an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPhase {
    Install,
    Test,
}

/// One line of live command output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub phase: OutputPhase,
    pub line: String,
}

/// Incremental test run: output lines as they are produced, then exactly
/// one terminal result once the remote process exits.
///
/// The result channel resolving to `Err`, or closing without a value, means
/// the stream broke and the caller should fall back to [`ExecutionBackend::run_tests`].
#[derive(Debug)]
pub struct TestRunStream {
    pub lines: mpsc::Receiver<OutputLine>,
    pub result: oneshot::Receiver<Result<TestRun, ExecError>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRequest {
    pub session_id: String,
    pub file_path: String,
    pub content: String,
    pub install_command: Option<String>,
    pub test_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub session_id: String,
    pub file_path: String,
    pub commit_message: String,
    pub branch_name: String,
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub success: bool,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// ExecutionBackend
// ---------------------------------------------------------------------------

/// Remote execution backend.
///
/// Implementations are constructed once and shared by reference; nothing in
/// the engine holds a process-global client.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn health(&self) -> Result<BackendHealth, ExecError>;

    /// Clone `repo_url` into a fresh working copy.
    async fn create_session(
        &self,
        repo_url: &str,
        ecosystem: Ecosystem,
        owner: Option<&str>,
    ) -> Result<CreatedSession, ExecError>;

    /// Drop the working copy held for `session_id`.
    async fn release_session(&self, session_id: &str) -> Result<(), ExecError>;

    /// Run install and test commands, blocking until the process exits.
    async fn run_tests(&self, request: &TestRunRequest) -> Result<TestRun, ExecError>;

    /// Incremental variant of [`ExecutionBackend::run_tests`].
    async fn run_tests_streaming(
        &self,
        _request: &TestRunRequest,
    ) -> Result<TestRunStream, ExecError> {
        Err(ExecError::remote(
            "run_tests_streaming",
            "incremental runs are not supported by this backend",
        ))
    }

    /// File content, or `None` when the file is missing or unreadable.
    async fn read_file(&self, session_id: &str, path: &str) -> Result<Option<String>, ExecError>;

    /// Overwrite a file in the working copy.
    async fn apply_fix(&self, request: &FixRequest) -> Result<FixResponse, ExecError>;

    /// Branch, commit and push one file.
    async fn commit(&self, request: &CommitRequest) -> Result<CommitResponse, ExecError>;
}
