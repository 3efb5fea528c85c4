//! REST client for the execution backend.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use super::sse::SseLineBuffer;
use super::*;
use crate::domain::{HealError, Result as HealResult};

/// Default timeout applied to every backend call; remote test runs are slow.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(300);

const LINE_BUFFER: usize = 256;

/// Connection settings for [`HttpExecutionClient`].
#[derive(Debug, Clone)]
pub struct ExecClientConfig {
    /// Base URL, e.g. "http://localhost:8001"
    pub base_url: String,
    /// Sent as `X-API-Key` when present
    pub api_key: Option<String>,
    /// Uniform timeout for blocking and streaming calls
    pub timeout: Duration,
}

impl ExecClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP implementation of [`ExecutionBackend`].
#[derive(Debug, Clone)]
pub struct HttpExecutionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

/// Body of `POST /api/v1/sessions`.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
    #[serde(default)]
    repo_dir: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    #[serde(default)]
    content: String,
}

/// One `data:` frame of `POST /api/v1/execute/stream`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamFrame {
    Log {
        #[serde(default)]
        phase: String,
        line: String,
    },
    Result {
        data: TestRun,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Done {},
    #[serde(other)]
    Other,
}

impl HttpExecutionClient {
    pub fn new(config: ExecClientConfig) -> HealResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HealError::InvalidRequest(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.api_key {
            Some(key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    /// Send and require a 2xx answer.
    async fn send(
        &self,
        operation: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ExecError> {
        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ExecError::Remote {
            operation: operation.to_string(),
            status: Some(status.as_u16()),
            detail: error_detail(&body),
        })
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ExecError> {
        self.send(operation, builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| transport_error(operation, e))
    }

    /// Backend-side view of a working copy; `None` once the backend has dropped it.
    pub async fn session_info(&self, session_id: &str) -> Result<Option<Value>, ExecError> {
        let path = format!("/api/v1/sessions/{session_id}");
        match self
            .send_json("session_info", self.request(reqwest::Method::GET, &path))
            .await
        {
            Ok(info) => Ok(Some(info)),
            Err(ExecError::Remote {
                status: Some(404), ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Classify a reqwest failure: no answer at all is `Unreachable`.
fn transport_error(operation: &str, e: reqwest::Error) -> ExecError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        ExecError::Unreachable(format!("{operation}: {e}"))
    } else {
        ExecError::Remote {
            operation: operation.to_string(),
            status: e.status().map(|s| s.as_u16()),
            detail: e.to_string(),
        }
    }
}

/// Prefer the `detail` field of a JSON error body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").map(|d| d.to_string().trim_matches('"').to_string()))
        .unwrap_or_else(|| body.to_string())
}

fn phase_of(raw: &str) -> OutputPhase {
    if raw == "install" {
        OutputPhase::Install
    } else {
        OutputPhase::Test
    }
}

enum Flow {
    Continue,
    Finished(Result<TestRun, ExecError>),
}

const STREAM_OP: &str = "run_tests_streaming";

async fn handle_payload(
    payload: &str,
    lines: &mpsc::Sender<OutputLine>,
    result: &mut Option<TestRun>,
) -> Flow {
    match serde_json::from_str::<StreamFrame>(payload) {
        Ok(StreamFrame::Log { phase, line }) => {
            // A dropped receiver only means nobody is watching.
            let _ = lines
                .send(OutputLine {
                    phase: phase_of(&phase),
                    line,
                })
                .await;
        }
        Ok(StreamFrame::Result { data }) => *result = Some(data),
        Ok(StreamFrame::Error { message }) => {
            return Flow::Finished(Err(ExecError::remote(STREAM_OP, message)));
        }
        Ok(StreamFrame::Done {}) => {
            return Flow::Finished(
                result
                    .take()
                    .ok_or_else(|| ExecError::remote(STREAM_OP, "stream finished without a result")),
            );
        }
        Ok(StreamFrame::Other) => {}
        Err(e) => debug!(error = %e, "skipping undecodable stream frame"),
    }
    Flow::Continue
}

/// Drain an SSE body, forwarding output lines and returning the final result.
async fn pump_stream(
    response: reqwest::Response,
    lines: mpsc::Sender<OutputLine>,
) -> Result<TestRun, ExecError> {
    let mut body = response.bytes_stream();
    let mut buffer = SseLineBuffer::new();
    let mut result = None;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| transport_error(STREAM_OP, e))?;
        for payload in buffer.push(&chunk) {
            if let Flow::Finished(outcome) = handle_payload(&payload, &lines, &mut result).await {
                return outcome;
            }
        }
    }
    if let Some(payload) = buffer.finish() {
        if let Flow::Finished(outcome) = handle_payload(&payload, &lines, &mut result).await {
            return outcome;
        }
    }

    result.ok_or_else(|| ExecError::remote(STREAM_OP, "stream closed without a result"))
}

#[async_trait]
impl ExecutionBackend for HttpExecutionClient {
    async fn health(&self) -> Result<BackendHealth, ExecError> {
        self.send_json("health", self.request(reqwest::Method::GET, "/api/v1/health"))
            .await
    }

    #[instrument(skip(self))]
    async fn create_session(
        &self,
        repo_url: &str,
        ecosystem: Ecosystem,
        owner: Option<&str>,
    ) -> Result<CreatedSession, ExecError> {
        let mut query = vec![
            ("repo_url", repo_url.to_string()),
            ("language", ecosystem.as_str().to_string()),
        ];
        if let Some(owner) = owner {
            query.push(("user_id", owner.to_string()));
        }

        let body: SessionResponse = self
            .send_json(
                "create_session",
                self.request(reqwest::Method::POST, "/api/v1/sessions")
                    .query(&query),
            )
            .await?;

        info!(session_id = %body.session_id, "working copy created");
        Ok(CreatedSession {
            location: body.location.or(body.repo_dir).unwrap_or_default(),
            session_id: body.session_id,
        })
    }

    async fn release_session(&self, session_id: &str) -> Result<(), ExecError> {
        let path = format!("/api/v1/sessions/{session_id}");
        self.send("release_session", self.request(reqwest::Method::DELETE, &path))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id))]
    async fn run_tests(&self, request: &TestRunRequest) -> Result<TestRun, ExecError> {
        let body = json!({
            "session_id": request.session_id,
            "branch": request.branch,
            "install_command": request.install_command,
            "test_command": request.test_command,
        });
        let run: TestRun = self
            .send_json(
                "run_tests",
                self.request(reqwest::Method::POST, "/api/v1/execute")
                    .json(&body),
            )
            .await?;
        debug!(status = ?run.status, passed = run.passed, failed = run.failed, "tests finished");
        Ok(run)
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id))]
    async fn run_tests_streaming(
        &self,
        request: &TestRunRequest,
    ) -> Result<TestRunStream, ExecError> {
        let body = json!({
            "session_id": request.session_id,
            "branch": request.branch,
            "install_command": request.install_command,
            "test_command": request.test_command,
        });
        let response = self
            .send(
                "run_tests_streaming",
                self.request(reqwest::Method::POST, "/api/v1/execute/stream")
                    .header("Accept", "text/event-stream")
                    .json(&body),
            )
            .await?;

        let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
        let (result_tx, result_rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = pump_stream(response, line_tx).await;
            if let Err(e) = &outcome {
                warn!(error = %e, "incremental test run broke");
            }
            let _ = result_tx.send(outcome);
        });

        Ok(TestRunStream {
            lines: line_rx,
            result: result_rx,
        })
    }

    async fn read_file(&self, session_id: &str, path: &str) -> Result<Option<String>, ExecError> {
        let builder = self
            .request(reqwest::Method::GET, "/api/v1/files")
            .query(&[("session_id", session_id), ("file_path", path)]);

        match self.send_json::<FileResponse>("read_file", builder).await {
            Ok(file) if file.content.is_empty() => Ok(None),
            Ok(file) => Ok(Some(file.content)),
            Err(ExecError::Remote { detail, .. }) => {
                debug!(path, %detail, "file unavailable");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id, file = %request.file_path))]
    async fn apply_fix(&self, request: &FixRequest) -> Result<FixResponse, ExecError> {
        let body = json!({
            "session_id": request.session_id,
            "file_path": request.file_path,
            "fix_content": request.content,
            "install_command": request.install_command,
            "test_command": request.test_command,
        });
        self.send_json(
            "apply_fix",
            self.request(reqwest::Method::POST, "/api/v1/fix").json(&body),
        )
        .await
    }

    #[instrument(skip(self, request), fields(session_id = %request.session_id, file = %request.file_path))]
    async fn commit(&self, request: &CommitRequest) -> Result<CommitResponse, ExecError> {
        let body = json!({
            "session_id": request.session_id,
            "file_path": request.file_path,
            "commit_message": request.commit_message,
            "branch_name": request.branch_name,
            "github_token": request.credential.as_ref().map(Credential::expose),
        });
        self.send_json(
            "commit",
            self.request(reqwest::Method::POST, "/api/v1/commit")
                .json(&body),
        )
        .await
    }
}
