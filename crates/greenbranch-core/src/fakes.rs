//! In-memory fakes for the engine's collaborators (testing only)
//!
//! Each fake keeps its script and call log behind one mutex. Scripts are
//! consumed front to back; the last scripted test run repeats once the queue
//! is down to one entry, so loops that hit their cap need no padding.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::domain::Ecosystem;
use crate::exec::{
    BackendHealth, CommitRequest, CommitResponse, CreatedSession, Credential, ExecError,
    ExecutionBackend, FixRequest, FixResponse, OutputLine, OutputPhase, TestRun, TestRunRequest,
    TestRunStream, TestStatus,
};
use crate::llm::{PatchGenerationError, PatchGenerator};
use crate::pr::{PublishError, PullRequest, PullRequestDraft, PullRequestPublisher};

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

/// How [`ScriptedBackend::run_tests_streaming`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// The incremental call is refused outright
    #[default]
    Unavailable,
    /// Every output line is streamed, then the scripted result
    Lines,
    /// One line is streamed, then the stream breaks without a result
    BreakMidStream,
    /// One line is streamed, then the call times out
    TimeoutMidStream,
}

/// One call observed by the fake, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Health,
    CreateSession(String),
    ReleaseSession(String),
    RunTests,
    RunTestsStreaming,
    ReadFile(String),
    ApplyFix(String),
    Commit(String),
}

#[derive(Debug)]
struct BackendState {
    session_id: String,
    runs: VecDeque<TestRun>,
    files: HashMap<String, String>,
    apply_results: VecDeque<Result<FixResponse, ExecError>>,
    commit_results: VecDeque<Result<CommitResponse, ExecError>>,
    create_error: Option<ExecError>,
    unreachable: HashSet<&'static str>,
    stream_mode: StreamMode,
    calls: Vec<BackendCall>,
    applied: Vec<FixRequest>,
    commits: Vec<CommitRequest>,
    commit_seq: u32,
}

/// Execution backend that replays scripted test runs over an in-memory tree.
#[derive(Debug)]
pub struct ScriptedBackend {
    inner: Mutex<BackendState>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BackendState {
                session_id: "sess-1".to_string(),
                runs: VecDeque::new(),
                files: HashMap::new(),
                apply_results: VecDeque::new(),
                commit_results: VecDeque::new(),
                create_error: None,
                unreachable: HashSet::new(),
                stream_mode: StreamMode::default(),
                calls: Vec::new(),
                applied: Vec::new(),
                commits: Vec::new(),
                commit_seq: 0,
            }),
        }
    }

    pub fn with_session_id(self, id: &str) -> Self {
        self.inner.lock().unwrap().session_id = id.to_string();
        self
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_string());
        self
    }

    /// Queue a failing run with the given raw output.
    pub fn failing_run(self, raw_output: &str) -> Self {
        self.push_run(TestRun {
            status: TestStatus::Failed,
            raw_output: raw_output.to_string(),
            passed: 0,
            failed: 1,
            duration: 0.5,
        })
    }

    /// Queue a passing run.
    pub fn passing_run(self, raw_output: &str) -> Self {
        self.push_run(TestRun {
            status: TestStatus::Success,
            raw_output: raw_output.to_string(),
            passed: 1,
            failed: 0,
            duration: 0.5,
        })
    }

    pub fn push_run(self, run: TestRun) -> Self {
        self.inner.lock().unwrap().runs.push_back(run);
        self
    }

    /// Result of the next `apply_fix`; applies succeed when none is queued.
    pub fn apply_result(self, result: Result<FixResponse, ExecError>) -> Self {
        self.inner.lock().unwrap().apply_results.push_back(result);
        self
    }

    /// Result of the next `commit`; commits succeed when none is queued.
    pub fn commit_result(self, result: Result<CommitResponse, ExecError>) -> Self {
        self.inner.lock().unwrap().commit_results.push_back(result);
        self
    }

    pub fn create_error(self, err: ExecError) -> Self {
        self.inner.lock().unwrap().create_error = Some(err);
        self
    }

    pub fn stream_mode(self, mode: StreamMode) -> Self {
        self.inner.lock().unwrap().stream_mode = mode;
        self
    }

    /// Make `operation` (e.g. `"read_file"`) fail as unreachable.
    pub fn unreachable(self, operation: &'static str) -> Self {
        self.inner.lock().unwrap().unreachable.insert(operation);
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn applied(&self) -> Vec<FixRequest> {
        self.inner.lock().unwrap().applied.clone()
    }

    pub fn commits(&self) -> Vec<CommitRequest> {
        self.inner.lock().unwrap().commits.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.inner.lock().unwrap().files.get(path).cloned()
    }

    fn check(state: &BackendState, operation: &'static str) -> Result<(), ExecError> {
        if state.unreachable.contains(operation) {
            return Err(ExecError::Unreachable(format!(
                "{operation}: connection refused"
            )));
        }
        Ok(())
    }

    fn next_run(state: &mut BackendState) -> Result<TestRun, ExecError> {
        match state.runs.len() {
            0 => Err(ExecError::remote("run_tests", "no scripted test run")),
            1 => Ok(state.runs[0].clone()),
            _ => state
                .runs
                .pop_front()
                .ok_or_else(|| ExecError::remote("run_tests", "no scripted test run")),
        }
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn health(&self) -> Result<BackendHealth, ExecError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(BackendCall::Health);
        Self::check(&state, "health")?;
        Ok(BackendHealth {
            status: "healthy".to_string(),
            details: serde_json::Map::new(),
        })
    }

    async fn create_session(
        &self,
        repo_url: &str,
        _ecosystem: Ecosystem,
        _owner: Option<&str>,
    ) -> Result<CreatedSession, ExecError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(BackendCall::CreateSession(repo_url.to_string()));
        Self::check(&state, "create_session")?;
        if let Some(err) = state.create_error.clone() {
            return Err(err);
        }
        Ok(CreatedSession {
            session_id: state.session_id.clone(),
            location: format!("/workspace/{}", state.session_id),
        })
    }

    async fn release_session(&self, session_id: &str) -> Result<(), ExecError> {
        let mut state = self.inner.lock().unwrap();
        state
            .calls
            .push(BackendCall::ReleaseSession(session_id.to_string()));
        Self::check(&state, "release_session")
    }

    async fn run_tests(&self, _request: &TestRunRequest) -> Result<TestRun, ExecError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(BackendCall::RunTests);
        Self::check(&state, "run_tests")?;
        Self::next_run(&mut state)
    }

    async fn run_tests_streaming(
        &self,
        _request: &TestRunRequest,
    ) -> Result<TestRunStream, ExecError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(BackendCall::RunTestsStreaming);
        Self::check(&state, "run_tests_streaming")?;

        let (lines, result) = match state.stream_mode {
            StreamMode::Unavailable => {
                return Err(ExecError::remote("run_tests_streaming", "not supported"));
            }
            StreamMode::Lines => {
                let run = Self::next_run(&mut state)?;
                let lines: Vec<String> = run.raw_output.lines().map(str::to_string).collect();
                (lines, Some(run))
            }
            StreamMode::BreakMidStream | StreamMode::TimeoutMidStream => {
                let first = state
                    .runs
                    .front()
                    .and_then(|r| r.raw_output.lines().next())
                    .unwrap_or("collecting ...")
                    .to_string();
                (vec![first], None)
            }
        };
        let timed_out = state.stream_mode == StreamMode::TimeoutMidStream;

        let (line_tx, line_rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            let _ = line_tx.try_send(OutputLine {
                phase: OutputPhase::Test,
                line,
            });
        }
        // A dropped sender makes the result resolve to an error: the break.
        let (result_tx, result_rx) = oneshot::channel();
        if let Some(run) = result {
            let _ = result_tx.send(Ok(run));
        } else if timed_out {
            let _ = result_tx.send(Err(ExecError::Unreachable(
                "run_tests_streaming: operation timed out".into(),
            )));
        }
        Ok(TestRunStream {
            lines: line_rx,
            result: result_rx,
        })
    }

    async fn read_file(&self, _session_id: &str, path: &str) -> Result<Option<String>, ExecError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(BackendCall::ReadFile(path.to_string()));
        Self::check(&state, "read_file")?;
        Ok(state.files.get(path).cloned())
    }

    async fn apply_fix(&self, request: &FixRequest) -> Result<FixResponse, ExecError> {
        let mut state = self.inner.lock().unwrap();
        state
            .calls
            .push(BackendCall::ApplyFix(request.file_path.clone()));
        Self::check(&state, "apply_fix")?;
        state.applied.push(request.clone());

        let result = state.apply_results.pop_front().unwrap_or(Ok(FixResponse {
            success: true,
            message: "applied".to_string(),
        }));
        if matches!(&result, Ok(r) if r.success) {
            state
                .files
                .insert(request.file_path.clone(), request.content.clone());
        }
        result
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommitResponse, ExecError> {
        let mut state = self.inner.lock().unwrap();
        state.calls.push(BackendCall::Commit(request.file_path.clone()));
        Self::check(&state, "commit")?;
        state.commits.push(request.clone());
        state.commit_seq += 1;

        let seq = state.commit_seq;
        state.commit_results.pop_front().unwrap_or_else(|| {
            Ok(CommitResponse {
                success: true,
                commit_hash: Some(format!("c0ffee{seq:02}")),
                branch_name: Some(request.branch_name.clone()),
                message: "pushed".to_string(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedPatchGenerator
// ---------------------------------------------------------------------------

/// Patch generator replaying scripted replies and recording every prompt.
#[derive(Debug, Default)]
pub struct ScriptedPatchGenerator {
    replies: Mutex<VecDeque<Result<String, PatchGenerationError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedPatchGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, err: PatchGenerationError) -> Self {
        self.replies.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PatchGenerator for ScriptedPatchGenerator {
    async fn complete(&self, prompt: &str) -> Result<String, PatchGenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PatchGenerationError::NotConfigured("no scripted reply".into())))
    }
}

// ---------------------------------------------------------------------------
// RecordingPublisher
// ---------------------------------------------------------------------------

/// Publisher that records drafts and answers with a fixed outcome.
#[derive(Debug)]
pub struct RecordingPublisher {
    outcome: Result<PullRequest, PublishError>,
    drafts: Mutex<Vec<PullRequestDraft>>,
    tokens: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    pub fn succeeding(url: &str) -> Self {
        Self::with_outcome(Ok(PullRequest {
            url: url.to_string(),
            number: Some(1),
        }))
    }

    pub fn failing(err: PublishError) -> Self {
        Self::with_outcome(Err(err))
    }

    fn with_outcome(outcome: Result<PullRequest, PublishError>) -> Self {
        Self {
            outcome,
            drafts: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn drafts(&self) -> Vec<PullRequestDraft> {
        self.drafts.lock().unwrap().clone()
    }

    /// Tokens presented with each draft.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestPublisher for RecordingPublisher {
    async fn open(
        &self,
        draft: &PullRequestDraft,
        credential: &Credential,
    ) -> Result<PullRequest, PublishError> {
        self.drafts.lock().unwrap().push(draft.clone());
        self.tokens
            .lock()
            .unwrap()
            .push(credential.expose().to_string());
        self.outcome.clone()
    }
}
