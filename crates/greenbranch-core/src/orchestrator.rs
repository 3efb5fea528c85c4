//! Run Orchestrator: one healing run from session creation to result.
//!
//! Sequence: create the working copy and its session record, run the loop
//! (blocking or streaming), commit every applied fix in ledger order, score
//! the run, optionally open a pull request, then persist and return the
//! [`RunResult`]. Commit and pull-request failures are logged and skipped;
//! only session creation and loop aborts fail the run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use greenbranch_state::{NewSession, SessionId, SessionPatch, SessionStatus, SessionStore};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

use crate::branch::{branch_name_for, branch_name_for_team};
use crate::config::EngineConfig;
use crate::controller::{IterationController, LoopConfig, LoopOutcome};
use crate::domain::{
    CommitRecord, Ecosystem, FixAttempt, HealError, Result, RunResult, RunStatus,
};
use crate::exec::{CommitRequest, Credential, ExecError, ExecutionBackend};
use crate::llm::PatchGenerator;
use crate::obs;
use crate::pr::{PullRequestDraft, PullRequestPublisher};
use crate::reporting;
use crate::score::calculate_score;
use crate::streaming::{EventSink, Step, StepStatus, StreamEvent, StreamingLoop};

/// Team identity used to name the fix branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub name: String,
    pub leader: String,
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub repo_url: String,
    pub ecosystem: Ecosystem,
    pub owner: Option<String>,
    pub max_iterations: u32,
    /// Branch the tests run on and pull requests target
    pub base_branch: String,
    /// Explicit fix branch; derived from the team or repository otherwise
    pub branch_name: Option<String>,
    pub team: Option<Team>,
    pub install_command: Option<String>,
    pub test_command: Option<String>,
    /// Push credential, forwarded per call and never stored
    pub credential: Option<Credential>,
    pub open_pull_request: bool,
}

impl RunRequest {
    pub fn new(repo_url: impl Into<String>, ecosystem: Ecosystem) -> Self {
        Self {
            repo_url: repo_url.into(),
            ecosystem,
            owner: None,
            max_iterations: crate::config::DEFAULT_MAX_ITERATIONS,
            base_branch: "main".to_string(),
            branch_name: None,
            team: None,
            install_command: None,
            test_command: None,
            credential: None,
            open_pull_request: false,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_team(mut self, name: impl Into<String>, leader: impl Into<String>) -> Self {
        self.team = Some(Team {
            name: name.into(),
            leader: leader.into(),
        });
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Name of the branch fixes are committed to.
    pub fn fix_branch(&self) -> String {
        if let Some(name) = &self.branch_name {
            return name.clone();
        }
        match &self.team {
            Some(team) => branch_name_for_team(&team.name, &team.leader),
            None => branch_name_for(&self.repo_url),
        }
    }

    fn loop_config(&self, explain_fixes: bool) -> LoopConfig {
        LoopConfig {
            max_iterations: self.max_iterations,
            branch: self.base_branch.clone(),
            install_command: self.install_command.clone(),
            test_command: self.test_command.clone(),
            explain_fixes,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.repo_url.trim().is_empty() {
            return Err(HealError::InvalidRequest("repo_url is required".into()));
        }
        self.loop_config(false).validate()
    }
}

/// Drives complete runs. Cheap to clone; collaborators are shared.
#[derive(Clone)]
pub struct RunOrchestrator {
    controller: IterationController,
    sessions: Arc<dyn SessionStore>,
    publisher: Option<Arc<dyn PullRequestPublisher>>,
    results_dir: Option<PathBuf>,
    explain_fixes: bool,
}

impl RunOrchestrator {
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        patcher: Arc<dyn PatchGenerator>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            controller: IterationController::new(backend, patcher),
            sessions,
            publisher: None,
            results_dir: None,
            explain_fixes: false,
        }
    }

    /// Build the HTTP collaborators described by `config`.
    pub fn from_config(config: &EngineConfig, sessions: Arc<dyn SessionStore>) -> Result<Self> {
        config.validate()?;
        let backend = Arc::new(config.exec_client()?);
        let patcher = Arc::new(config.patch_client()?);
        let mut orchestrator =
            Self::new(backend, patcher, sessions).with_explain_fixes(config.explain_fixes);
        if let Some(dir) = &config.results_dir {
            orchestrator = orchestrator.with_results_dir(dir.clone());
        }
        Ok(orchestrator)
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn PullRequestPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = Some(dir.into());
        self
    }

    pub fn with_explain_fixes(mut self, explain: bool) -> Self {
        self.explain_fixes = explain;
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        self.controller.backend()
    }

    /// Run to completion with the blocking transport.
    pub async fn run(&self, request: RunRequest) -> Result<RunResult> {
        self.execute(request, &mut EventSink::discard(), false).await
    }

    /// Run with the streaming transport, reporting through `sink`.
    ///
    /// Exactly one terminal event is emitted, after which the channel closes.
    pub async fn run_streaming(&self, request: RunRequest, mut sink: EventSink) -> Result<RunResult> {
        let outcome = self.execute(request, &mut sink, true).await;
        sink.finish(&outcome);
        outcome
    }

    /// Start a streaming run in the background and return its event stream.
    ///
    /// Dropping the receiver stops observation only; the run still finishes.
    pub fn spawn_streaming_run(&self, request: RunRequest) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (sink, rx) = EventSink::channel();
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(err) = orchestrator.run_streaming(request, sink).await {
                debug!(error = %err, "background run aborted");
            }
        });
        rx
    }

    /// Release a working copy and remove its session record.
    pub async fn release_session(&self, session_id: &str) -> Result<()> {
        let id = SessionId::from(session_id);
        match self.backend().release_session(session_id).await {
            Ok(()) => {}
            Err(ExecError::Unreachable(detail)) => return Err(HealError::BackendUnreachable(detail)),
            Err(err) => warn!(session_id, error = %err, "backend kept no working copy"),
        }
        self.sessions.delete(&id).await?;
        Ok(())
    }

    async fn execute(
        &self,
        request: RunRequest,
        sink: &mut EventSink,
        streaming: bool,
    ) -> Result<RunResult> {
        request.validate()?;
        let started_at = Utc::now();
        let clock = Instant::now();

        sink.step(Step::Cloning, StepStatus::Start);
        sink.log(format!("▶ Cloning {}…", request.repo_url));
        let session_id = match self.open_session(&request).await {
            Ok(id) => id,
            Err(err) => {
                sink.log(format!("  ERROR: {err}"));
                sink.step(Step::Cloning, StepStatus::Error);
                return Err(err);
            }
        };
        sink.log(format!("  Session {session_id} ready"));
        sink.step(Step::Cloning, StepStatus::Done);

        let span = obs::run_span(session_id.as_str());
        self.drive(&session_id, &request, sink, streaming, started_at, clock)
            .instrument(span)
            .await
    }

    async fn open_session(&self, request: &RunRequest) -> Result<SessionId> {
        let created = self
            .backend()
            .create_session(&request.repo_url, request.ecosystem, request.owner.as_deref())
            .await
            .map_err(|err| match err {
                ExecError::Unreachable(detail) => HealError::BackendUnreachable(detail),
                other => HealError::SessionCreation(other.to_string()),
            })?;

        let id = SessionId::from(created.session_id);
        let mut session = NewSession::new(
            &request.repo_url,
            created.location,
            request.ecosystem.as_str(),
        );
        if let Some(owner) = &request.owner {
            session = session.with_owner(owner);
        }
        if let Err(err) = self.sessions.create(&id, session).await {
            // No record means no later release path for this working copy.
            if let Err(release) = self.backend().release_session(id.as_str()).await {
                warn!(session_id = %id, error = %release, "orphaned working copy not released");
            }
            return Err(err.into());
        }
        Ok(id)
    }

    /// Move the session forward; regressions and store failures are logged.
    async fn advance(&self, id: &SessionId, next: SessionStatus) {
        match self.sessions.get(id).await {
            Ok(record) if record.status.can_advance_to(next) => {
                if let Err(err) = self.sessions.update(id, SessionPatch::status(next)).await {
                    warn!(error = %err, status = %next, "session status not updated");
                }
            }
            Ok(record) => debug!(from = %record.status, to = %next, "status regression refused"),
            Err(err) => warn!(error = %err, status = %next, "session unavailable for status update"),
        }
    }

    async fn drive(
        &self,
        session_id: &SessionId,
        request: &RunRequest,
        sink: &mut EventSink,
        streaming: bool,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> Result<RunResult> {
        let sid = session_id.as_str();
        obs::emit_run_started(sid, &request.repo_url, request.max_iterations);
        self.advance(session_id, SessionStatus::Running).await;

        let config = request.loop_config(self.explain_fixes);
        let outcome: Result<LoopOutcome> = if streaming {
            StreamingLoop::new(self.controller.clone())
                .run(sid, request.ecosystem, &config, sink)
                .await
        } else {
            self.controller.run(sid, request.ecosystem, &config).await
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                obs::emit_run_aborted(sid, &err);
                return Err(err);
            }
        };

        let settled = if outcome.status == RunStatus::Failed {
            SessionStatus::FixFailed
        } else {
            SessionStatus::Fixed
        };
        self.advance(session_id, settled).await;

        let branch = request.fix_branch();
        let commits = self
            .commit_fixes(sid, &outcome.fixes, &branch, request.credential.as_ref(), sink)
            .await;
        let committed = commits.iter().filter(|c| c.succeeded()).count();
        if committed > 0 {
            self.advance(session_id, SessionStatus::Committed).await;
        }
        let commit_hash = if !commits.is_empty() && committed == commits.len() {
            commits.last().and_then(|c| c.commit_hash.clone())
        } else {
            None
        };

        let elapsed_seconds = clock.elapsed().as_secs_f64();
        let mut result = RunResult {
            session_id: sid.to_string(),
            status: outcome.status,
            iteration_count: outcome.iteration_count,
            max_iterations: outcome.max_iterations,
            fixes: outcome.fixes,
            timeline: outcome.timeline,
            remaining_failures: outcome.remaining_failures,
            peak_failures: outcome.peak_failures,
            branch_name: (!commits.is_empty()).then_some(branch),
            commits,
            commit_hash,
            pull_request_url: None,
            score: calculate_score(committed as u32, elapsed_seconds),
            elapsed_seconds,
            started_at,
            finished_at: started_at,
        };

        if request.open_pull_request {
            result.pull_request_url = self.open_pull_request(request, &result, sink).await;
        }
        result.finished_at = Utc::now();

        if let Some(dir) = &self.results_dir {
            match reporting::write_result(&result, dir) {
                Ok(path) => info!(path = %path.display(), "result persisted"),
                Err(err) => warn!(error = %err, "result not persisted"),
            }
        }

        sink.log(format!(
            "{} Pipeline complete in {:.1}s: {} fix(es), {} commit(s)",
            if result.passed() { "✓" } else { "✗" },
            result.elapsed_seconds,
            result.fixed_count(),
            committed
        ));
        obs::emit_run_finished(&result);
        Ok(result)
    }

    async fn commit_fixes(
        &self,
        session_id: &str,
        fixes: &[FixAttempt],
        branch: &str,
        credential: Option<&Credential>,
        sink: &mut EventSink,
    ) -> Vec<CommitRecord> {
        let fixed: Vec<&FixAttempt> = fixes.iter().filter(|f| f.is_fixed()).collect();
        if fixed.is_empty() {
            return Vec::new();
        }

        sink.step(Step::Committing, StepStatus::Start);
        sink.log(format!("▶ Committing {} fix(es) to {branch}…", fixed.len()));

        let mut records = Vec::with_capacity(fixed.len());
        for fix in fixed {
            sink.log(format!("  $ git commit -m \"{}\"", fix.commit_message));
            let request = CommitRequest {
                session_id: session_id.to_string(),
                file_path: fix.file.clone(),
                commit_message: fix.commit_message.clone(),
                branch_name: branch.to_string(),
                credential: credential.cloned(),
            };

            let (commit_hash, error) = match self.backend().commit(&request).await {
                Ok(response) if response.success => (response.commit_hash, None),
                Ok(response) => (None, Some(response.message)),
                Err(err) => (None, Some(err.to_string())),
            };
            match (&commit_hash, &error) {
                (_, Some(err)) => sink.log(format!("  ✗ commit failed: {err}")),
                (Some(hash), None) => {
                    sink.log(format!("  ✓ committed ({})", hash.chars().take(8).collect::<String>()))
                }
                (None, None) => sink.log("  ✓ committed"),
            }
            obs::emit_commit_finished(session_id, &fix.file, commit_hash.as_deref(), error.is_none());

            records.push(CommitRecord {
                file: fix.file.clone(),
                commit_message: fix.commit_message.clone(),
                commit_hash,
                error,
            });
        }

        sink.step(Step::Committing, StepStatus::Done);
        records
    }

    async fn open_pull_request(
        &self,
        request: &RunRequest,
        result: &RunResult,
        sink: &mut EventSink,
    ) -> Option<String> {
        let (Some(publisher), Some(credential)) = (&self.publisher, &request.credential) else {
            debug!("pull request skipped: no publisher or credential");
            return None;
        };
        let draft = PullRequestDraft::for_run(result, &request.repo_url, &request.base_branch)?;

        sink.step(Step::PrCreation, StepStatus::Start);
        sink.log("▶ Creating Pull Request…");
        match publisher.open(&draft, credential).await {
            Ok(pr) => {
                sink.log(format!("  ✓ PR Created: {}", pr.url));
                sink.step(Step::PrCreation, StepStatus::Done);
                Some(pr.url)
            }
            Err(err) => {
                warn!(error = %err, "pull request not opened");
                sink.log(format!("  ✗ PR Failed: {err}"));
                sink.step(Step::PrCreation, StepStatus::Error);
                None
            }
        }
    }
}
