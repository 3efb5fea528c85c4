//! Full runs: session lifecycle, commits, scoring, persistence and pull requests.

use std::sync::Arc;

use greenbranch_core::domain::{Ecosystem, HealError, RunStatus};
use greenbranch_core::exec::{CommitResponse, Credential, ExecError};
use greenbranch_core::fakes::{
    BackendCall, RecordingPublisher, ScriptedBackend, ScriptedPatchGenerator,
};
use greenbranch_core::orchestrator::{RunOrchestrator, RunRequest};
use greenbranch_core::pr::PublishError;
use greenbranch_core::reporting::read_result;
use greenbranch_state::fakes::MemorySessionStore;
use greenbranch_state::{NewSession, SessionId, SessionStatus, SessionStore};

const REPO: &str = "https://github.com/acme/calc.git";
const CALC_FAILURE: &str = "FAILED app/calc.py::divide - ZeroDivisionError: division by zero";
const SUB_FAILURE: &str = "FAILED app/ops.py::sub - AssertionError: assert 5 == -1";

struct Harness {
    backend: Arc<ScriptedBackend>,
    patcher: Arc<ScriptedPatchGenerator>,
    sessions: Arc<MemorySessionStore>,
}

impl Harness {
    fn new(backend: ScriptedBackend, patcher: ScriptedPatchGenerator) -> Self {
        Self {
            backend: Arc::new(backend),
            patcher: Arc::new(patcher),
            sessions: Arc::new(MemorySessionStore::new()),
        }
    }

    fn orchestrator(&self) -> RunOrchestrator {
        RunOrchestrator::new(
            self.backend.clone(),
            self.patcher.clone(),
            self.sessions.clone(),
        )
    }

    async fn status(&self, id: &str) -> SessionStatus {
        self.sessions.get(&SessionId::from(id)).await.unwrap().status
    }
}

fn one_fix() -> Harness {
    Harness::new(
        ScriptedBackend::new()
            .with_session_id("sess-1")
            .with_file("app/calc.py", "def divide(a, b):\n    return a / b\n")
            .failing_run(CALC_FAILURE)
            .passing_run("2 passed"),
        ScriptedPatchGenerator::new().reply("def divide(a, b):\n    return a / b if b else 0"),
    )
}

fn two_fix_backend() -> ScriptedBackend {
    ScriptedBackend::new()
        .with_session_id("sess-2")
        .with_file("app/calc.py", "x = 1\n")
        .with_file("app/ops.py", "y = 1\n")
        .failing_run(&format!("{CALC_FAILURE}\n{SUB_FAILURE}"))
        .failing_run(SUB_FAILURE)
        .passing_run("3 passed")
}

fn two_fix_patcher() -> ScriptedPatchGenerator {
    ScriptedPatchGenerator::new().reply("x = 2").reply("y = 2")
}

#[tokio::test]
async fn successful_run_commits_and_advances_session() {
    let h = one_fix();
    let result = h
        .orchestrator()
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap();

    assert_eq!(result.session_id, "sess-1");
    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(result.branch_name.as_deref(), Some("CALC_AI_Fix"));
    assert_eq!(result.commits.len(), 1);
    assert_eq!(result.commit_hash.as_deref(), Some("c0ffee01"));
    assert_eq!(result.score.total_commits, 1);
    assert_eq!(result.score.final_score, 110);
    assert!(result.finished_at >= result.started_at);

    let commits = h.backend.commits();
    assert_eq!(commits[0].file_path, "app/calc.py");
    assert_eq!(commits[0].branch_name, "CALC_AI_Fix");
    assert_eq!(commits[0].commit_message, "[AI-AGENT] Fix LOGIC in app/calc.py");
    assert!(commits[0].credential.is_none());

    assert_eq!(h.status("sess-1").await, SessionStatus::Committed);
}

#[tokio::test]
async fn commits_follow_ledger_order() {
    let h = Harness::new(two_fix_backend(), two_fix_patcher());
    let result = h
        .orchestrator()
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Passed);
    let files: Vec<&str> = result.commits.iter().map(|c| c.file.as_str()).collect();
    assert_eq!(files, vec!["app/calc.py", "app/ops.py"]);
    assert_eq!(result.commit_hash.as_deref(), Some("c0ffee02"));
    assert_eq!(result.peak_failures, 2);
}

#[tokio::test]
async fn failed_commit_is_skipped_and_hash_withheld() {
    let h = Harness::new(
        two_fix_backend().commit_result(Ok(CommitResponse {
            success: false,
            commit_hash: None,
            branch_name: None,
            message: "push rejected".into(),
        })),
        two_fix_patcher(),
    );

    let result = h
        .orchestrator()
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap();

    assert_eq!(result.commits.len(), 2);
    assert_eq!(result.commits[0].error.as_deref(), Some("push rejected"));
    assert!(result.commits[1].succeeded());
    assert!(result.commit_hash.is_none());
    assert_eq!(result.score.total_commits, 1);
    assert_eq!(h.status("sess-2").await, SessionStatus::Committed);
}

#[tokio::test]
async fn unreachable_commit_does_not_abort() {
    let h = Harness::new(
        ScriptedBackend::new()
            .with_file("app/calc.py", "x = 1\n")
            .failing_run(CALC_FAILURE)
            .passing_run("1 passed")
            .unreachable("commit"),
        ScriptedPatchGenerator::new().reply("x = 2"),
    );

    let result = h
        .orchestrator()
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Passed);
    assert!(!result.commits[0].succeeded());
    assert!(result.commit_hash.is_none());
    assert_eq!(result.score.total_commits, 0);
    assert_eq!(h.status("sess-1").await, SessionStatus::Fixed);
}

#[tokio::test]
async fn failed_run_marks_session_fix_failed() {
    let h = Harness::new(
        ScriptedBackend::new().failing_run("ImportError while loading conftest"),
        ScriptedPatchGenerator::new(),
    );

    let result = h
        .orchestrator()
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.commits.is_empty());
    assert!(result.branch_name.is_none());
    assert_eq!(h.status("sess-1").await, SessionStatus::FixFailed);
}

#[tokio::test]
async fn team_and_owner_shape_the_run() {
    let h = one_fix();
    let request = RunRequest::new(REPO, Ecosystem::Python)
        .with_team("Rift Organisers", "Dana O'Neil")
        .with_owner("dana");

    let result = h.orchestrator().run(request).await.unwrap();

    assert_eq!(
        result.branch_name.as_deref(),
        Some("RIFT_ORGANISERS_DANA_ONEIL_AI_Fix")
    );
    let owned = h.sessions.list_by_owner("dana").await.unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].session_id.as_str(), "sess-1");
    assert_eq!(owned[0].repo_location, "/workspace/sess-1");
}

#[tokio::test]
async fn session_creation_errors_are_classified() {
    let h = Harness::new(
        ScriptedBackend::new().unreachable("create_session"),
        ScriptedPatchGenerator::new(),
    );
    let err = h
        .orchestrator()
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap_err();
    assert!(matches!(err, HealError::BackendUnreachable(_)));

    let h = Harness::new(
        ScriptedBackend::new().create_error(ExecError::remote("create_session", "repo not found")),
        ScriptedPatchGenerator::new(),
    );
    let err = h
        .orchestrator()
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap_err();
    assert!(matches!(err, HealError::SessionCreation(_)));
    assert_eq!(err.status_code(), 502);
}

#[tokio::test]
async fn duplicate_session_id_is_rejected() {
    let h = one_fix();
    let orchestrator = h.orchestrator();
    orchestrator
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap();

    let err = orchestrator
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap_err();
    assert!(matches!(err, HealError::SessionAlreadyExists(_)));
}

#[tokio::test]
async fn store_rejection_releases_the_new_working_copy() {
    let h = one_fix();
    h.sessions
        .create(
            &SessionId::from("sess-1"),
            NewSession::new(REPO, "/workspace/other", "python"),
        )
        .await
        .unwrap();

    let err = h
        .orchestrator()
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap_err();
    assert!(matches!(err, HealError::SessionAlreadyExists(_)));

    assert_eq!(
        h.backend.calls(),
        vec![
            BackendCall::CreateSession(REPO.into()),
            BackendCall::ReleaseSession("sess-1".into()),
        ]
    );
    // The record that was already there is left alone.
    let record = h.sessions.get(&SessionId::from("sess-1")).await.unwrap();
    assert_eq!(record.repo_location, "/workspace/other");
}

#[tokio::test]
async fn result_is_persisted_with_digest() {
    let dir = tempfile::tempdir().unwrap();
    let h = one_fix();
    let result = h
        .orchestrator()
        .with_results_dir(dir.path())
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap();

    let stored = read_result("sess-1", dir.path()).unwrap();
    assert_eq!(stored.session_id, result.session_id);
    assert_eq!(stored.status, result.status);
    assert_eq!(stored.fixes, result.fixes);
    assert_eq!(stored.commits, result.commits);
    assert_eq!(stored.score, result.score);
    assert!(dir.path().join("sess-1").join("result.digest").exists());
}

#[tokio::test]
async fn pull_request_opened_from_fix_branch() {
    let h = one_fix();
    let publisher = Arc::new(RecordingPublisher::succeeding(
        "https://github.com/acme/calc/pull/7",
    ));
    let mut request =
        RunRequest::new(REPO, Ecosystem::Python).with_credential(Credential::new("ghp_token"));
    request.open_pull_request = true;

    let result = h
        .orchestrator()
        .with_publisher(publisher.clone())
        .run(request)
        .await
        .unwrap();

    assert_eq!(
        result.pull_request_url.as_deref(),
        Some("https://github.com/acme/calc/pull/7")
    );
    let drafts = publisher.drafts();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].repo, "acme/calc");
    assert_eq!(drafts[0].head, "CALC_AI_Fix");
    assert_eq!(drafts[0].base, "main");
    assert_eq!(publisher.tokens(), vec!["ghp_token".to_string()]);

    // The credential travels with each commit call too.
    assert_eq!(
        h.backend.commits()[0]
            .credential
            .as_ref()
            .map(Credential::expose),
        Some("ghp_token")
    );
}

#[tokio::test]
async fn pull_request_failure_is_not_fatal() {
    let h = one_fix();
    let publisher = Arc::new(RecordingPublisher::failing(PublishError::Rejected(
        "A pull request already exists".into(),
    )));
    let mut request =
        RunRequest::new(REPO, Ecosystem::Python).with_credential(Credential::new("ghp_token"));
    request.open_pull_request = true;

    let result = h
        .orchestrator()
        .with_publisher(publisher.clone())
        .run(request)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Passed);
    assert!(result.pull_request_url.is_none());
    assert_eq!(publisher.drafts().len(), 1);
}

#[tokio::test]
async fn pull_request_needs_a_credential() {
    let h = one_fix();
    let publisher = Arc::new(RecordingPublisher::succeeding("https://example.test/pr/1"));
    let mut request = RunRequest::new(REPO, Ecosystem::Python);
    request.open_pull_request = true;

    let result = h
        .orchestrator()
        .with_publisher(publisher.clone())
        .run(request)
        .await
        .unwrap();

    assert!(result.pull_request_url.is_none());
    assert!(publisher.drafts().is_empty());
}

#[tokio::test]
async fn release_drops_working_copy_and_record() {
    let h = one_fix();
    let orchestrator = h.orchestrator();
    orchestrator
        .run(RunRequest::new(REPO, Ecosystem::Python))
        .await
        .unwrap();

    orchestrator.release_session("sess-1").await.unwrap();

    assert!(h
        .backend
        .calls()
        .contains(&BackendCall::ReleaseSession("sess-1".into())));
    assert!(!h.sessions.exists(&SessionId::from("sess-1")).await.unwrap());

    let err = orchestrator.release_session("sess-1").await.unwrap_err();
    assert!(matches!(err, HealError::SessionNotFound(_)));
}

#[tokio::test]
async fn invalid_requests_never_reach_the_backend() {
    let h = one_fix();
    let err = h
        .orchestrator()
        .run(RunRequest::new(REPO, Ecosystem::Python).with_max_iterations(0))
        .await
        .unwrap_err();
    assert!(matches!(err, HealError::InvalidRequest(_)));

    let err = h
        .orchestrator()
        .run(RunRequest::new("  ", Ecosystem::Python))
        .await
        .unwrap_err();
    assert!(matches!(err, HealError::InvalidRequest(_)));
    assert!(h.backend.calls().is_empty());
}
