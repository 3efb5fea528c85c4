//! Structured run lifecycle events.
//!
//! Each `emit_*` function logs one line with a fixed `event` field so log
//! pipelines can follow a run without parsing messages. A run's work is
//! wrapped in the span returned by [`run_span`].

use tracing::{info, warn};

use crate::domain::{FixAttempt, IterationEvent, RunResult};

/// Span tagging everything logged during one run with its session id.
///
/// Attach it with `tracing::Instrument::instrument` so the run future stays `Send`.
pub fn run_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("greenbranch.run", session_id = %session_id)
}

pub fn emit_run_started(session_id: &str, repo_url: &str, max_iterations: u32) {
    info!(
        event = "run.started",
        session_id = %session_id,
        repo_url = %repo_url,
        max_iterations = max_iterations,
    );
}

pub fn emit_iteration_finished(session_id: &str, event: &IterationEvent) {
    info!(
        event = "run.iteration_finished",
        session_id = %session_id,
        iteration = event.iteration,
        outcome = ?event.outcome,
        failure_count = event.failure_count,
        fixes_so_far = event.fixes_so_far,
    );
}

pub fn emit_fix_recorded(session_id: &str, fix: &FixAttempt) {
    info!(
        event = "run.fix_recorded",
        session_id = %session_id,
        iteration = fix.iteration,
        file = %fix.file,
        category = %fix.category,
        fixed = fix.is_fixed(),
    );
}

pub fn emit_commit_finished(session_id: &str, file: &str, commit_hash: Option<&str>, ok: bool) {
    if ok {
        info!(
            event = "run.commit_finished",
            session_id = %session_id,
            file = %file,
            commit_hash = commit_hash.unwrap_or(""),
        );
    } else {
        warn!(event = "run.commit_failed", session_id = %session_id, file = %file);
    }
}

/// Run finished normally; `status` is passed, partial_fix or failed.
pub fn emit_run_finished(result: &RunResult) {
    info!(
        event = "run.finished",
        session_id = %result.session_id,
        status = result.status.as_str(),
        iterations = result.iteration_count,
        fixes = result.fixes.len(),
        elapsed_ms = (result.elapsed_seconds * 1000.0) as u64,
        score = result.score.final_score,
    );
}

/// Run aborted with a run-level error; no result was produced.
pub fn emit_run_aborted(session_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.aborted", session_id = %session_id, error = %error);
}
