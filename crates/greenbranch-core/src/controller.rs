//! Iteration Controller: the bounded test → select → fix loop.
//!
//! States: `RunTests → SelectFailure → {Fix → RunTests | Stop}`. The cap is
//! checked before `Fix`, so the last permitted test run is never followed by
//! a repair. [`LoopState`] holds the ledger and timeline; [`IterationController::repair`]
//! is the fix step. Both are shared with the streaming transport, which drives
//! its own copy of the loop.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::classifier;
use crate::domain::{
    Ecosystem, FailureRecord, FixAttempt, FixExplanation, FixOutcome, HealError, IterationEvent,
    IterationOutcome, Result, RunStatus,
};
use crate::exec::{ExecError, ExecutionBackend, FixRequest, TestRun, TestRunRequest};
use crate::impl_paths::{guess_implementation_paths, is_test_path};
use crate::llm::{strip_code_fences, PatchGenerationError, PatchGenerator};
use crate::obs;
use crate::prompt::{self, RepairContext};

/// Per-run loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub branch: String,
    pub install_command: Option<String>,
    pub test_command: Option<String>,
    /// Ask the model to explain each applied fix
    pub explain_fixes: bool,
}

impl LoopConfig {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            branch: "main".to_string(),
            install_command: None,
            test_command: None,
            explain_fixes: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(HealError::InvalidRequest(
                "max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn test_request(&self, session_id: &str, ecosystem: Ecosystem) -> TestRunRequest {
        TestRunRequest {
            session_id: session_id.to_string(),
            ecosystem,
            branch: self.branch.clone(),
            install_command: Some(
                self.install_command
                    .clone()
                    .unwrap_or_else(|| ecosystem.default_install_command().to_string()),
            ),
            test_command: Some(
                self.test_command
                    .clone()
                    .unwrap_or_else(|| ecosystem.default_test_command().to_string()),
            ),
        }
    }
}

/// Receives human-readable progress lines from the fix step.
pub trait ProgressSink: Send {
    fn note(&mut self, line: &str);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct Silent;

impl ProgressSink for Silent {
    fn note(&mut self, _line: &str) {}
}

// ---------------------------------------------------------------------------
// Loop state
// ---------------------------------------------------------------------------

/// What the loop does after a test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// The last run passed
    Passed,
    /// The run failed but nothing could be classified
    NoFailures,
    /// The iteration cap was reached
    BudgetExhausted,
    /// Repair the first classified failure
    Fix(FailureRecord),
}

/// Ledger, timeline and the latest classification of one run.
#[derive(Debug, Clone)]
pub struct LoopState {
    max_iterations: u32,
    iteration: u32,
    fixes: Vec<FixAttempt>,
    timeline: Vec<IterationEvent>,
    failures: Vec<FailureRecord>,
    peak_failures: usize,
    last_passed: bool,
    last_output: String,
}

impl LoopState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations,
            iteration: 0,
            fixes: Vec::new(),
            timeline: Vec::new(),
            failures: Vec::new(),
            peak_failures: 0,
            last_passed: false,
            last_output: String::new(),
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn fixes(&self) -> &[FixAttempt] {
        &self.fixes
    }

    pub fn last_output(&self) -> &str {
        &self.last_output
    }

    /// Classify a finished test run and append its timeline entry.
    ///
    /// A run the backend reports as successful carries no failures.
    pub fn record_run(&mut self, run: &TestRun, ecosystem: Ecosystem) -> &IterationEvent {
        self.iteration += 1;
        self.last_passed = run.succeeded();
        self.failures = if self.last_passed {
            Vec::new()
        } else {
            classifier::classify_for(&run.raw_output, ecosystem)
        };
        self.last_output = run.raw_output.clone();
        self.peak_failures = self.peak_failures.max(self.failures.len());

        self.timeline.push(IterationEvent {
            iteration: self.iteration,
            outcome: if self.last_passed {
                IterationOutcome::Passed
            } else {
                IterationOutcome::Failed
            },
            failure_count: self.failures.len(),
            fixes_so_far: self.fixes.len(),
            timestamp: Utc::now(),
        });
        &self.timeline[self.timeline.len() - 1]
    }

    pub fn next_step(&self) -> NextStep {
        if self.last_passed {
            NextStep::Passed
        } else if self.failures.is_empty() {
            NextStep::NoFailures
        } else if self.iteration >= self.max_iterations {
            NextStep::BudgetExhausted
        } else {
            NextStep::Fix(self.failures[0].clone())
        }
    }

    pub fn record_fix(&mut self, fix: FixAttempt) {
        self.fixes.push(fix);
    }

    pub fn finish(self) -> LoopOutcome {
        LoopOutcome {
            status: RunStatus::derive(self.last_passed, &self.fixes),
            iteration_count: self.iteration,
            max_iterations: self.max_iterations,
            fixes: self.fixes,
            timeline: self.timeline,
            remaining_failures: self.failures,
            peak_failures: self.peak_failures,
        }
    }
}

/// Everything the loop produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub status: RunStatus,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub fixes: Vec<FixAttempt>,
    pub timeline: Vec<IterationEvent>,
    pub remaining_failures: Vec<FailureRecord>,
    pub peak_failures: usize,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Runs the healing loop against an execution backend and a patch generator.
#[derive(Clone)]
pub struct IterationController {
    backend: Arc<dyn ExecutionBackend>,
    patcher: Arc<dyn PatchGenerator>,
}

/// Abort the run on transport failure, otherwise hand the error back.
fn abort_if_unreachable(err: ExecError) -> std::result::Result<ExecError, HealError> {
    if err.is_unreachable() {
        Err(err.into())
    } else {
        Ok(err)
    }
}

impl IterationController {
    pub fn new(backend: Arc<dyn ExecutionBackend>, patcher: Arc<dyn PatchGenerator>) -> Self {
        Self { backend, patcher }
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    /// Run the blocking loop to completion.
    ///
    /// Any error from the test run aborts the whole run.
    #[instrument(skip(self, config), fields(max_iterations = config.max_iterations))]
    pub async fn run(
        &self,
        session_id: &str,
        ecosystem: Ecosystem,
        config: &LoopConfig,
    ) -> Result<LoopOutcome> {
        config.validate()?;
        let request = config.test_request(session_id, ecosystem);
        let mut state = LoopState::new(config.max_iterations);

        loop {
            let run = self.backend.run_tests(&request).await?;
            let event = state.record_run(&run, ecosystem);
            obs::emit_iteration_finished(session_id, event);

            match state.next_step() {
                NextStep::Fix(failure) => {
                    let fix = self
                        .repair(
                            session_id,
                            ecosystem,
                            config,
                            state.iteration(),
                            &failure,
                            state.last_output(),
                            &mut Silent,
                        )
                        .await?;
                    obs::emit_fix_recorded(session_id, &fix);
                    state.record_fix(fix);
                }
                step => {
                    debug!(?step, iteration = state.iteration(), "loop stopped");
                    break;
                }
            }
        }

        Ok(state.finish())
    }

    async fn read(&self, session_id: &str, path: &str) -> Result<Option<String>> {
        match self.backend.read_file(session_id, path).await {
            Ok(content) => Ok(content.filter(|c| !c.is_empty())),
            Err(err) => {
                let err = abort_if_unreachable(err)?;
                debug!(path, error = %err, "file unreadable");
                Ok(None)
            }
        }
    }

    /// Repair one failure and return the attempt to append to the ledger.
    ///
    /// Model failures and rejected applies become a `failed` attempt; only an
    /// unreachable backend aborts.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, config, failure, raw_output, sink), fields(file = %failure.file))]
    pub async fn repair(
        &self,
        session_id: &str,
        ecosystem: Ecosystem,
        config: &LoopConfig,
        iteration: u32,
        failure: &FailureRecord,
        raw_output: &str,
        sink: &mut dyn ProgressSink,
    ) -> Result<FixAttempt> {
        let file_content = self.read(session_id, &failure.file).await?;
        sink.note(&format!(
            "  Reading {} ({} chars)",
            failure.file,
            file_content.as_deref().map_or(0, str::len)
        ));

        let is_test = is_test_path(&failure.file);
        let mut implementation: Option<(String, String)> = None;
        if is_test {
            sink.note("  Test file detected, locating implementation…");
            let candidates =
                guess_implementation_paths(&failure.file, file_content.as_deref().unwrap_or(""));
            for path in candidates {
                if let Some(content) = self.read(session_id, &path).await? {
                    sink.note(&format!("  Found implementation: {path}"));
                    implementation = Some((path, content));
                    break;
                }
            }
        }

        let ctx = RepairContext {
            failure,
            ecosystem,
            file_content: file_content.as_deref(),
            implementation: implementation
                .as_ref()
                .map(|(p, c)| (p.as_str(), c.as_str())),
            raw_output,
            is_test,
        };
        let repair_prompt = prompt::build_repair_prompt(&ctx);

        sink.note("  Calling AI model…");
        let reply = match self.patcher.complete(&repair_prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "patch generation failed");
                sink.note(&format!("  ERROR: patch generation failed: {err}"));
                return Ok(failed_attempt(iteration, failure, &failure.file, &err));
            }
        };

        let (target, patch) = match prompt::split_redirect(&reply).filter(|_| is_test) {
            Some(redirect) => {
                sink.note(&format!("  Redirected fix → {}", redirect.path));
                (redirect.path, redirect.content)
            }
            None => (failure.file.clone(), strip_code_fences(&reply)),
        };
        if patch.is_empty() {
            sink.note("  ERROR: model returned an empty patch");
            return Ok(failed_attempt(
                iteration,
                failure,
                &target,
                &PatchGenerationError::Empty,
            ));
        }

        // Every file written must have been read first.
        let original = if target == failure.file {
            file_content.clone()
        } else {
            match &implementation {
                Some((path, content)) if *path == target => Some(content.clone()),
                _ => self.read(session_id, &target).await?,
            }
        };

        sink.note(&format!("  Applying fix to {target}…"));
        let request = FixRequest {
            session_id: session_id.to_string(),
            file_path: target.clone(),
            content: patch.clone(),
            install_command: config.install_command.clone(),
            test_command: config.test_command.clone(),
        };
        let applied = match self.backend.apply_fix(&request).await {
            Ok(response) => {
                if !response.success {
                    debug!(message = %response.message, "backend rejected the fix");
                }
                response.success
            }
            Err(err) => {
                let err = abort_if_unreachable(err)?;
                sink.note(&format!("  ERROR: apply failed: {err}"));
                false
            }
        };

        let explanation = if applied && config.explain_fixes {
            Some(
                self.explain(failure, &target, original.as_deref().unwrap_or(""), &patch)
                    .await,
            )
        } else {
            None
        };

        sink.note(if applied {
            "  ✓ Fix applied"
        } else {
            "  ✗ Fix failed"
        });
        info!(target = %target, applied, "repair attempted");

        Ok(FixAttempt {
            iteration,
            file: target.clone(),
            category: failure.category,
            line: failure.line,
            commit_message: prompt::commit_message(
                &target,
                failure.category,
                failure.line,
                explanation.as_ref(),
            ),
            outcome: if applied {
                FixOutcome::Fixed
            } else {
                FixOutcome::Failed
            },
            failure_message: failure.message.clone(),
            description: prompt::describe_fix(failure, &target, explanation.as_ref()),
            explanation,
        })
    }

    async fn explain(
        &self,
        failure: &FailureRecord,
        file: &str,
        original: &str,
        fixed: &str,
    ) -> FixExplanation {
        let explain_prompt = prompt::build_explanation_prompt(failure, file, original, fixed);
        match self.patcher.complete(&explain_prompt).await {
            Ok(reply) => prompt::parse_explanation(&reply)
                .unwrap_or_else(|| prompt::fallback_explanation(failure, file)),
            Err(err) => {
                warn!(error = %err, "fix explanation failed");
                prompt::fallback_explanation(failure, file)
            }
        }
    }
}

fn failed_attempt(
    iteration: u32,
    failure: &FailureRecord,
    file: &str,
    err: &PatchGenerationError,
) -> FixAttempt {
    FixAttempt {
        iteration,
        file: file.to_string(),
        category: failure.category,
        line: failure.line,
        commit_message: String::new(),
        outcome: FixOutcome::Failed,
        failure_message: failure.message.clone(),
        description: format!("AI could not generate a fix: {err}"),
        explanation: None,
    }
}
