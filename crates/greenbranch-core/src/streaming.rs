//! Streaming Transport: the healing loop with live progress events.
//!
//! [`StreamingLoop`] drives the same [`LoopState`] and repair step as the
//! blocking controller, but emits a [`StreamEvent`] for every phase change
//! and every output line. Test runs go through the backend's incremental call
//! and fall back to the blocking call, replaying its output, when that call
//! is unavailable or breaks.
//!
//! Delivery is fire-and-forget: once the consumer hangs up, events are
//! dropped and the run carries on unobserved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::controller::{
    IterationController, LoopConfig, LoopOutcome, LoopState, NextStep, ProgressSink,
};
use crate::domain::{Ecosystem, FixAttempt, IterationOutcome, Result, RunResult};
use crate::exec::{OutputPhase, TestRun, TestRunRequest};
use crate::obs;

/// Named phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Cloning,
    RunningTests,
    Verifying,
    Analyzing,
    Fixing,
    Committing,
    PrCreation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Start,
    Done,
    Error,
}

/// One event pushed to a streaming client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Step {
        step: Step,
        status: StepStatus,
    },
    Log {
        line: String,
        ts: DateTime<Utc>,
    },
    Iteration {
        iteration: u32,
        total: u32,
        status: IterationOutcome,
        failure_count: usize,
    },
    Fix {
        fix: FixAttempt,
    },
    Complete {
        result: Box<RunResult>,
    },
    Error {
        message: String,
        kind: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Producer half of a run's event channel.
///
/// Consuming it with [`EventSink::finish`] sends the single terminal event and
/// closes the channel, so no event can follow it.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
    detached: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self {
            tx,
            detached: false,
        }
    }

    /// Sink plus the receiver a client reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Sink with no consumer; every event is dropped.
    pub fn discard() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { tx, detached: true }
    }

    /// Whether the consumer has gone away.
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn emit(&mut self, event: StreamEvent) {
        if self.detached {
            return;
        }
        if self.tx.send(event).is_err() {
            debug!("event consumer disconnected; continuing unobserved");
            self.detached = true;
        }
    }

    pub fn step(&mut self, step: Step, status: StepStatus) {
        self.emit(StreamEvent::Step { step, status });
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.emit(StreamEvent::Log {
            line: line.into(),
            ts: Utc::now(),
        });
    }

    /// Emit the terminal event for `outcome` and close the channel.
    pub fn finish(mut self, outcome: &Result<RunResult>) {
        let event = match outcome {
            Ok(result) => StreamEvent::Complete {
                result: Box::new(result.clone()),
            },
            Err(err) => StreamEvent::Error {
                message: err.to_string(),
                kind: err.kind().to_string(),
            },
        };
        self.emit(event);
    }
}

impl ProgressSink for EventSink {
    fn note(&mut self, line: &str) {
        self.log(line);
    }
}

fn prefixed(phase: OutputPhase, line: &str) -> String {
    match phase {
        OutputPhase::Install => format!("  [install] {line}"),
        OutputPhase::Test => format!("  {line}"),
    }
}

// ---------------------------------------------------------------------------
// StreamingLoop
// ---------------------------------------------------------------------------

/// Healing loop that reports progress through an [`EventSink`].
#[derive(Clone)]
pub struct StreamingLoop {
    controller: IterationController,
}

impl StreamingLoop {
    pub fn new(controller: IterationController) -> Self {
        Self { controller }
    }

    /// Run one test execution, preferring the incremental call.
    async fn run_tests(&self, request: &TestRunRequest, sink: &mut EventSink) -> Result<TestRun> {
        let backend = self.controller.backend();

        match backend.run_tests_streaming(request).await {
            Ok(mut stream) => {
                while let Some(line) = stream.lines.recv().await {
                    sink.log(prefixed(line.phase, &line.line));
                }
                match stream.result.await {
                    Ok(Ok(run)) => return Ok(run),
                    Ok(Err(err)) => warn!(error = %err, "incremental run broke; falling back"),
                    Err(_) => warn!("incremental run ended without a result; falling back"),
                }
            }
            Err(err) => debug!(error = %err, "incremental run unavailable; falling back"),
        }

        let run = backend.run_tests(request).await?;
        for line in run.raw_output.lines() {
            sink.log(prefixed(OutputPhase::Test, line));
        }
        Ok(run)
    }

    /// Drive the loop to completion, emitting events as it goes.
    pub async fn run(
        &self,
        session_id: &str,
        ecosystem: Ecosystem,
        config: &LoopConfig,
        sink: &mut EventSink,
    ) -> Result<LoopOutcome> {
        config.validate()?;
        let request = config.test_request(session_id, ecosystem);
        let mut state = LoopState::new(config.max_iterations);

        loop {
            let step = if state.iteration() == 0 {
                Step::RunningTests
            } else {
                Step::Verifying
            };
            sink.step(step, StepStatus::Start);
            sink.log(format!(
                "▶ Iteration {}/{}: running tests…",
                state.iteration() + 1,
                config.max_iterations
            ));

            let run = match self.run_tests(&request, sink).await {
                Ok(run) => run,
                Err(err) => {
                    sink.step(step, StepStatus::Error);
                    return Err(err);
                }
            };
            let event = state.record_run(&run, ecosystem);
            obs::emit_iteration_finished(session_id, event);
            sink.emit(StreamEvent::Iteration {
                iteration: event.iteration,
                total: config.max_iterations,
                status: event.outcome,
                failure_count: event.failure_count,
            });

            let next = state.next_step();
            match &next {
                NextStep::Passed => sink.log("  ✓ All tests passing!"),
                _ => sink.log(format!("  ✗ {} error(s) found", state.failures().len())),
            }
            sink.step(step, StepStatus::Done);

            let failure = match next {
                NextStep::Fix(failure) => failure,
                _ => break,
            };

            sink.step(Step::Analyzing, StepStatus::Start);
            sink.log(format!(
                "  Error: {} in {}",
                failure.category,
                failure.location()
            ));
            if let Some(first) = failure.message.lines().next() {
                sink.log(format!("  {}", first.chars().take(200).collect::<String>()));
            }
            sink.step(Step::Analyzing, StepStatus::Done);

            sink.step(Step::Fixing, StepStatus::Start);
            let fix = match self
                .controller
                .repair(
                    session_id,
                    ecosystem,
                    config,
                    state.iteration(),
                    &failure,
                    state.last_output(),
                    &mut *sink,
                )
                .await
            {
                Ok(fix) => fix,
                Err(err) => {
                    sink.step(Step::Fixing, StepStatus::Error);
                    return Err(err);
                }
            };
            obs::emit_fix_recorded(session_id, &fix);
            sink.emit(StreamEvent::Fix { fix: fix.clone() });
            state.record_fix(fix);
            sink.step(Step::Fixing, StepStatus::Done);
        }

        Ok(state.finish())
    }
}
