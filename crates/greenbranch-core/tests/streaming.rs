//! Streaming transport: event order, fallback, and equivalence with the
//! blocking transport.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use greenbranch_core::domain::{Ecosystem, RunResult, RunStatus};
use greenbranch_core::exec::ExecError;
use greenbranch_core::fakes::{BackendCall, ScriptedBackend, ScriptedPatchGenerator, StreamMode};
use greenbranch_core::orchestrator::{RunOrchestrator, RunRequest};
use greenbranch_core::streaming::{EventSink, Step, StepStatus, StreamEvent};
use greenbranch_state::fakes::MemorySessionStore;

const CALC_FAILURE: &str = "\
collected 2 items
FAILED app/calc.py::divide - ZeroDivisionError: division by zero
1 failed, 1 passed in 0.02s";

fn scripted(mode: StreamMode) -> Arc<ScriptedBackend> {
    Arc::new(
        ScriptedBackend::new()
            .with_session_id("sess-stream")
            .with_file("app/calc.py", "def divide(a, b):\n    return a / b\n")
            .failing_run(CALC_FAILURE)
            .passing_run("collected 2 items\n2 passed in 0.01s")
            .stream_mode(mode),
    )
}

fn patcher() -> Arc<ScriptedPatchGenerator> {
    Arc::new(
        ScriptedPatchGenerator::new().reply("def divide(a, b):\n    return a / b if b else 0"),
    )
}

fn orchestrator(backend: Arc<ScriptedBackend>) -> RunOrchestrator {
    RunOrchestrator::new(backend, patcher(), Arc::new(MemorySessionStore::new()))
}

fn request() -> RunRequest {
    RunRequest::new("https://github.com/acme/calc.git", Ecosystem::Python).with_max_iterations(4)
}

async fn collect(mut rx: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn log_lines(events: &[StreamEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Log { line, .. } => Some(line.as_str()),
            _ => None,
        })
        .collect()
}

/// Clear wall-clock fields so two runs of the same script compare equal.
fn normalized(mut result: RunResult) -> RunResult {
    let epoch = Utc.timestamp_opt(0, 0).unwrap();
    result.started_at = epoch;
    result.finished_at = epoch;
    result.elapsed_seconds = 0.0;
    for event in &mut result.timeline {
        event.timestamp = epoch;
    }
    result
}

#[tokio::test]
async fn streaming_and_blocking_results_match() {
    let blocking = orchestrator(scripted(StreamMode::Unavailable))
        .run(request())
        .await
        .unwrap();

    let (sink, rx) = EventSink::channel();
    let streamed = orchestrator(scripted(StreamMode::Lines))
        .run_streaming(request(), sink)
        .await
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(blocking.status, RunStatus::Passed);
    assert_eq!(normalized(blocking), normalized(streamed.clone()));

    match events.last() {
        Some(StreamEvent::Complete { result }) => assert_eq!(**result, streamed),
        other => panic!("expected a complete event, got {other:?}"),
    }
}

#[tokio::test]
async fn events_follow_the_run() {
    let backend = scripted(StreamMode::Lines);
    let events = collect(orchestrator(backend).spawn_streaming_run(request())).await;

    let steps: Vec<(Step, StepStatus)> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Step { step, status } => Some((*step, *status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        steps,
        vec![
            (Step::Cloning, StepStatus::Start),
            (Step::Cloning, StepStatus::Done),
            (Step::RunningTests, StepStatus::Start),
            (Step::RunningTests, StepStatus::Done),
            (Step::Analyzing, StepStatus::Start),
            (Step::Analyzing, StepStatus::Done),
            (Step::Fixing, StepStatus::Start),
            (Step::Fixing, StepStatus::Done),
            (Step::Verifying, StepStatus::Start),
            (Step::Verifying, StepStatus::Done),
            (Step::Committing, StepStatus::Start),
            (Step::Committing, StepStatus::Done),
        ]
    );

    let iterations: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Iteration { failure_count, .. } => Some(*failure_count),
            _ => None,
        })
        .collect();
    assert_eq!(iterations, vec![1, 0]);

    let fixes = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Fix { .. }))
        .count();
    assert_eq!(fixes, 1);

    let logs = log_lines(&events);
    assert!(logs.contains(&"  2 passed in 0.01s"));
    assert!(logs.iter().any(|l| l.starts_with("  $ git commit -m")));
}

#[tokio::test]
async fn exactly_one_terminal_event_and_it_is_last() {
    let rx = orchestrator(scripted(StreamMode::Lines)).spawn_streaming_run(request());
    let events = collect(rx).await;
    let terminal = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal, 1);
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn unavailable_stream_replays_blocking_output() {
    let backend = scripted(StreamMode::Unavailable);
    let events = collect(orchestrator(backend.clone()).spawn_streaming_run(request())).await;

    let logs = log_lines(&events);
    assert!(logs.contains(&"  FAILED app/calc.py::divide - ZeroDivisionError: division by zero"));
    assert!(logs.contains(&"  2 passed in 0.01s"));

    let calls = backend.calls();
    let streaming = calls
        .iter()
        .filter(|c| **c == BackendCall::RunTestsStreaming)
        .count();
    let blocking = calls.iter().filter(|c| **c == BackendCall::RunTests).count();
    assert_eq!(streaming, 2);
    assert_eq!(blocking, 2);
}

#[tokio::test]
async fn broken_stream_falls_back_without_losing_the_run() {
    let backend = scripted(StreamMode::BreakMidStream);
    let (sink, rx) = EventSink::channel();
    let result = orchestrator(backend.clone())
        .run_streaming(request(), sink)
        .await
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(result.iteration_count, 2);
    assert_eq!(result.fixes.len(), 1);

    // The partial line streamed before the break is still reported.
    let logs = log_lines(&events);
    assert!(logs.contains(&"  collected 2 items"));
    assert!(matches!(events.last(), Some(StreamEvent::Complete { .. })));

    let calls = backend.calls();
    let first_stream = calls
        .iter()
        .position(|c| *c == BackendCall::RunTestsStreaming)
        .unwrap();
    assert_eq!(calls[first_stream + 1], BackendCall::RunTests);
}

#[tokio::test]
async fn timed_out_stream_replays_the_blocking_run() {
    let backend = scripted(StreamMode::TimeoutMidStream);
    let (sink, rx) = EventSink::channel();
    let result = orchestrator(backend.clone())
        .run_streaming(request(), sink)
        .await
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(result.iteration_count, 2);

    // The line seen before the timeout, then the whole blocking output.
    let logs = log_lines(&events);
    let first = logs.iter().position(|l| *l == "  collected 2 items").unwrap();
    assert!(logs[first + 1..].contains(&"  FAILED app/calc.py::divide - ZeroDivisionError: division by zero"));
    assert!(logs.contains(&"  2 passed in 0.01s"));

    let calls = backend.calls();
    let streaming = calls
        .iter()
        .filter(|c| **c == BackendCall::RunTestsStreaming)
        .count();
    let blocking = calls.iter().filter(|c| **c == BackendCall::RunTests).count();
    assert_eq!(streaming, 2);
    assert_eq!(blocking, 2);
}

#[tokio::test]
async fn abort_ends_with_an_error_event() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .stream_mode(StreamMode::Lines)
            .unreachable("run_tests_streaming")
            .unreachable("run_tests"),
    );
    let events = collect(orchestrator(backend).spawn_streaming_run(request())).await;

    match events.last() {
        Some(StreamEvent::Error { kind, .. }) => assert_eq!(kind, "backend_unreachable"),
        other => panic!("expected an error event, got {other:?}"),
    }
    assert!(events.contains(&StreamEvent::Step {
        step: Step::RunningTests,
        status: StepStatus::Error,
    }));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn session_creation_failure_is_reported() {
    let backend = Arc::new(
        ScriptedBackend::new().create_error(ExecError::remote("create_session", "clone failed")),
    );
    let events = collect(orchestrator(backend).spawn_streaming_run(request())).await;

    assert!(events.contains(&StreamEvent::Step {
        step: Step::Cloning,
        status: StepStatus::Error,
    }));
    match events.last() {
        Some(StreamEvent::Error { kind, message }) => {
            assert_eq!(kind, "session_creation");
            assert!(message.contains("clone failed"));
        }
        other => panic!("expected an error event, got {other:?}"),
    }
}

#[tokio::test]
async fn disconnected_consumer_does_not_stop_the_run() {
    let backend = scripted(StreamMode::Lines);
    let (sink, rx) = EventSink::channel();
    drop(rx);

    let result = orchestrator(backend.clone())
        .run_streaming(request(), sink)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(backend.commits().len(), 1);
    assert!(result.commit_hash.is_some());
}
