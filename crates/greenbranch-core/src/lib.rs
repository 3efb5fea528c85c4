//! greenbranch Core Library
//!
//! Healing-iteration engine: runs a repository's tests in a remote execution
//! backend, classifies the failures, asks a model for a replacement file,
//! applies it, and repeats until the tests pass or the iteration cap is hit.
//! Applied fixes are committed to a fix branch and optionally proposed as a
//! pull request.
//!
//! Entry point: [`RunOrchestrator`], blocking via [`RunOrchestrator::run`] or
//! with live [`StreamEvent`]s via [`RunOrchestrator::run_streaming`].

pub mod branch;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod domain;
pub mod exec;
pub mod fakes;
pub mod impl_paths;
pub mod llm;
pub mod obs;
pub mod orchestrator;
pub mod pr;
pub mod prompt;
pub mod reporting;
pub mod score;
pub mod streaming;
pub mod telemetry;

pub use domain::{
    BugCategory, CommitRecord, ContentDigest, Ecosystem, FailureRecord, FixAttempt,
    FixExplanation, FixOutcome, HealError, IterationEvent, IterationOutcome, Result, RunResult,
    RunStatus, ScoreBreakdown,
};

pub use branch::{branch_name_for, branch_name_for_team};
pub use classifier::{classify, classify_for};
pub use config::EngineConfig;
pub use controller::{IterationController, LoopConfig, LoopOutcome};
pub use exec::{
    Credential, ExecClientConfig, ExecError, ExecutionBackend, HttpExecutionClient, TestRun,
};
pub use llm::{OpenAiCompatClient, PatchGenerationError, PatchGenerator, PatchModelConfig};
pub use orchestrator::{RunOrchestrator, RunRequest, Team};
pub use pr::{GithubPullRequests, PullRequestDraft, PullRequestPublisher};
pub use reporting::{read_result, render_fix_summary_md, write_result};
pub use score::calculate_score;
pub use streaming::{EventSink, Step, StepStatus, StreamEvent, StreamingLoop};
pub use telemetry::init_tracing;

pub use greenbranch_state::{SessionId, SessionStatus, SessionStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
