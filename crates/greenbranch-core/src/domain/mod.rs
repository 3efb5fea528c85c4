//! Domain models for greenbranch.
//!
//! Canonical definitions for the core entities:
//! - `Ecosystem`: language/tooling family of the repository under repair
//! - `FailureRecord`: one classified test failure
//! - `FixAttempt`: one repair action and its outcome
//! - `IterationEvent`: one entry of the CI timeline
//! - `RunResult`: terminal aggregate of a run

pub mod digest;
pub mod ecosystem;
pub mod error;
pub mod failure;
pub mod run;

pub use digest::ContentDigest;
pub use ecosystem::Ecosystem;
pub use error::{HealError, Result};
pub use failure::{BugCategory, FailureRecord};
pub use run::{
    CommitRecord, FixAttempt, FixExplanation, FixOutcome, IterationEvent, IterationOutcome,
    RunResult, RunStatus, ScoreBreakdown,
};
