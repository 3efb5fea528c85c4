//! Fix ledger, CI timeline and the terminal run result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::failure::{BugCategory, FailureRecord};

/// Outcome of one repair action, judged by the apply call alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixOutcome {
    Fixed,
    Failed,
}

/// Model-written explanation of an applied fix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixExplanation {
    pub root_cause: String,
    pub changes_made: String,
    pub impact: String,
}

/// Record of one repair action. Appended to the run's ledger, never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    /// Iteration whose test run produced the failure being repaired
    pub iteration: u32,
    /// File the patch was written to (after any redirect)
    pub file: String,
    pub category: BugCategory,
    pub line: Option<u32>,
    pub commit_message: String,
    pub outcome: FixOutcome,
    /// Message of the failure that triggered the repair
    pub failure_message: String,
    /// Human-readable summary of what happened
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<FixExplanation>,
}

impl FixAttempt {
    pub fn is_fixed(&self) -> bool {
        self.outcome == FixOutcome::Fixed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    Passed,
    Failed,
}

/// One CI timeline entry, recorded per completed test execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationEvent {
    /// 1-indexed
    pub iteration: u32,
    pub outcome: IterationOutcome,
    pub failure_count: usize,
    /// Fix attempts recorded before this test execution
    pub fixes_so_far: usize,
    pub timestamp: DateTime<Utc>,
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    PartialFix,
    Failed,
}

impl RunStatus {
    /// `passed` iff the last test execution passed; `partial_fix` iff not
    /// passed but at least one attempt was applied.
    pub fn derive(last_run_passed: bool, fixes: &[FixAttempt]) -> Self {
        if last_run_passed {
            RunStatus::Passed
        } else if fixes.iter().any(FixAttempt::is_fixed) {
            RunStatus::PartialFix
        } else {
            RunStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Passed => "passed",
            RunStatus::PartialFix => "partial_fix",
            RunStatus::Failed => "failed",
        }
    }
}

/// Outcome of committing one fixed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub file: String,
    pub commit_message: String,
    pub commit_hash: Option<String>,
    pub error: Option<String>,
}

impl CommitRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Deterministic score derived from commit count and elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base_score: u32,
    pub speed_bonus: u32,
    pub efficiency_penalty: u32,
    pub total_commits: u32,
    pub final_score: u32,
}

/// Terminal aggregate of one healing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub session_id: String,
    pub status: RunStatus,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub fixes: Vec<FixAttempt>,
    pub timeline: Vec<IterationEvent>,
    pub remaining_failures: Vec<FailureRecord>,
    /// Largest number of distinct failures reported by a single test run
    pub peak_failures: usize,
    pub commits: Vec<CommitRecord>,
    /// Hash of the last commit, omitted when any commit failed
    pub commit_hash: Option<String>,
    pub branch_name: Option<String>,
    pub pull_request_url: Option<String>,
    pub score: ScoreBreakdown,
    pub elapsed_seconds: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    pub fn fixed_count(&self) -> usize {
        self.fixes.iter().filter(|f| f.is_fixed()).count()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        match self.status {
            RunStatus::Passed => format!(
                "All tests passing after {} iteration(s); {} fix(es) applied",
                self.iteration_count,
                self.fixed_count()
            ),
            RunStatus::PartialFix => format!(
                "{} fix(es) applied but {} failure(s) remain after {} iteration(s)",
                self.fixed_count(),
                self.remaining_failures.len(),
                self.iteration_count
            ),
            RunStatus::Failed => format!(
                "Tests still failing after {} iteration(s); no fix could be applied",
                self.iteration_count
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(outcome: FixOutcome) -> FixAttempt {
        FixAttempt {
            iteration: 1,
            file: "src/app.py".into(),
            category: BugCategory::Logic,
            line: None,
            commit_message: String::new(),
            outcome,
            failure_message: "boom".into(),
            description: String::new(),
            explanation: None,
        }
    }

    #[test]
    fn status_follows_last_run_and_ledger() {
        assert_eq!(RunStatus::derive(true, &[]), RunStatus::Passed);
        assert_eq!(
            RunStatus::derive(false, &[attempt(FixOutcome::Failed)]),
            RunStatus::Failed
        );
        assert_eq!(
            RunStatus::derive(
                false,
                &[attempt(FixOutcome::Failed), attempt(FixOutcome::Fixed)]
            ),
            RunStatus::PartialFix
        );
    }

    #[test]
    fn explanation_omitted_from_json_when_absent() {
        let json = serde_json::to_value(attempt(FixOutcome::Fixed)).unwrap();
        assert!(json.get("explanation").is_none());
        assert_eq!(json["outcome"], "fixed");
    }
}
