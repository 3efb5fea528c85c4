//! Persisted run results.
//!
//! A finished run is written to `<dir>/<session_id>/result.json` with a
//! `result.digest` sidecar holding the SHA-256 of the JSON bytes. Reading
//! recomputes the digest and rejects tampered files.

use std::path::{Path, PathBuf};

use crate::domain::{ContentDigest, HealError, Result, RunResult};

const RESULT_FILE: &str = "result.json";
const DIGEST_FILE: &str = "result.digest";

/// Write `result` and its digest. Returns the path of `result.json`.
pub fn write_result(result: &RunResult, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&result.session_id);
    std::fs::create_dir_all(&run_dir)?;

    let json = serde_json::to_vec_pretty(result)?;
    let digest = ContentDigest::from_bytes(&json);

    let result_path = run_dir.join(RESULT_FILE);
    std::fs::write(&result_path, &json)?;
    std::fs::write(run_dir.join(DIGEST_FILE), digest.as_str().as_bytes())?;

    Ok(result_path)
}

/// Read and verify the result stored for `session_id`.
pub fn read_result(session_id: &str, dir: &Path) -> Result<RunResult> {
    let run_dir = dir.join(session_id);
    let json = std::fs::read(run_dir.join(RESULT_FILE))?;
    let expected = std::fs::read_to_string(run_dir.join(DIGEST_FILE))?;

    let actual = ContentDigest::from_bytes(&json);
    if actual.as_str() != expected.trim() {
        return Err(HealError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual: actual.as_str().to_string(),
        });
    }

    Ok(serde_json::from_slice(&json)?)
}

/// Render the pull-request body from the fix ledger.
pub fn render_fix_summary_md(result: &RunResult) -> String {
    let mut out = String::from("## AI Fix Summary\n\n");
    out.push_str("The following issues were identified and fixed by the AI agent:\n\n");

    for (i, fix) in result.fixes.iter().filter(|f| f.is_fixed()).enumerate() {
        out.push_str(&format!("### {}. Fix in `{}`\n", i + 1, fix.file));
        match &fix.explanation {
            Some(e) => {
                if !e.root_cause.is_empty() {
                    out.push_str(&format!("- **Root Cause:** {}\n", e.root_cause));
                }
                if !e.changes_made.is_empty() {
                    out.push_str(&format!("- **Changes Made:** {}\n", e.changes_made));
                }
                if !e.impact.is_empty() {
                    out.push_str(&format!("- **Impact:** {}\n", e.impact));
                }
            }
            None => out.push_str(&format!("- {}\n", fix.description)),
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "---\n{} · {} iteration(s) · score {}\n",
        result.summary(),
        result.iteration_count,
        result.score.final_score
    ));
    out
}
