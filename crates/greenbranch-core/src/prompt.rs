//! Repair and explanation prompts, and parsing of the model's replies.

use serde::Deserialize;

use crate::domain::{BugCategory, Ecosystem, FailureRecord, FixExplanation};

/// First-line marker that moves a patch onto another file.
pub const REDIRECT_MARKER: &str = "TARGET_FILE:";

const OUTPUT_LIMIT: usize = 3000;

/// Everything the repair prompt is built from.
#[derive(Debug, Clone)]
pub struct RepairContext<'a> {
    pub failure: &'a FailureRecord,
    pub ecosystem: Ecosystem,
    /// Current content of the failing file, if it could be read
    pub file_content: Option<&'a str>,
    /// `(path, content)` of the implementation behind a failing test
    pub implementation: Option<(&'a str, &'a str)>,
    pub raw_output: &'a str,
    pub is_test: bool,
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn extension(path: &str) -> &str {
    path.rsplit_once('.').map_or("", |(_, ext)| ext)
}

fn fenced(path: &str, content: &str) -> String {
    format!("```{}\n{}\n```", extension(path), content)
}

pub fn build_repair_prompt(ctx: &RepairContext<'_>) -> String {
    let failure = ctx.failure;
    let line = failure
        .line
        .map_or_else(|| "unknown".to_string(), |n| n.to_string());
    let trace = failure.trace.as_deref().unwrap_or("None");

    let file_block = match ctx.file_content {
        Some(content) if !content.is_empty() => fenced(&failure.file, content),
        _ => "(unavailable)".to_string(),
    };
    let impl_block = ctx
        .implementation
        .map(|(path, content)| {
            format!(
                "\n\n=== IMPLEMENTATION FILE ({path}) ===\n{}",
                fenced(path, content)
            )
        })
        .unwrap_or_default();

    let output_block = if ctx.raw_output.is_empty() {
        "(no output)".to_string()
    } else {
        let head = truncate(ctx.raw_output, OUTPUT_LIMIT);
        let marker = if head.len() < ctx.raw_output.len() {
            "…<truncated>"
        } else {
            ""
        };
        format!("```\n{head}{marker}\n```")
    };

    let test_hint = if ctx.is_test {
        "\nNOTE: The file reported in the error is a TEST file. \
The test assertions are CORRECT. The bug is in the IMPLEMENTATION file.\n\
You must fix the IMPLEMENTATION file and return its full corrected contents.\n\
Output EXACTLY one line first: TARGET_FILE: <path/to/impl/file>\n\
then output the complete corrected implementation file contents.\n\
Do NOT modify the test file. Do NOT wrap code in markdown fences."
    } else {
        ""
    };
    let contents_heading = if ctx.is_test {
        "TEST FILE CONTENTS"
    } else {
        "FILE CONTENTS"
    };

    format!(
        "CI pipeline failed. Fix the issue with a MINIMAL change.\n\n\
=== ERROR INFO ===\n\
File: {file}\n\
Language: {language}\n\
Error Type: {category}\n\
Line: {line}\n\
Message: {message}\n\
Full Trace: {trace}\n\
{test_hint}\n\
=== {contents_heading} ({file}) ===\n{file_block}{impl_block}\n\n\
=== FULL TEST OUTPUT ===\n{output_block}\n\n\
Return ONLY the complete corrected file contents with no explanation, \
no markdown fences, no commentary.",
        file = failure.file,
        language = ctx.ecosystem,
        category = failure.category,
        message = failure.message,
    )
}

/// A patch the model asked to write somewhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
    pub content: String,
}

/// Split a `TARGET_FILE: <path>` first line off a reply.
///
/// The marker must appear within the first 100 characters and open the first
/// line; the remainder has its code fences stripped.
pub fn split_redirect(reply: &str) -> Option<Redirect> {
    if !truncate(reply, 100).contains(REDIRECT_MARKER) {
        return None;
    }
    let (first, rest) = reply.split_once('\n').unwrap_or((reply, ""));
    let path = first.trim().strip_prefix(REDIRECT_MARKER)?.trim();
    if path.is_empty() {
        return None;
    }
    Some(Redirect {
        path: path.to_string(),
        content: crate::llm::strip_code_fences(rest),
    })
}

pub fn build_explanation_prompt(
    failure: &FailureRecord,
    file: &str,
    original: &str,
    fixed: &str,
) -> String {
    let line = failure
        .line
        .map_or_else(|| "unknown".to_string(), |n| n.to_string());
    format!(
        "You are an expert code reviewer. A CI test failure was fixed by AI. \
Provide a clear, concise explanation in EXACTLY this JSON format (no markdown, no extra text):\n\n\
{{\"root_cause\": \"<1-2 sentences: what was wrong in the original code>\", \
\"changes_made\": \"<1-2 sentences: what specific changes were made to fix it>\", \
\"impact\": \"<1 sentence: what tests now pass because of this fix>\"}}\n\n\
Error type: {category}\n\
Error message: {message}\n\
File fixed: {file}\n\
Line: {line}\n\n\
Original code (first 1500 chars):\n{original}\n\n\
Fixed code (first 1500 chars):\n{fixed}",
        category = failure.category,
        message = truncate(&failure.message, 300),
        original = truncate(original, 1500),
        fixed = truncate(fixed, 1500),
    )
}

#[derive(Deserialize)]
struct RawExplanation {
    #[serde(default)]
    root_cause: String,
    #[serde(default)]
    changes_made: String,
    #[serde(default)]
    impact: String,
}

/// Parse the JSON explanation reply, clipping each field.
pub fn parse_explanation(reply: &str) -> Option<FixExplanation> {
    let cleaned = crate::llm::strip_code_fences(reply);
    let raw: RawExplanation = serde_json::from_str(&cleaned).ok()?;
    Some(FixExplanation {
        root_cause: truncate(&raw.root_cause, 300).to_string(),
        changes_made: truncate(&raw.changes_made, 300).to_string(),
        impact: truncate(&raw.impact, 200).to_string(),
    })
}

/// Explanation used when the model's reply cannot be parsed.
pub fn fallback_explanation(failure: &FailureRecord, file: &str) -> FixExplanation {
    let root_cause = if failure.message.is_empty() {
        "Unknown error".to_string()
    } else {
        truncate(&failure.message, 200).to_string()
    };
    FixExplanation {
        root_cause,
        changes_made: format!("AI applied a code fix to {file}"),
        impact: "Test failures resolved".to_string(),
    }
}

pub fn commit_message(
    file: &str,
    category: BugCategory,
    line: Option<u32>,
    explanation: Option<&FixExplanation>,
) -> String {
    match explanation.filter(|e| !e.root_cause.is_empty()) {
        Some(e) => format!("fix({file}): {}", truncate(&e.root_cause, 80)),
        None => match line {
            Some(n) => format!("[AI-AGENT] Fix {category} in {file} at line {n}"),
            None => format!("[AI-AGENT] Fix {category} in {file}"),
        },
    }
}

pub fn describe_fix(
    failure: &FailureRecord,
    file: &str,
    explanation: Option<&FixExplanation>,
) -> String {
    match explanation.filter(|e| !e.root_cause.is_empty()) {
        Some(e) => e.root_cause.clone(),
        None => format!(
            "{} error in {file}: {}. AI applied a fix.",
            failure.category,
            truncate(&failure.message, 120)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> FailureRecord {
        FailureRecord::new(
            "tests/test_math.py",
            BugCategory::Logic,
            "test_add: AssertionError: assert 3 == 4",
        )
        .with_line(Some(12))
    }

    #[test]
    fn repair_prompt_carries_error_and_file() {
        let f = failure();
        let ctx = RepairContext {
            failure: &f,
            ecosystem: Ecosystem::Python,
            file_content: Some("def test_add():\n    assert add(1, 2) == 4\n"),
            implementation: Some(("src/math.py", "def add(a, b):\n    return a - b\n")),
            raw_output: "FAILED tests/test_math.py::test_add",
            is_test: true,
        };
        let prompt = build_repair_prompt(&ctx);
        assert!(prompt.starts_with("CI pipeline failed."));
        assert!(prompt.contains("Error Type: LOGIC\nLine: 12\n"));
        assert!(prompt.contains("Full Trace: None"));
        assert!(prompt.contains("=== TEST FILE CONTENTS (tests/test_math.py) ===\n```py\n"));
        assert!(prompt.contains("=== IMPLEMENTATION FILE (src/math.py) ===\n```py\n"));
        assert!(prompt.contains("TARGET_FILE: <path/to/impl/file>"));
    }

    #[test]
    fn repair_prompt_truncates_long_output() {
        let f = FailureRecord::new("app.py", BugCategory::Syntax, "bad");
        let output = "x".repeat(OUTPUT_LIMIT + 10);
        let ctx = RepairContext {
            failure: &f,
            ecosystem: Ecosystem::Python,
            file_content: None,
            implementation: None,
            raw_output: &output,
            is_test: false,
        };
        let prompt = build_repair_prompt(&ctx);
        assert!(prompt.contains("=== FILE CONTENTS (app.py) ===\n(unavailable)"));
        assert!(prompt.contains("…<truncated>"));
        assert!(prompt.contains("Line: unknown"));
        assert!(!prompt.contains("TARGET_FILE"));
    }

    #[test]
    fn redirect_splits_path_and_body() {
        let reply = "TARGET_FILE: src/math.py\n```python\ndef add(a, b):\n    return a + b\n```";
        let redirect = split_redirect(reply).unwrap();
        assert_eq!(redirect.path, "src/math.py");
        assert_eq!(redirect.content, "def add(a, b):\n    return a + b");
    }

    #[test]
    fn redirect_requires_marker_on_first_line() {
        assert!(split_redirect("def add():\n    pass").is_none());
        assert!(split_redirect("# TARGET_FILE: nope\nx = 1").is_none());
        assert!(split_redirect("TARGET_FILE:   \nx = 1").is_none());
    }

    #[test]
    fn explanation_parses_fenced_json() {
        let reply = "```json\n{\"root_cause\": \"add subtracted\", \"changes_made\": \"use +\", \"impact\": \"test_add passes\"}\n```";
        let e = parse_explanation(reply).unwrap();
        assert_eq!(e.root_cause, "add subtracted");
        assert!(parse_explanation("not json").is_none());
    }

    #[test]
    fn commit_message_prefers_root_cause() {
        let e = FixExplanation {
            root_cause: "add subtracted".into(),
            ..FixExplanation::default()
        };
        assert_eq!(
            commit_message("src/math.py", BugCategory::Logic, Some(3), Some(&e)),
            "fix(src/math.py): add subtracted"
        );
        assert_eq!(
            commit_message("src/math.py", BugCategory::Logic, Some(3), None),
            "[AI-AGENT] Fix LOGIC in src/math.py at line 3"
        );
        assert_eq!(
            commit_message("src/math.py", BugCategory::Import, None, None),
            "[AI-AGENT] Fix IMPORT in src/math.py"
        );
    }

    #[test]
    fn description_falls_back_to_failure_summary() {
        let f = failure();
        assert_eq!(
            describe_fix(&f, "src/math.py", None),
            "LOGIC error in src/math.py: test_add: AssertionError: assert 3 == 4. AI applied a fix."
        );
    }
}
