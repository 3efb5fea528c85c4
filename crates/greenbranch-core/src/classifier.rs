//! Test-output failure classifier.
//!
//! Turns raw test-runner output into ordered [`FailureRecord`]s. Pure and
//! deterministic: the same `(raw_output, ecosystem)` always yields the same
//! list in the same order.
//!
//! Two dialects are understood:
//! - python (pytest `-v --tb=short`): `FAILED <file>::<test> - <message>`
//!   summary lines, plus `E ...Error...` marker lines with a traceback context
//! - nodejs (jest): `FAIL <file>` headers followed by `● <case>` markers

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{BugCategory, Ecosystem, FailureRecord};

/// Keyword table evaluated top to bottom; the first matching row wins.
///
/// Changing the row order changes how ambiguous messages are classified.
const CATEGORY_KEYWORDS: &[(BugCategory, &[&str])] = &[
    (
        BugCategory::Linting,
        &["unused import", "imported but unused", "no-unused", "lint"],
    ),
    (
        BugCategory::Syntax,
        &["syntaxerror", "syntax error", "unexpected token", "missing colon"],
    ),
    (
        BugCategory::TypeError,
        &["typeerror", "type error", "not callable", "undefined is not"],
    ),
    (
        BugCategory::Import,
        &[
            "importerror",
            "modulenotfounderror",
            "cannot find module",
            "no module named",
        ],
    ),
    (
        BugCategory::Indentation,
        &["indentationerror", "unexpected indent", "indentation"],
    ),
    (
        BugCategory::Logic,
        &["assert", "expected", "not equal", "to equal", "to be"],
    ),
];

/// Lines of context kept as a record's trace on each side of the match.
const TRACE_CONTEXT: usize = 5;

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("classifier patterns are valid"))
}

fn pytest_failed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^FAILED\s+(.+?)::(\S+)\s*[-–]\s*(.*)")
}

fn traceback_file() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"File "(.+?)""#)
}

fn traceback_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"line (\d+)")
}

fn jest_fail() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\s*FAIL\s+(.+)")
}

fn jest_case() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"^\s*●\s+(.+)")
}

fn jest_position() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r":(\d+):\d+")
}

fn passed_summary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(\d+) passed")
}

/// Classify raw output for an ecosystem tag. Unknown tags yield an empty list.
pub fn classify(raw_output: &str, ecosystem: &str) -> Vec<FailureRecord> {
    match Ecosystem::from_tag(ecosystem) {
        Some(eco) => classify_for(raw_output, eco),
        None => Vec::new(),
    }
}

/// Classify raw output for a known ecosystem.
pub fn classify_for(raw_output: &str, ecosystem: Ecosystem) -> Vec<FailureRecord> {
    let lines: Vec<&str> = raw_output.lines().collect();
    match ecosystem {
        Ecosystem::Python => classify_pytest(&lines),
        Ecosystem::Nodejs => classify_jest(&lines),
    }
}

/// Assign a bug category from a failure message.
pub fn categorize(message: &str) -> BugCategory {
    let lower = message.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(BugCategory::Logic)
}

/// Number of passing tests reported by the runner's summary line, if any.
pub fn count_passed(raw_output: &str) -> Option<u32> {
    passed_summary()
        .captures_iter(raw_output)
        .last()
        .and_then(|c| c[1].parse().ok())
}

fn context(lines: &[&str], idx: usize) -> String {
    let start = idx.saturating_sub(TRACE_CONTEXT);
    let end = (idx + TRACE_CONTEXT + 1).min(lines.len());
    lines[start..end].join("\n")
}

// ---------------------------------------------------------------------------
// python
// ---------------------------------------------------------------------------

fn classify_pytest(lines: &[&str]) -> Vec<FailureRecord> {
    let mut records: Vec<FailureRecord> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = pytest_failed().captures(line) {
            let file = caps[1].trim().to_string();
            let error = caps[3].trim();
            let category = categorize(error);
            let message = format!("{}: {}", &caps[2], error);
            let line_no = pytest_line_near(lines, i, &file);
            records.push(
                FailureRecord::new(file, category, message)
                    .with_line(line_no)
                    .with_trace(context(lines, i)),
            );
        }

        let trimmed = line.trim();
        if trimmed.starts_with("E ") && line.contains("Error") {
            let message = trimmed.strip_prefix('E').unwrap_or(trimmed).trim().to_string();
            let Some(file) = traceback_file_before(lines, i) else {
                continue;
            };
            if records.iter().any(|r| r.message == message) {
                continue;
            }
            let line_no = traceback_line_before(lines, i);
            records.push(
                FailureRecord::new(file, categorize(&message), message)
                    .with_line(line_no)
                    .with_trace(context(lines, i)),
            );
        }
    }

    records
}

/// Search lines `[i-5, i+5)` for `<file>:<n>`.
fn pytest_line_near(lines: &[&str], idx: usize, file: &str) -> Option<u32> {
    let pattern = format!(r"{}:(\d+)", regex::escape(file));
    let re = Regex::new(&pattern).ok()?;
    let start = idx.saturating_sub(5);
    let end = (idx + 5).min(lines.len());
    lines[start..end]
        .iter()
        .find_map(|l| re.captures(l).and_then(|c| c[1].parse().ok()))
}

fn traceback_file_before(lines: &[&str], idx: usize) -> Option<String> {
    lines[idx.saturating_sub(10)..idx]
        .iter()
        .find_map(|l| traceback_file().captures(l).map(|c| c[1].to_string()))
}

fn traceback_line_before(lines: &[&str], idx: usize) -> Option<u32> {
    lines[idx.saturating_sub(10)..idx]
        .iter()
        .find_map(|l| traceback_line().captures(l).and_then(|c| c[1].parse().ok()))
}

// ---------------------------------------------------------------------------
// nodejs
// ---------------------------------------------------------------------------

fn classify_jest(lines: &[&str]) -> Vec<FailureRecord> {
    let mut records = Vec::new();
    let mut current_file: Option<String> = None;

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = jest_fail().captures(line) {
            current_file = Some(caps[1].trim().to_string());
        }

        let Some(file) = current_file.as_deref() else {
            continue;
        };
        if let Some(caps) = jest_case().captures(line) {
            let case = caps[1].trim();
            let error = jest_message_after(lines, i);
            let category = categorize(&error);
            let message = format!("{case}: {error}");
            let line_no = jest_line_after(lines, i);
            records.push(
                FailureRecord::new(file, category, message)
                    .with_line(line_no)
                    .with_trace(context(lines, i)),
            );
        }
    }

    records
}

/// First non-empty, non-marker line among the next four.
fn jest_message_after(lines: &[&str], idx: usize) -> String {
    let end = (idx + 5).min(lines.len());
    lines[(idx + 1).min(end)..end]
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty() && !l.starts_with('●'))
        .unwrap_or("Test failed")
        .to_string()
}

fn jest_line_after(lines: &[&str], idx: usize) -> Option<u32> {
    let end = (idx + 10).min(lines.len());
    lines[idx..end]
        .iter()
        .find_map(|l| jest_position().captures(l).and_then(|c| c[1].parse().ok()))
}
