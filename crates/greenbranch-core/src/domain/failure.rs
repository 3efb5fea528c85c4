//! Classified test failures.

use serde::{Deserialize, Serialize};

/// Bug category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BugCategory {
    Linting,
    Syntax,
    Logic,
    TypeError,
    Import,
    Indentation,
}

impl BugCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BugCategory::Linting => "LINTING",
            BugCategory::Syntax => "SYNTAX",
            BugCategory::Logic => "LOGIC",
            BugCategory::TypeError => "TYPE_ERROR",
            BugCategory::Import => "IMPORT",
            BugCategory::Indentation => "INDENTATION",
        }
    }
}

impl std::fmt::Display for BugCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified test failure. Produced fresh on every test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub file: String,
    pub line: Option<u32>,
    pub category: BugCategory,
    pub message: String,
    pub trace: Option<String>,
}

impl FailureRecord {
    pub fn new(file: impl Into<String>, category: BugCategory, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            category,
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_line(mut self, line: Option<u32>) -> Self {
        self.line = line;
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// `"<file>"` or `"<file>:<line>"`.
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{}", self.file, line),
            None => self.file.clone(),
        }
    }
}
