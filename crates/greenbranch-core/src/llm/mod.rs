//! Patch-generation collaborator.
//!
//! The engine sends one prompt and receives one block of text. Markdown
//! fences are stripped by the caller via [`strip_code_fences`].

mod openai;

use async_trait::async_trait;

pub use openai::{OpenAiCompatClient, PatchModelConfig};

/// The model call itself failed, as opposed to returning a wrong answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchGenerationError {
    #[error("model endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("model endpoint returned {status}: {detail}")]
    Remote { status: u16, detail: String },

    #[error("model returned an empty completion")]
    Empty,

    #[error("malformed model response: {0}")]
    Malformed(String),

    #[error("model client not configured: {0}")]
    NotConfigured(String),
}

/// Single-call text completion.
#[async_trait]
pub trait PatchGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, PatchGenerationError>;
}

/// Remove a surrounding markdown fence, if present, and trim.
pub fn strip_code_fences(text: &str) -> String {
    let text = text.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }

    let mut lines: Vec<&str> = text.split('\n').skip(1).collect();
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fence_with_language_tag() {
        let raw = "```python\ndef add(a, b):\n    return a + b\n```\n";
        assert_eq!(strip_code_fences(raw), "def add(a, b):\n    return a + b");
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(strip_code_fences("  x = 1\n"), "x = 1");
    }

    #[test]
    fn tolerates_missing_closing_fence() {
        assert_eq!(strip_code_fences("```\nx = 1"), "x = 1");
    }

    #[test]
    fn fence_only_reply_is_empty() {
        assert_eq!(strip_code_fences("```\n```"), "");
    }
}
