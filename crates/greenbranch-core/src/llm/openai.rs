//! OpenAI-compatible chat-completions client (Groq, Together, OpenAI).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{PatchGenerationError, PatchGenerator};

pub const DEFAULT_MODEL_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

const SYSTEM_PROMPT: &str = "You are a senior software engineer fixing CI test failures. \
Return ONLY the complete corrected file contents. \
Do not include any explanation, markdown, or code fences.";

/// Settings for [`OpenAiCompatClient`].
#[derive(Clone)]
pub struct PatchModelConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for PatchModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_MODEL_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            temperature: 0.2,
            timeout: Duration::from_secs(120),
        }
    }
}

impl std::fmt::Debug for PatchModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchModelConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Chat-completions client. Construct once and share.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    config: PatchModelConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(config: PatchModelConfig) -> Result<Self, PatchGenerationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PatchGenerationError::NotConfigured(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &PatchModelConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl PatchGenerator for OpenAiCompatClient {
    #[instrument(skip(self, prompt), fields(model = %self.config.model, prompt_chars = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String, PatchGenerationError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| PatchGenerationError::NotConfigured("missing API key".into()))?;

        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| PatchGenerationError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| PatchGenerationError::Unreachable(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(PatchGenerationError::Remote {
                status,
                detail: text,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| PatchGenerationError::Malformed(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(PatchGenerationError::Empty);
        }
        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}
