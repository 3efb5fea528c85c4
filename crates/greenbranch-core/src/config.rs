//! Engine configuration loaded from `GREENBRANCH_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{HealError, Result};
use crate::exec::{ExecClientConfig, HttpExecutionClient};
use crate::llm::{OpenAiCompatClient, PatchModelConfig};

pub const DEFAULT_EXEC_URL: &str = "http://localhost:8001";
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Everything needed to build the engine's collaborators.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub exec_url: String,
    pub exec_api_key: Option<String>,
    /// Applied to blocking and streaming backend calls alike
    pub exec_timeout: Duration,
    pub model: PatchModelConfig,
    pub max_iterations: u32,
    pub session_ttl: Duration,
    /// Where finished results are written, if anywhere
    pub results_dir: Option<PathBuf>,
    pub explain_fixes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exec_url: DEFAULT_EXEC_URL.to_string(),
            exec_api_key: None,
            exec_timeout: crate::exec::DEFAULT_EXEC_TIMEOUT,
            model: PatchModelConfig::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            session_ttl: greenbranch_state::DEFAULT_SESSION_TTL,
            results_dir: None,
            explain_fixes: false,
        }
    }
}

fn parsed<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| HealError::InvalidRequest(format!("{name} has an invalid value: {raw}")))
}

fn flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl EngineConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("GREENBRANCH_EXEC_URL") {
            config.exec_url = url;
        }
        config.exec_api_key = lookup("GREENBRANCH_EXEC_API_KEY");
        if let Some(raw) = lookup("GREENBRANCH_EXEC_TIMEOUT_SECS") {
            config.exec_timeout =
                Duration::from_secs(parsed("GREENBRANCH_EXEC_TIMEOUT_SECS", &raw)?);
        }

        if let Some(url) = lookup("GREENBRANCH_LLM_BASE_URL") {
            config.model.base_url = url;
        }
        config.model.api_key = lookup("GREENBRANCH_LLM_API_KEY");
        if let Some(model) = lookup("GREENBRANCH_LLM_MODEL") {
            config.model.model = model;
        }
        if let Some(raw) = lookup("GREENBRANCH_LLM_MAX_TOKENS") {
            config.model.max_tokens = parsed("GREENBRANCH_LLM_MAX_TOKENS", &raw)?;
        }
        if let Some(raw) = lookup("GREENBRANCH_LLM_TEMPERATURE") {
            config.model.temperature = parsed("GREENBRANCH_LLM_TEMPERATURE", &raw)?;
        }

        if let Some(raw) = lookup("GREENBRANCH_MAX_ITERATIONS") {
            config.max_iterations = parsed("GREENBRANCH_MAX_ITERATIONS", &raw)?;
        }
        if let Some(raw) = lookup("GREENBRANCH_SESSION_TTL_SECS") {
            config.session_ttl =
                Duration::from_secs(parsed("GREENBRANCH_SESSION_TTL_SECS", &raw)?);
        }
        config.results_dir = lookup("GREENBRANCH_RESULTS_DIR").map(PathBuf::from);
        if let Some(raw) = lookup("GREENBRANCH_EXPLAIN_FIXES") {
            config.explain_fixes = flag(&raw);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(HealError::InvalidRequest(
                "max_iterations must be at least 1".into(),
            ));
        }
        if self.exec_timeout.is_zero() {
            return Err(HealError::InvalidRequest(
                "execution timeout must be positive".into(),
            ));
        }
        if self.session_ttl.is_zero() {
            return Err(HealError::InvalidRequest(
                "session TTL must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn exec_client(&self) -> Result<HttpExecutionClient> {
        let mut exec = ExecClientConfig::new(&self.exec_url).with_timeout(self.exec_timeout);
        if let Some(key) = &self.exec_api_key {
            exec = exec.with_api_key(key);
        }
        HttpExecutionClient::new(exec)
    }

    pub fn patch_client(&self) -> Result<OpenAiCompatClient> {
        Ok(OpenAiCompatClient::new(self.model.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.exec_url, DEFAULT_EXEC_URL);
        assert_eq!(config.exec_timeout, Duration::from_secs(300));
        assert_eq!(config.model.model, "llama-3.3-70b-versatile");
        assert_eq!(config.model.max_tokens, 4096);
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.session_ttl, Duration::from_secs(7200));
        assert!(!config.explain_fixes);
    }

    #[test]
    fn overrides_are_read() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("GREENBRANCH_EXEC_URL", "http://exec:9000"),
            ("GREENBRANCH_MAX_ITERATIONS", "8"),
            ("GREENBRANCH_LLM_TEMPERATURE", "0.5"),
            ("GREENBRANCH_EXPLAIN_FIXES", "yes"),
            ("GREENBRANCH_RESULTS_DIR", "/tmp/results"),
        ]))
        .unwrap();
        assert_eq!(config.exec_url, "http://exec:9000");
        assert_eq!(config.max_iterations, 8);
        assert!((config.model.temperature - 0.5).abs() < f32::EPSILON);
        assert!(config.explain_fixes);
        assert_eq!(config.results_dir, Some(PathBuf::from("/tmp/results")));
    }

    #[test]
    fn zero_iterations_and_bad_numbers_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("GREENBRANCH_MAX_ITERATIONS", "0")]))
            .unwrap_err();
        assert!(matches!(err, HealError::InvalidRequest(_)));

        let err = EngineConfig::from_lookup(lookup(&[("GREENBRANCH_EXEC_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("GREENBRANCH_EXEC_TIMEOUT_SECS"));
    }
}
