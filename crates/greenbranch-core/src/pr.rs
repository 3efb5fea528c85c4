//! Pull-request publishing after a run's fixes are committed.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::branch::repo_slug;
use crate::domain::RunResult;
use crate::exec::Credential;
use crate::reporting::render_fix_summary_md;

pub const GITHUB_API: &str = "https://api.github.com";

/// A pull request to open from the fix branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestDraft {
    /// `owner/repo`
    pub repo: String,
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

impl PullRequestDraft {
    /// Draft for a finished run, or `None` when nothing was committed or the
    /// repository URL has no `owner/repo` form.
    pub fn for_run(result: &RunResult, repo_url: &str, base: &str) -> Option<Self> {
        let head = result.branch_name.clone()?;
        if !result.commits.iter().any(|c| c.succeeded()) {
            return None;
        }
        let repo = repo_slug(repo_url)?;

        let first = result
            .fixes
            .iter()
            .find(|f| f.is_fixed())
            .map(|f| match f.commit_message.split_once(':') {
                Some((_, rest)) => rest.trim().to_string(),
                None => f.commit_message.clone(),
            })
            .unwrap_or_else(|| "Automated Fixes".to_string());
        let title: String = first.chars().take(60).collect();

        Some(Self {
            repo,
            head,
            base: base.to_string(),
            title: format!("AI Fix: {title}"),
            body: render_fix_summary_md(result),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub url: String,
    pub number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("pull request host unreachable: {0}")]
    Unreachable(String),

    /// The host refused the request, e.g. the PR already exists or the branch has no diff.
    #[error("pull request rejected: {0}")]
    Rejected(String),

    #[error("pull request host returned {status}: {detail}")]
    Remote { status: u16, detail: String },
}

/// Opens pull requests on a code host.
#[async_trait]
pub trait PullRequestPublisher: Send + Sync {
    async fn open(
        &self,
        draft: &PullRequestDraft,
        credential: &Credential,
    ) -> Result<PullRequest, PublishError>;
}

/// GitHub REST implementation.
#[derive(Debug, Clone)]
pub struct GithubPullRequests {
    client: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct CreatedPull {
    #[serde(default)]
    html_url: String,
    number: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GithubError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<GithubErrorItem>,
}

#[derive(Debug, Deserialize)]
struct GithubErrorItem {
    message: Option<String>,
}

impl GithubPullRequests {
    pub fn new() -> Result<Self, PublishError> {
        Self::with_api_base(GITHUB_API)
    }

    /// Point at another API root (GitHub Enterprise, test stubs).
    pub fn with_api_base(api_base: impl Into<String>) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("greenbranch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PublishError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PullRequestPublisher for GithubPullRequests {
    #[instrument(skip(self, draft, credential), fields(repo = %draft.repo, head = %draft.head))]
    async fn open(
        &self,
        draft: &PullRequestDraft,
        credential: &Credential,
    ) -> Result<PullRequest, PublishError> {
        let url = format!("{}/repos/{}/pulls", self.api_base, draft.repo);
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", credential.expose()))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .json(&json!({
                "title": draft.title,
                "body": draft.body,
                "head": draft.head,
                "base": draft.base,
            }))
            .send()
            .await
            .map_err(|e| PublishError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| PublishError::Unreachable(e.to_string()))?;

        match status {
            201 => {
                let created: CreatedPull = serde_json::from_str(&text).map_err(|e| {
                    PublishError::Remote {
                        status,
                        detail: e.to_string(),
                    }
                })?;
                info!(url = %created.html_url, "pull request opened");
                Ok(PullRequest {
                    url: created.html_url,
                    number: created.number,
                })
            }
            422 => {
                let message = serde_json::from_str::<GithubError>(&text)
                    .map(|e| {
                        e.errors
                            .into_iter()
                            .find_map(|i| i.message)
                            .unwrap_or(e.message)
                    })
                    .unwrap_or(text);
                warn!(%message, "pull request rejected");
                Err(PublishError::Rejected(message))
            }
            _ => Err(PublishError::Remote {
                status,
                detail: text.chars().take(500).collect(),
            }),
        }
    }
}
