//! Fix branch naming.

fn clean(part: &str) -> String {
    part.to_uppercase()
        .replace(['-', ' '], "_")
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Repository name from a clone URL: `https://github.com/o/my-app.git` → `my-app`.
pub fn repo_name(repo_url: &str) -> &str {
    let trimmed = repo_url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// `owner/repo` from a GitHub clone URL.
pub fn repo_slug(repo_url: &str) -> Option<String> {
    let trimmed = repo_url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let mut parts = trimmed.rsplit('/');
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let owner = parts.next().filter(|s| !s.is_empty() && !s.contains(':'))?;
    Some(format!("{owner}/{repo}"))
}

/// `<REPO>_AI_Fix`.
pub fn branch_name_for(repo_url: &str) -> String {
    format!("{}_AI_Fix", clean(repo_name(repo_url)))
}

/// `<TEAM>_<LEADER>_AI_Fix`.
pub fn branch_name_for_team(team: &str, leader: &str) -> String {
    format!("{}_{}_AI_Fix", clean(team), clean(leader))
}
