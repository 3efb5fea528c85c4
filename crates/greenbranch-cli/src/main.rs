//! greenbranch - self-healing CI runs from the command line
//!
//! The `greenbranch` command drives healing runs against a remote execution
//! backend and inspects the sessions they leave behind.
//!
//! ## Commands
//!
//! - `run`: clone a repository, repair failing tests, commit the fixes
//! - `sessions`: list, show or release session records
//! - `result`: print a persisted run result after verifying its digest
//! - `classify`: classify a saved test log without touching any backend
//! - `health`: probe the execution backend and the session store

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use greenbranch_core::{
    classify_for, read_result, Credential, Ecosystem, EngineConfig, ExecutionBackend,
    GithubPullRequests, RunOrchestrator, RunRequest, RunResult, StreamEvent,
};
use greenbranch_state::{SessionId, SessionRecord, SessionStore, StoreConfig, SurrealSessionStore};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "greenbranch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Self-healing CI: repair failing tests and push the fixes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the healing loop against a repository
    Run(RunArgs),

    /// Inspect and release session records
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Print a persisted run result
    Result {
        /// Session id of the run
        session_id: String,

        /// Results directory (default: GREENBRANCH_RESULTS_DIR)
        #[arg(long)]
        results_dir: Option<PathBuf>,
    },

    /// Classify failures in a saved test log
    Classify {
        /// Ecosystem that produced the log (python, nodejs)
        #[arg(short, long)]
        ecosystem: Ecosystem,

        /// Path to the raw test output
        file: PathBuf,
    },

    /// Check the execution backend and session store
    Health,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Repository clone URL
    #[arg(long)]
    repo: String,

    /// Ecosystem of the repository (python, nodejs)
    #[arg(short, long)]
    ecosystem: Ecosystem,

    /// Iteration cap (default: GREENBRANCH_MAX_ITERATIONS or 5)
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Branch the tests run on and pull requests target
    #[arg(long, default_value = "main")]
    base_branch: String,

    /// Explicit name for the fix branch
    #[arg(long, conflicts_with = "team")]
    branch_name: Option<String>,

    /// Team name, combined with --leader into the fix branch name
    #[arg(long, requires = "leader")]
    team: Option<String>,

    /// Team leader name
    #[arg(long, requires = "team")]
    leader: Option<String>,

    /// Owner recorded on the session
    #[arg(long)]
    owner: Option<String>,

    /// Override the install command
    #[arg(long)]
    install_command: Option<String>,

    /// Override the test command
    #[arg(long)]
    test_command: Option<String>,

    /// Push token forwarded with each commit
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Open a pull request from the fix branch
    #[arg(long)]
    open_pr: bool,

    /// Ask the model to explain every applied fix
    #[arg(long)]
    explain: bool,

    /// Show live progress while the run executes
    #[arg(long)]
    stream: bool,
}

#[derive(Subcommand)]
enum SessionAction {
    /// List live sessions
    List {
        /// Only sessions of this owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Show one session
    Get { session_id: String },
    /// Release the working copy and delete the record
    Delete { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    greenbranch_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => {
            let config = engine_config()?;
            let sessions = open_store(&config).await?;
            cmd_run(&config, sessions, args, cli.json).await
        }
        Commands::Sessions { action } => {
            let config = engine_config()?;
            let sessions = open_store(&config).await?;
            match action {
                SessionAction::List { owner } => {
                    cmd_sessions_list(sessions.as_ref(), owner.as_deref()).await
                }
                SessionAction::Get { session_id } => {
                    cmd_sessions_get(&config, sessions.as_ref(), &session_id).await
                }
                SessionAction::Delete { session_id } => {
                    let orchestrator = RunOrchestrator::from_config(&config, sessions)?;
                    orchestrator.release_session(&session_id).await?;
                    println!("Released session {session_id}");
                    Ok(())
                }
            }
        }
        Commands::Result {
            session_id,
            results_dir,
        } => {
            let config = engine_config()?;
            cmd_result(&session_id, results_dir.or(config.results_dir).as_deref())
        }
        Commands::Classify { ecosystem, file } => cmd_classify(ecosystem, &file),
        Commands::Health => {
            let config = engine_config()?;
            let sessions = open_store(&config).await?;
            cmd_health(&config, sessions.as_ref()).await
        }
    }
}

fn engine_config() -> Result<EngineConfig> {
    EngineConfig::from_env().context("Invalid GREENBRANCH_* configuration")
}

async fn open_store(config: &EngineConfig) -> Result<Arc<SurrealSessionStore>> {
    let store_config = StoreConfig::from_env()
        .context("Invalid session store configuration")?
        .with_default_ttl(config.session_ttl);
    let store = SurrealSessionStore::connect(&store_config)
        .await
        .with_context(|| format!("Failed to connect to the session store at {}", store_config.url))?;
    Ok(Arc::new(store))
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn run_request(args: RunArgs, default_iterations: u32) -> RunRequest {
    let mut request = RunRequest::new(args.repo, args.ecosystem)
        .with_max_iterations(args.max_iterations.unwrap_or(default_iterations));
    request.base_branch = args.base_branch;
    request.branch_name = args.branch_name;
    request.install_command = args.install_command;
    request.test_command = args.test_command;
    request.open_pull_request = args.open_pr;
    if let (Some(team), Some(leader)) = (args.team, args.leader) {
        request = request.with_team(team, leader);
    }
    if let Some(owner) = args.owner {
        request = request.with_owner(owner);
    }
    if let Some(token) = args.github_token.filter(|t| !t.is_empty()) {
        request = request.with_credential(Credential::new(token));
    }
    request
}

async fn cmd_run(
    config: &EngineConfig,
    sessions: Arc<dyn SessionStore>,
    args: RunArgs,
    json: bool,
) -> Result<()> {
    if args.open_pr && args.github_token.is_none() {
        bail!("--open-pr needs a token (--github-token or GITHUB_TOKEN)");
    }
    let stream = args.stream;
    let explain = args.explain || config.explain_fixes;

    let mut orchestrator =
        RunOrchestrator::from_config(config, sessions)?.with_explain_fixes(explain);
    if args.open_pr {
        orchestrator = orchestrator.with_publisher(Arc::new(GithubPullRequests::new()?));
    }
    let request = run_request(args, config.max_iterations);
    info!(repo = %request.repo_url, branch = %request.fix_branch(), "starting run");

    let result = if stream {
        let mut events = orchestrator.spawn_streaming_run(request);
        let mut last = None;
        while let Some(event) = events.recv().await {
            print_event(&event, json)?;
            last = Some(event);
        }
        match last {
            Some(StreamEvent::Complete { result }) => *result,
            Some(StreamEvent::Error { message, kind }) => bail!("run aborted ({kind}): {message}"),
            _ => bail!("run ended without a result"),
        }
    } else {
        orchestrator.run(request).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_event(event: &StreamEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        StreamEvent::Log { line, .. } => println!("{line}"),
        StreamEvent::Iteration {
            iteration,
            total,
            failure_count,
            ..
        } => println!("── iteration {iteration}/{total}: {failure_count} failure(s)"),
        _ => {}
    }
    Ok(())
}

fn print_result(result: &RunResult) {
    println!();
    println!("Session:    {}", result.session_id);
    println!("Status:     {}", result.status.as_str());
    println!(
        "Iterations: {}/{}",
        result.iteration_count, result.max_iterations
    );
    println!("Fixes:      {} applied, {} attempted", result.fixed_count(), result.fixes.len());
    for fix in &result.fixes {
        let mark = if fix.is_fixed() { "✓" } else { "✗" };
        println!("  {mark} [{}] {} - {}", fix.category, fix.file, fix.description);
    }
    if let Some(branch) = &result.branch_name {
        println!("Branch:     {branch}");
    }
    if let Some(hash) = &result.commit_hash {
        println!("Commit:     {hash}");
    }
    if let Some(url) = &result.pull_request_url {
        println!("PR:         {url}");
    }
    println!(
        "Score:      {} (base {} + speed {} - penalty {})",
        result.score.final_score,
        result.score.base_score,
        result.score.speed_bonus,
        result.score.efficiency_penalty
    );
    println!("Elapsed:    {:.1}s", result.elapsed_seconds);
    println!();
    println!("{}", result.summary());
}

// ---------------------------------------------------------------------------
// sessions
// ---------------------------------------------------------------------------

fn print_session(record: &SessionRecord) {
    println!(
        "{}  {:<10}  {:<7}  {}  {}",
        record.session_id,
        record.status.as_str(),
        record.ecosystem,
        record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        record.repo_url
    );
}

async fn cmd_sessions_list(sessions: &dyn SessionStore, owner: Option<&str>) -> Result<()> {
    let records = match owner {
        Some(owner) => sessions.list_by_owner(owner).await?,
        None => sessions.list_all().await?,
    };
    if records.is_empty() {
        println!("No live sessions");
        return Ok(());
    }
    for record in &records {
        print_session(record);
    }
    Ok(())
}

async fn cmd_sessions_get(
    config: &EngineConfig,
    sessions: &dyn SessionStore,
    session_id: &str,
) -> Result<()> {
    let id = SessionId::from(session_id);
    let record = sessions
        .get(&id)
        .await
        .with_context(|| format!("Session not found: {session_id}"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    if let Some(ttl) = sessions.ttl_remaining(&id).await? {
        println!("expires in {}s", ttl.as_secs());
    }

    // The backend view is informational; the store record is authoritative.
    match config.exec_client()?.session_info(session_id).await {
        Ok(Some(info)) => println!("backend: {info}"),
        Ok(None) => println!("backend: working copy gone"),
        Err(err) => warn!(error = %err, "backend session lookup failed"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// result / classify / health
// ---------------------------------------------------------------------------

fn cmd_result(session_id: &str, results_dir: Option<&Path>) -> Result<()> {
    let Some(dir) = results_dir else {
        bail!("no results directory: pass --results-dir or set GREENBRANCH_RESULTS_DIR");
    };
    let result = read_result(session_id, dir)
        .with_context(|| format!("Failed to load result for {session_id}"))?;
    print_result(&result);
    Ok(())
}

fn cmd_classify(ecosystem: Ecosystem, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let failures = classify_for(&raw, ecosystem);

    if failures.is_empty() {
        println!("No failures found");
        return Ok(());
    }
    for failure in &failures {
        println!(
            "{:<12} {}  {}",
            failure.category.as_str(),
            failure.location(),
            failure.message
        );
    }
    println!("\n{} failure(s)", failures.len());
    Ok(())
}

async fn cmd_health(config: &EngineConfig, sessions: &dyn SessionStore) -> Result<()> {
    let backend = config.exec_client()?;
    let backend_ok = match backend.health().await {
        Ok(health) => {
            println!("Execution backend: {} ({})", health.status, config.exec_url);
            health.is_ok()
        }
        Err(err) => {
            println!("Execution backend: DOWN ({err})");
            false
        }
    };
    let store_ok = match sessions.ping().await {
        Ok(()) => {
            println!("Session store:     ok");
            true
        }
        Err(err) => {
            println!("Session store:     DOWN ({err})");
            false
        }
    };

    if !(backend_ok && store_ok) {
        bail!("health check failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_arguments_build_a_request() {
        let cli = Cli::try_parse_from([
            "greenbranch",
            "run",
            "--repo",
            "https://github.com/acme/calc.git",
            "--ecosystem",
            "python",
            "--team",
            "Rift Organisers",
            "--leader",
            "Dana",
            "--max-iterations",
            "3",
            "--github-token",
            "ghp_x",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let request = run_request(args, 5);
        assert_eq!(request.ecosystem, Ecosystem::Python);
        assert_eq!(request.max_iterations, 3);
        assert_eq!(request.fix_branch(), "RIFT_ORGANISERS_DANA_AI_Fix");
        assert!(request.credential.is_some());
    }

    #[test]
    fn team_requires_leader() {
        let parsed = Cli::try_parse_from([
            "greenbranch",
            "run",
            "--repo",
            "r",
            "--ecosystem",
            "nodejs",
            "--team",
            "solo",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn unknown_ecosystem_is_rejected() {
        let parsed = Cli::try_parse_from(["greenbranch", "classify", "-e", "cobol", "log.txt"]);
        assert!(parsed.is_err());
    }
}
