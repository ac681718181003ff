use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ansieyes_core::{
    AnsieyesConfig, IssueSummary, OutputFormat, PrSubmission, TriageOutcome, TriageRequest,
};
use ansieyes_github::{parse_issue_reference, GitHubClient, IssueReference};
use ansieyes_triage::comment::format_comment;
use ansieyes_triage::gate::{InjectionDetector, PatternDetector};
use ansieyes_triage::labels::derive_labels;
use ansieyes_triage::pipeline::TriageEngine;
use ansieyes_triage::publish::{publish_outcome, publish_review};
use ansieyes_triage::review::{format_review_comment, PrReviewer, ReviewOutcome};
use ansieyes_triage::tool::ProcessInvoker;
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = ".ansieyes.toml";

#[derive(Parser)]
#[command(
    name = "ansieyes",
    version,
    about = "Security-gated issue triage and pull request review",
    long_about = "Ansieyes screens new issues for prompt injection, checks them against older\n\
                   issues for duplicates, finds the relevant files and runs a deep analysis.\n\
                   Results are posted back as one comment plus labels.\n\n\
                   Examples:\n  \
                     ansieyes triage --issue owner/repo#42          Triage a GitHub issue\n  \
                     ansieyes triage --issue owner/repo#42 --post   ... and post the result\n  \
                     ansieyes review --pr owner/repo#7 --post       Review a pull request\n  \
                     ansieyes doctor                                Check setup and environment"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .ansieyes.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summary (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  The comment that would be posted"
    )]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Triage an issue
    #[command(long_about = "Triage an issue.\n\n\
        Fetches the issue and the repository's older issues from GitHub with --issue,\n\
        or takes the issue from flags for local runs. --post publishes the comment and\n\
        labels back to the issue.\n\n\
        Examples:\n  ansieyes triage --issue acme/app#42 --post\n  \
        ansieyes triage --title 'Crash on startup' --description '...' --repo-url https://github.com/acme/app")]
    Triage {
        /// GitHub issue (owner/repo#number or issue URL)
        #[arg(long, conflicts_with_all = ["title", "repo_url"])]
        issue: Option<String>,

        /// Issue title (local runs)
        #[arg(long)]
        title: Option<String>,

        /// Issue body (local runs)
        #[arg(long, default_value = "")]
        description: String,

        /// Repository URL (local runs)
        #[arg(long)]
        repo_url: Option<String>,

        /// JSON file with existing issues to check for duplicates (local runs)
        #[arg(long)]
        issues: Option<PathBuf>,

        /// Creation time of the issue, RFC 3339 (local runs; default: now)
        #[arg(long)]
        created_at: Option<DateTime<Utc>>,

        /// Use this checkout instead of cloning the repository
        #[arg(long)]
        repo_path: Option<PathBuf>,

        /// Post the comment and labels to the issue
        #[arg(long, requires = "issue")]
        post: bool,

        /// GitHub token (default: GITHUB_TOKEN or GH_TOKEN)
        #[arg(long)]
        github_token: Option<String>,
    },
    /// Review a pull request
    #[command(long_about = "Review a pull request.\n\n\
        Fetches the pull request and its changed files from GitHub with --pr, or reads a\n\
        submission JSON file with --file. --post publishes the review comment.\n\n\
        Examples:\n  ansieyes review --pr acme/app#7 --post\n  ansieyes review --file pr.json --format markdown")]
    Review {
        /// GitHub pull request (owner/repo#number or pull request URL)
        #[arg(long, conflicts_with = "file")]
        pr: Option<String>,

        /// Submission JSON file ({title, body, repo_url, file_changes})
        #[arg(long)]
        file: Option<PathBuf>,

        /// Post the review comment to the pull request
        #[arg(long, requires = "pr")]
        post: bool,

        /// GitHub token (default: GITHUB_TOKEN or GH_TOKEN)
        #[arg(long)]
        github_token: Option<String>,
    },
    /// Create a default .ansieyes.toml configuration file
    #[command(long_about = "Create a default .ansieyes.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .ansieyes.toml already exists.")]
    Init,
    /// Check your Ansieyes setup and environment
    #[command(long_about = "Check your Ansieyes setup and environment.\n\n\
        Runs diagnostics for the config file, analysis toolkit, model API key,\n\
        git and repomix binaries, and GitHub token. Use --format json for\n\
        machine-readable output.")]
    Doctor,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");

    if use_color {
        println!("\x1b[1m\x1b[36m🤖\x1b[0m \x1b[1mansieyes\x1b[0m v{version} - security-gated issue triage\n");

        println!("Quick start:");
        println!("  \x1b[36mansieyes init\x1b[0m                       Create a .ansieyes.toml config file");
        println!("  \x1b[36mansieyes doctor\x1b[0m                     Check toolkit, API key and binaries");
        println!("  \x1b[36mansieyes triage --issue o/r#1\x1b[0m       Triage a GitHub issue\n");

        println!("All commands:");
        println!("  \x1b[32mtriage\x1b[0m    Security gate, duplicate check, Librarian and Surgeon");
        println!("  \x1b[32mreview\x1b[0m    Review a pull request");
        println!("  \x1b[32mdoctor\x1b[0m    Check your setup and environment");
        println!("  \x1b[32minit\x1b[0m      Create default configuration\n");
    } else {
        println!("ansieyes v{version} - security-gated issue triage\n");

        println!("Quick start:");
        println!("  ansieyes init                       Create a .ansieyes.toml config file");
        println!("  ansieyes doctor                     Check toolkit, API key and binaries");
        println!("  ansieyes triage --issue o/r#1       Triage a GitHub issue\n");

        println!("All commands:");
        println!("  triage    Security gate, duplicate check, Librarian and Surgeon");
        println!("  review    Review a pull request");
        println!("  doctor    Check your setup and environment");
        println!("  init      Create default configuration\n");
    }

    println!("Run 'ansieyes <command> --help' for details.");
}

fn init_tracing(verbose: bool, use_color: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(use_color)
        .with_target(false)
        .init();
}

fn spinner(message: &'static str) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
    {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

fn detector(config: &AnsieyesConfig) -> Option<Arc<dyn InjectionDetector>> {
    config
        .security
        .enabled
        .then(|| Arc::new(PatternDetector::new()) as Arc<dyn InjectionDetector>)
}

fn read_issues(path: &Path) -> Result<Vec<IssueSummary>> {
    let content = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err(format!("reading {}", path.display()))?;
    serde_json::from_str(&content)
        .into_diagnostic()
        .wrap_err(format!("parsing issues from {}", path.display()))
}

fn read_submission(path: &Path) -> Result<PrSubmission> {
    let content = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err(format!("reading {}", path.display()))?;
    serde_json::from_str(&content)
        .into_diagnostic()
        .wrap_err(format!("parsing pull request from {}", path.display()))
}

fn print_triage(outcome: &TriageOutcome, format: OutputFormat) -> Result<()> {
    let labels = derive_labels(outcome).names();
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "state": outcome.terminal_state(),
                "labels": labels,
                "outcome": outcome,
                "comment": format_comment(outcome),
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
        OutputFormat::Markdown => println!("{}", format_comment(outcome)),
        OutputFormat::Text => {
            println!("State:  {}", outcome.terminal_state());
            if let Some(injection) = &outcome.injection {
                let gate = if injection.disabled {
                    "disabled".to_string()
                } else {
                    injection.risk_level.to_string()
                };
                println!("Risk:   {gate}");
            }
            if let Some(of) = outcome.duplicate.as_ref().and_then(|d| d.duplicate_of.as_ref()) {
                if outcome.is_duplicate() {
                    println!("Duplicate of: #{} {}", of.id, of.title);
                }
            }
            if let Some(librarian) = &outcome.librarian {
                println!("Files:  {}", librarian.relevant_files.len());
                for file in &librarian.relevant_files {
                    println!("  - {file}");
                }
            }
            if let Some(error) = &outcome.error {
                println!("Error:  {error}");
            }
            if labels.is_empty() {
                println!("Labels: (none)");
            } else {
                println!("Labels: {}", labels.join(", "));
            }
        }
    }
    Ok(())
}

fn print_review(outcome: &ReviewOutcome, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "outcome": outcome,
                "comment": format_review_comment(outcome),
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
        OutputFormat::Markdown | OutputFormat::Text => {
            println!("{}", format_review_comment(outcome));
        }
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct CheckResult {
    name: &'static str,
    status: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "pass",
            detail: detail.into(),
            hint: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn info(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "info",
            detail: detail.into(),
            hint: None,
        }
    }

    fn symbol(&self) -> &'static str {
        match self.status {
            "pass" => "\u{2713}",
            "fail" => "\u{2717}",
            _ => "~",
        }
    }

    fn colored_symbol(&self) -> String {
        match self.status {
            "pass" => "\x1b[32m\u{2713}\x1b[0m".into(),
            "fail" => "\x1b[31m\u{2717}\x1b[0m".into(),
            _ => "\x1b[33m~\x1b[0m".into(),
        }
    }
}

/// First line of `<command> --version`, if it runs.
fn binary_version(command: &str) -> Option<String> {
    let mut parts = command.split_whitespace();
    let program = parts.next()?;
    let output = std::process::Command::new(program)
        .args(parts)
        .arg("--version")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Some(stdout.lines().next().unwrap_or("").trim().to_string())
}

fn run_doctor(
    config: &AnsieyesConfig,
    config_path: Option<&Path>,
    format: OutputFormat,
    use_color: bool,
) -> Result<()> {
    let mut checks: Vec<CheckResult> = Vec::new();

    // 1. Config file
    match config_path {
        Some(path) => checks.push(CheckResult::pass(
            "config_file",
            format!("loaded {}", path.display()),
        )),
        None => checks.push(CheckResult::info(
            "config_file",
            "no .ansieyes.toml found, using defaults",
        )),
    }

    // 2. Analysis toolkit
    match config.engine.resolve_toolkit_path() {
        Some(path) if path.join("cli").is_dir() => checks.push(CheckResult::pass(
            "toolkit",
            format!("found at {}", path.display()),
        )),
        Some(path) => checks.push(CheckResult::fail(
            "toolkit",
            format!("no cli/ package under {}", path.display()),
            "point engine.toolkit_path at the analysis toolkit checkout",
        )),
        None => checks.push(CheckResult::fail(
            "toolkit",
            "location not set",
            "set engine.toolkit_path in .ansieyes.toml or ANSIEYES_TOOLKIT_PATH",
        )),
    }

    // 3. Model API key
    if config.engine.resolve_api_key().is_some() {
        checks.push(CheckResult::pass(
            "api_key",
            format!("{} is set", config.engine.api_key_env),
        ));
    } else {
        checks.push(CheckResult::fail(
            "api_key",
            format!("{} not set", config.engine.api_key_env),
            format!(
                "export {}=... or set engine.api_key in .ansieyes.toml",
                config.engine.api_key_env
            ),
        ));
    }

    // 4. Python interpreter, git and repomix
    let binaries: [(&'static str, &str, &str); 3] = [
        ("python", &config.engine.python, "install Python 3 or set engine.python"),
        ("git", &config.tools.git, "install git or set tools.git"),
        (
            "repomix",
            &config.tools.repomix,
            "npm install -g repomix, or set tools.repomix = \"npx repomix\"",
        ),
    ];
    for (name, command, hint) in binaries {
        match binary_version(command) {
            Some(version) => checks.push(CheckResult::pass(name, format!("{command}: {version}"))),
            None => checks.push(CheckResult::fail(name, format!("`{command}` not runnable"), hint)),
        }
    }

    // 5. GitHub token
    if ansieyes_github::token_from_env().is_some() {
        checks.push(CheckResult::pass("github_token", "GITHUB_TOKEN is set"));
    } else {
        checks.push(CheckResult::info(
            "github_token",
            "not set (only needed for --issue, --pr and --post)",
        ));
    }

    // 6. Security gate
    if config.security.enabled {
        checks.push(CheckResult::pass(
            "security_gate",
            format!("{} injection rules loaded", PatternDetector::new().rule_count()),
        ));
    } else {
        checks.push(CheckResult::info(
            "security_gate",
            "disabled, all issues pass unchecked",
        ));
    }

    // Output
    match format {
        OutputFormat::Json => {
            let version = env!("CARGO_PKG_VERSION");
            let json = serde_json::json!({
                "version": version,
                "checks": checks,
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
        _ => {
            let version = env!("CARGO_PKG_VERSION");
            println!("Ansieyes v{version} - Environment Check\n");

            for check in &checks {
                let sym = if use_color {
                    check.colored_symbol()
                } else {
                    check.symbol().to_string()
                };
                let label = check.name.replace('_', " ");
                println!("  {sym} {label:<20} {}", check.detail);
                if let Some(hint) = &check.hint {
                    println!("    hint: {hint}");
                }
            }

            let passed = checks.iter().filter(|c| c.status == "pass").count();
            let failed = checks.iter().filter(|c| c.status == "fail").count();
            let info = checks.iter().filter(|c| c.status == "info").count();
            println!("\n{passed} checks passed, {failed} failed, {info} info");
        }
    }

    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# Ansieyes Configuration

[engine]
# Directory of the analysis toolkit (python -m cli.<module>)
# toolkit_path = "/opt/ai-issue-triage"
# python = "python3"
# api_key_env = "GEMINI_API_KEY"
# api_key = "..."
# tool_timeout_secs = 600

[tools]
# git = "git"
# repomix = "repomix"          # or "npx repomix"

[security]
# Screen issue and pull request text for prompt injection
# enabled = true
"#;

fn load_config(explicit: Option<&Path>) -> Result<(AnsieyesConfig, Option<PathBuf>)> {
    match explicit {
        Some(path) => Ok((AnsieyesConfig::from_file(path)?, Some(path.to_path_buf()))),
        None => {
            let default_path = Path::new(CONFIG_FILE);
            if default_path.exists() {
                Ok((
                    AnsieyesConfig::from_file(default_path)?,
                    Some(default_path.to_path_buf()),
                ))
            } else {
                Ok((AnsieyesConfig::default(), None))
            }
        }
    }
}

fn parse_reference(raw: &str) -> Result<IssueReference> {
    Ok(parse_issue_reference(raw)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };
    init_tracing(cli.verbose, use_color);

    let (config, config_path) = load_config(cli.config.as_deref())?;
    tracing::debug!(format = %cli.format, config = ?config_path, "configuration loaded");

    match cli.command {
        None => {
            print_welcome(use_color);
        }
        Some(Command::Triage {
            issue,
            title,
            description,
            repo_url,
            issues,
            created_at,
            repo_path,
            post,
            github_token,
        }) => {
            let engine = TriageEngine::new(&config, Arc::new(ProcessInvoker), detector(&config))?;

            let github = match &issue {
                Some(raw) => {
                    let reference = parse_reference(raw)?;
                    let client = GitHubClient::new(github_token.as_deref())?;
                    Some((reference, client))
                }
                None => None,
            };

            let mut request = match &github {
                Some((reference, client)) => {
                    client
                        .repository_of(reference)
                        .triage_request(reference.number)
                        .await?
                }
                None => {
                    let Some(title) = title else {
                        miette::bail!(miette::miette!(
                            help = "pass --issue owner/repo#N, or --title and --repo-url",
                            "no issue to triage"
                        ));
                    };
                    let Some(repo_url) = repo_url else {
                        miette::bail!("--repo-url is required with --title");
                    };
                    let mut request = TriageRequest::new(title, description, repo_url);
                    if let Some(path) = &issues {
                        request.existing_issues = read_issues(path)?;
                    }
                    request.created_at = created_at;
                    request
                }
            };
            request.repo_path = repo_path;

            let pb = spinner("Triaging issue...");
            let outcome = engine.triage(&request).await;
            if let Some(pb) = pb {
                pb.finish_with_message(outcome.terminal_state().to_string());
            }

            print_triage(&outcome, cli.format)?;

            if post {
                if let Some((reference, client)) = &github {
                    let repo = client.repository_of(reference);
                    let report = publish_outcome(&repo, reference.number, &outcome).await?;
                    eprintln!(
                        "Posted triage to {reference} (labels: {})",
                        report.labels.join(", ")
                    );
                }
            }
        }
        Some(Command::Review {
            pr,
            file,
            post,
            github_token,
        }) => {
            let reviewer = PrReviewer::new(&config, Arc::new(ProcessInvoker), detector(&config))?;

            let github = match &pr {
                Some(raw) => {
                    let reference = parse_reference(raw)?;
                    let client = GitHubClient::new(github_token.as_deref())?;
                    Some((reference, client))
                }
                None => None,
            };

            let submission = match (&github, &file) {
                (Some((reference, client)), _) => {
                    client
                        .repository_of(reference)
                        .fetch_pull_request(reference.number)
                        .await?
                }
                (None, Some(path)) => read_submission(path)?,
                (None, None) => miette::bail!(miette::miette!(
                    help = "pass --pr owner/repo#N or --file submission.json",
                    "no pull request to review"
                )),
            };

            let pb = spinner("Reviewing pull request...");
            let outcome = reviewer.review(&submission).await;
            if let Some(pb) = pb {
                let done = if outcome.report.is_some() { "Done" } else { "Failed" };
                pb.finish_with_message(done);
            }

            print_review(&outcome, cli.format)?;

            if post {
                if let Some((reference, client)) = &github {
                    let repo = client.repository_of(reference);
                    publish_review(&repo, reference.number, &outcome).await?;
                    eprintln!("Posted review to {reference}");
                }
            }
        }
        Some(Command::Init) => {
            let path = Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
        Some(Command::Doctor) => {
            run_doctor(&config, config_path.as_deref(), cli.format, use_color)?;
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "ansieyes", &mut std::io::stdout());
        }
    }

    Ok(())
}
