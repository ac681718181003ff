//! External tool invocation.
//!
//! Every process the pipeline starts (clone, chunking, retrieval, snapshot,
//! analysis, duplicate check, PR review) is described by a [`ToolInvocation`]
//! and executed through a [`ToolInvoker`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use ansieyes_core::{AnsieyesError, EngineConfig};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::debug;

/// Environment variable the analysis toolkit reads its API key from.
pub const TOOLKIT_KEY_ENV: &str = "GEMINI_API_KEY";

/// The pipeline step an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Shallow repository clone.
    Clone,
    /// Per-directory chunk generation.
    Chunk,
    /// Librarian file retrieval.
    Retrieve,
    /// Targeted snapshot bundle.
    Snapshot,
    /// Surgeon deep analysis.
    Analyze,
    /// Duplicate detection.
    DuplicateCheck,
    /// Pull request review.
    PrReview,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolKind::Clone => write!(f, "git clone"),
            ToolKind::Chunk => write!(f, "repomix chunk"),
            ToolKind::Retrieve => write!(f, "librarian"),
            ToolKind::Snapshot => write!(f, "repomix snapshot"),
            ToolKind::Analyze => write!(f, "surgeon"),
            ToolKind::DuplicateCheck => write!(f, "duplicate check"),
            ToolKind::PrReview => write!(f, "pr review"),
        }
    }
}

/// A fully described external process call.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ansieyes_triage::tool::{ToolInvocation, ToolKind};
///
/// let inv = ToolInvocation::new(ToolKind::Clone, "git", Duration::from_secs(300))
///     .args(["clone", "--depth", "1"])
///     .arg("https://github.com/acme/app");
/// assert_eq!(inv.flag_value("--depth"), Some("1"));
/// assert_eq!(inv.args.len(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Pipeline step this call belongs to.
    pub tool: ToolKind,
    /// Executable to run.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Working directory, if different from the current one.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Time budget after which the process is killed.
    pub timeout: Duration,
}

impl ToolInvocation {
    /// Start describing a call to `program`.
    pub fn new(tool: ToolKind, program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tool,
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout,
        }
    }

    /// Start describing a call from a configured command line such as
    /// `npx repomix`. The first word is the program, the rest lead the args.
    pub fn from_command(tool: ToolKind, command: &str, timeout: Duration) -> Self {
        let mut words = command.split_whitespace();
        let program = words.next().unwrap_or_default();
        Self::new(tool, program, timeout).args(words)
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `flag value`.
    pub fn flag(self, flag: &str, value: impl Into<String>) -> Self {
        self.arg(flag).arg(value)
    }

    /// Run the process in `dir`.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Export `key=value` to the process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Replace the time budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Value following the first occurrence of `flag`.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Values following every occurrence of `flag`.
    pub fn flag_values(&self, flag: &str) -> Vec<&str> {
        self.args
            .windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    /// Returns `true` if `flag` appears anywhere in the arguments.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `-1` when terminated by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ToolOutput {
    /// A successful run that printed `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with `exit_code` that printed `stderr`.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns `true` if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a nonzero exit into [`AnsieyesError::Tool`].
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::Tool`] carrying stderr, or the exit code when
    /// stderr is empty.
    pub fn into_result(self, tool: ToolKind) -> Result<Self, AnsieyesError> {
        if self.success() {
            return Ok(self);
        }
        let stderr = self.stderr.trim();
        let message = if stderr.is_empty() {
            format!("exit status {}", self.exit_code)
        } else {
            stderr.to_string()
        };
        Err(AnsieyesError::Tool {
            tool: tool.to_string(),
            message,
        })
    }
}

/// Executes [`ToolInvocation`]s.
///
/// A nonzero exit is returned as output; only spawn failures and timeouts
/// are errors.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run `invocation` to completion or until its timeout expires.
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolOutput, AnsieyesError>;
}

/// Runs invocations as child processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessInvoker;

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolOutput, AnsieyesError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        debug!(
            tool = %invocation.tool,
            program = %invocation.program,
            args = invocation.args.len(),
            "spawning tool"
        );

        let child = command.spawn().map_err(|e| AnsieyesError::Tool {
            tool: invocation.tool.to_string(),
            message: format!("failed to start {}: {e}", invocation.program),
        })?;

        // Dropping the wait future on timeout kills the child.
        let output = tokio::time::timeout(invocation.timeout, child.wait_with_output())
            .await
            .map_err(|_| AnsieyesError::Timeout {
                tool: invocation.tool.to_string(),
                seconds: invocation.timeout.as_secs(),
            })??;

        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// The Python analysis toolkit, run as `python3 -m cli.<module>` from its
/// checkout with the API key exported.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use ansieyes_triage::tool::{Toolkit, ToolKind};
///
/// let toolkit = Toolkit::new("python3", PathBuf::from("/opt/triage"), "key");
/// let inv = toolkit.invocation(ToolKind::Analyze, "analyze");
/// assert_eq!(inv.program, "python3");
/// assert_eq!(inv.args, vec!["-m", "cli.analyze"]);
/// assert_eq!(inv.cwd.as_deref(), Some(std::path::Path::new("/opt/triage")));
/// ```
#[derive(Clone)]
pub struct Toolkit {
    python: String,
    root: PathBuf,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolkit")
            .field("python", &self.python)
            .field("root", &self.root)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Toolkit {
    /// Default time budget for a toolkit call.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

    /// Describe a toolkit checkout at `root`.
    pub fn new(python: impl Into<String>, root: PathBuf, api_key: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            root,
            api_key: api_key.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Build the toolkit from engine settings.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::Config`] if the API key or the toolkit
    /// location is missing, or the location is not a directory.
    pub fn from_config(engine: &EngineConfig) -> Result<Self, AnsieyesError> {
        let api_key = engine.resolve_api_key().ok_or_else(|| {
            AnsieyesError::Config(format!(
                "model API key not set. Set {} or engine.api_key in .ansieyes.toml",
                engine.api_key_env
            ))
        })?;
        let root = engine.resolve_toolkit_path().ok_or_else(|| {
            AnsieyesError::Config(
                "analysis toolkit location not set. Set engine.toolkit_path or ANSIEYES_TOOLKIT_PATH"
                    .into(),
            )
        })?;
        if !root.is_dir() {
            return Err(AnsieyesError::Config(format!(
                "analysis toolkit not found at {}",
                root.display()
            )));
        }
        Ok(Self::new(engine.python.clone(), root, api_key)
            .with_timeout(Duration::from_secs(engine.tool_timeout_secs)))
    }

    /// Override the per-call time budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Location of the toolkit checkout.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-call time budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start an invocation of `cli.<module>`.
    pub fn invocation(&self, tool: ToolKind, module: &str) -> ToolInvocation {
        ToolInvocation::new(tool, self.python.clone(), self.timeout)
            .args(["-m".to_string(), format!("cli.{module}")])
            .cwd(self.root.clone())
            .env(TOOLKIT_KEY_ENV, self.api_key.clone())
    }
}

/// Parse a JSON document printed by a tool.
///
/// Code fences are stripped; when the output carries log lines around the
/// document, the outermost `{ ... }` span is tried as well.
///
/// # Errors
///
/// Returns [`AnsieyesError::Parse`] if no JSON document of the expected
/// shape can be found.
pub fn parse_json_output<T: DeserializeOwned>(tool: ToolKind, raw: &str) -> Result<T, AnsieyesError> {
    let cleaned = strip_code_fences(raw);
    let first_error = match serde_json::from_str(cleaned) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&cleaned[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(AnsieyesError::Parse(format!(
        "{tool} produced unexpected output: {first_error}"
    )))
}

/// Remove a surrounding markdown code fence.
pub fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    struct Files {
        relevant_files: Vec<String>,
    }

    #[test]
    fn parse_json_output_handles_fences_and_logs() {
        let fenced: Files =
            parse_json_output(ToolKind::Retrieve, "```json\n{\"relevant_files\": [\"a\"]}\n```")
                .unwrap();
        assert_eq!(fenced.relevant_files, vec!["a"]);

        let noisy: Files = parse_json_output(
            ToolKind::Retrieve,
            "INFO loading chunks\n{\"relevant_files\": [\"b\"]}\nINFO done",
        )
        .unwrap();
        assert_eq!(noisy.relevant_files, vec!["b"]);
    }

    #[test]
    fn parse_json_output_rejects_garbage() {
        let err = parse_json_output::<Files>(ToolKind::Retrieve, "no json here").unwrap_err();
        assert!(matches!(err, AnsieyesError::Parse(_)));
        assert!(err.to_string().contains("librarian"));
    }

    #[test]
    fn flag_values_collects_repeats() {
        let inv = ToolInvocation::new(ToolKind::Snapshot, "repomix", Duration::from_secs(1))
            .flag("--include", "a.rs")
            .flag("--style", "plain")
            .flag("--include", "b.rs");
        assert_eq!(inv.flag_values("--include"), vec!["a.rs", "b.rs"]);
        assert_eq!(inv.flag_value("--style"), Some("plain"));
        assert!(inv.flag_value("--remote").is_none());
        assert!(inv.has_flag("--style"));
    }

    #[test]
    fn from_command_splits_prefix_args() {
        let inv = ToolInvocation::from_command(ToolKind::Chunk, "npx repomix", Duration::from_secs(1))
            .arg("--style");
        assert_eq!(inv.program, "npx");
        assert_eq!(inv.args, vec!["repomix", "--style"]);
    }

    #[test]
    fn into_result_prefers_stderr() {
        let err = ToolOutput::failure(2, "  fatal: not found \n")
            .into_result(ToolKind::Clone)
            .unwrap_err();
        assert_eq!(err.to_string(), "git clone failed: fatal: not found");
    }

    #[test]
    fn into_result_falls_back_to_exit_code() {
        let err = ToolOutput::failure(3, "")
            .into_result(ToolKind::Chunk)
            .unwrap_err();
        assert_eq!(err.to_string(), "repomix chunk failed: exit status 3");
        assert!(ToolOutput::ok("fine").into_result(ToolKind::Chunk).is_ok());
    }

    #[test]
    fn toolkit_exports_key_and_cwd() {
        let toolkit = Toolkit::new("python3", PathBuf::from("/opt/kit"), "secret")
            .with_timeout(Duration::from_secs(42));
        let inv = toolkit.invocation(ToolKind::Retrieve, "librarian");
        assert_eq!(inv.args, vec!["-m", "cli.librarian"]);
        assert_eq!(inv.timeout, Duration::from_secs(42));
        assert!(inv
            .env
            .iter()
            .any(|(k, v)| k == TOOLKIT_KEY_ENV && v == "secret"));
    }

    #[test]
    fn toolkit_debug_redacts_key() {
        let toolkit = Toolkit::new("python3", PathBuf::from("/opt/kit"), "secret");
        let debug = format!("{toolkit:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn from_config_requires_api_key() {
        let engine = EngineConfig {
            api_key_env: "ANSIEYES_TEST_NO_SUCH_KEY".into(),
            toolkit_path: Some(PathBuf::from("/")),
            ..EngineConfig::default()
        };
        let err = Toolkit::from_config(&engine).unwrap_err();
        assert!(matches!(err, AnsieyesError::Config(_)));
        assert!(err.to_string().contains("ANSIEYES_TEST_NO_SUCH_KEY"));
    }

    #[test]
    fn from_config_requires_existing_toolkit() {
        let engine = EngineConfig {
            api_key: Some("k".into()),
            toolkit_path: Some(PathBuf::from("/definitely/not/here")),
            ..EngineConfig::default()
        };
        let err = Toolkit::from_config(&engine).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn from_config_applies_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EngineConfig {
            api_key: Some("k".into()),
            toolkit_path: Some(dir.path().to_path_buf()),
            tool_timeout_secs: 30,
            ..EngineConfig::default()
        };
        let toolkit = Toolkit::from_config(&engine).unwrap();
        assert_eq!(toolkit.timeout(), Duration::from_secs(30));
        assert_eq!(toolkit.root(), dir.path());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_invoker_captures_stdout() {
        let inv = ToolInvocation::new(ToolKind::Chunk, "echo", Duration::from_secs(10)).arg("hello");
        let out = ProcessInvoker.invoke(&inv).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_invoker_reports_nonzero_exit() {
        let inv = ToolInvocation::new(ToolKind::Chunk, "false", Duration::from_secs(10));
        let out = ProcessInvoker.invoke(&inv).await.unwrap();
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_invoker_times_out() {
        let inv =
            ToolInvocation::new(ToolKind::Clone, "sleep", Duration::from_millis(100)).arg("5");
        let err = ProcessInvoker.invoke(&inv).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn process_invoker_reports_spawn_failure() {
        let inv = ToolInvocation::new(
            ToolKind::Analyze,
            "ansieyes-no-such-binary-xyz",
            Duration::from_secs(1),
        );
        let err = ProcessInvoker.invoke(&inv).await.unwrap_err();
        assert!(matches!(err, AnsieyesError::Tool { .. }));
        assert!(err.to_string().contains("failed to start"));
    }
}
