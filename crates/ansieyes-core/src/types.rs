use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of an existing issue, used as a duplicate-detection candidate.
///
/// # Examples
///
/// ```
/// use ansieyes_core::IssueSummary;
///
/// let issue: IssueSummary = serde_json::from_str(r#"{
///     "id": 5,
///     "title": "App crashes at boot",
///     "description": "NPE in launcher",
///     "state": "open",
///     "createdAt": "2024-03-01T10:00:00Z",
///     "url": "https://github.com/acme/app/issues/5"
/// }"#).unwrap();
/// assert_eq!(issue.id, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummary {
    /// Issue number.
    pub id: u64,
    /// Issue title.
    pub title: String,
    /// Issue body.
    #[serde(default)]
    pub description: String,
    /// Tracker state (`open`, `closed`).
    #[serde(default)]
    pub state: String,
    /// When the issue was opened.
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    /// Web URL of the issue.
    #[serde(default)]
    pub url: String,
}

/// Input to one triage run. Immutable for the duration of the run.
///
/// # Examples
///
/// ```
/// use ansieyes_core::TriageRequest;
///
/// let request = TriageRequest::new(
///     "Crash on startup",
///     "NullPointerException on launch",
///     "https://github.com/acme/app",
/// );
/// assert!(request.existing_issues.is_empty());
/// assert!(request.repo_path.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageRequest {
    /// Issue title.
    pub title: String,
    /// Issue body.
    pub description: String,
    /// Clone URL of the repository the issue belongs to.
    pub repo_url: String,
    /// Candidate issues for duplicate detection, in tracker order.
    #[serde(default)]
    pub existing_issues: Vec<IssueSummary>,
    /// Externally owned checkout to analyze instead of cloning.
    pub repo_path: Option<PathBuf>,
    /// Creation time of the issue being triaged.
    pub created_at: Option<DateTime<Utc>>,
}

impl TriageRequest {
    /// Create a request with no candidates, no supplied path and no timestamp.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        repo_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            repo_url: repo_url.into(),
            existing_issues: Vec::new(),
            repo_path: None,
            created_at: None,
        }
    }

    /// Candidates created strictly before this issue.
    ///
    /// `now` stands in for the creation time when the request carries none.
    /// An older issue is never reported as a duplicate of a newer one.
    ///
    /// # Examples
    ///
    /// ```
    /// use ansieyes_core::{IssueSummary, TriageRequest};
    /// use chrono::{Duration, Utc};
    ///
    /// let now = Utc::now();
    /// let candidate = |id, created_at| IssueSummary {
    ///     id,
    ///     title: format!("issue {id}"),
    ///     description: String::new(),
    ///     state: "open".into(),
    ///     created_at,
    ///     url: String::new(),
    /// };
    /// let mut request = TriageRequest::new("t", "d", "https://example.com/repo");
    /// request.created_at = Some(now);
    /// request.existing_issues = vec![
    ///     candidate(1, now - Duration::days(1)),
    ///     candidate(2, now),
    ///     candidate(3, now + Duration::days(1)),
    /// ];
    /// let older = request.older_candidates(now);
    /// assert_eq!(older.len(), 1);
    /// assert_eq!(older[0].id, 1);
    /// ```
    pub fn older_candidates(&self, now: DateTime<Utc>) -> Vec<IssueSummary> {
        let cutoff = self.created_at.unwrap_or(now);
        self.existing_issues
            .iter()
            .filter(|c| c.created_at < cutoff)
            .cloned()
            .collect()
    }
}

/// Discrete classification of a detected manipulation attempt.
///
/// Ordered from least to most severe.
///
/// # Examples
///
/// ```
/// use ansieyes_core::RiskLevel;
///
/// let r: RiskLevel = "high".parse().unwrap();
/// assert!(r.is_blocking());
/// assert!(RiskLevel::Medium < RiskLevel::High);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Nothing suspicious.
    #[default]
    Safe,
    /// Weak signal, logged only.
    Low,
    /// Moderate signal, logged only.
    Medium,
    /// Strong signal, blocks the run.
    High,
    /// Unambiguous attack, blocks the run.
    Critical,
}

impl RiskLevel {
    /// Returns `true` for levels that stop the pipeline.
    pub fn is_blocking(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Safe => write!(f, "safe"),
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "safe" => Ok(RiskLevel::Safe),
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

/// Result of the security gate.
///
/// # Examples
///
/// ```
/// use ansieyes_core::{InjectionCheckResult, RiskLevel};
///
/// let result = InjectionCheckResult::new(RiskLevel::Critical, 0.9, vec!["role_hijack".into()]);
/// assert!(result.is_injection);
/// assert!(result.blocks());
///
/// assert!(!InjectionCheckResult::disabled().blocks());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionCheckResult {
    /// Whether any manipulation pattern was detected.
    pub is_injection: bool,
    /// Highest risk among detected patterns.
    pub risk_level: RiskLevel,
    /// Detector confidence (0.0–1.0).
    pub confidence: f64,
    /// Names of detected patterns, at most [`InjectionCheckResult::MAX_PATTERNS`].
    pub detected_patterns: Vec<String>,
    /// The detector was unavailable and the gate failed open.
    #[serde(default)]
    pub disabled: bool,
}

impl InjectionCheckResult {
    /// Maximum number of pattern names carried in a result.
    pub const MAX_PATTERNS: usize = 5;

    /// Build a result; `is_injection` follows from `risk_level`.
    ///
    /// Confidence is clamped to `[0.0, 1.0]` and patterns are capped.
    pub fn new(risk_level: RiskLevel, confidence: f64, mut detected_patterns: Vec<String>) -> Self {
        detected_patterns.truncate(Self::MAX_PATTERNS);
        Self {
            is_injection: risk_level > RiskLevel::Safe,
            risk_level,
            confidence: confidence.clamp(0.0, 1.0),
            detected_patterns,
            disabled: false,
        }
    }

    /// A clean result.
    pub fn safe() -> Self {
        Self::new(RiskLevel::Safe, 1.0, Vec::new())
    }

    /// The fail-open result used when no detector is available.
    pub fn disabled() -> Self {
        Self {
            confidence: 0.0,
            disabled: true,
            ..Self::safe()
        }
    }

    /// Returns `true` if this result stops the pipeline.
    pub fn blocks(&self) -> bool {
        self.is_injection && self.risk_level.is_blocking()
    }
}

/// Reference to the issue a new report duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRef {
    /// Issue number.
    pub id: u64,
    /// Issue title.
    pub title: String,
}

/// Result of duplicate detection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCheckResult {
    /// Whether the issue duplicates an existing one.
    pub is_duplicate: bool,
    /// The issue it duplicates.
    pub duplicate_of: Option<IssueRef>,
    /// Textual similarity (0.0–1.0).
    pub similarity_score: f64,
    /// Detector confidence (0.0–1.0).
    pub confidence_score: f64,
    /// Explanations offered by the detector.
    #[serde(default)]
    pub reasons: Vec<String>,
    /// Set when the detector failed; `is_duplicate` is then `false`.
    pub error: Option<String>,
}

impl DuplicateCheckResult {
    /// A failed check that lets the run continue.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Files the Librarian selected for deep analysis.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarianResult {
    /// Repository-relative paths, most relevant first.
    pub relevant_files: Vec<String>,
    /// Set when chunking or retrieval failed.
    pub error: Option<String>,
}

impl LibrarianResult {
    /// A failed retrieval with no files.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            relevant_files: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Structured findings from deep analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredAnalysis {
    /// Issue category, e.g. `bug` or `feature_request`.
    pub issue_type: String,
    /// Severity level, e.g. `high`.
    pub severity: String,
    /// Analyzer confidence (0.0–1.0).
    pub confidence_score: f64,
    /// Short narrative of the analysis.
    pub analysis_summary: Option<String>,
    /// Primary root cause, if identified.
    pub root_cause: Option<String>,
    /// Proposed fixes, in order of preference.
    #[serde(default)]
    pub proposed_solutions: Vec<String>,
}

/// Findings from deep analysis: structured fields or a pre-formatted report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SurgeonFindings {
    /// Machine-readable fields.
    Structured(StructuredAnalysis),
    /// Markdown report produced by the analyzer.
    Report(String),
}

/// Result of the Surgeon stage.
///
/// # Examples
///
/// ```
/// use ansieyes_core::{SurgeonFindings, SurgeonResult};
///
/// let done = SurgeonResult::completed(SurgeonFindings::Report("**Type**: `BUG`".into()));
/// assert!(done.is_complete());
/// assert!(!SurgeonResult::failed("timed out").is_complete());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurgeonResult {
    /// Findings, when analysis succeeded.
    pub findings: Option<SurgeonFindings>,
    /// Set when analysis was skipped or failed.
    pub error: Option<String>,
}

impl SurgeonResult {
    /// A successful analysis.
    pub fn completed(findings: SurgeonFindings) -> Self {
        Self {
            findings: Some(findings),
            error: None,
        }
    }

    /// A failed or skipped analysis.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            findings: None,
            error: Some(error.into()),
        }
    }

    /// Returns `true` if findings are present and no error was recorded.
    pub fn is_complete(&self) -> bool {
        self.findings.is_some() && self.error.is_none()
    }
}

/// Final classification of a triage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalState {
    /// The security gate stopped the run.
    Blocked,
    /// The issue duplicates an older one.
    Duplicate,
    /// The Librarian found nothing relevant.
    NoRelevantFiles,
    /// Deep analysis produced findings.
    Complete,
    /// A stage failed or produced unusable output.
    Failed,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalState::Blocked => write!(f, "blocked"),
            TerminalState::Duplicate => write!(f, "duplicate"),
            TerminalState::NoRelevantFiles => write!(f, "no-relevant-files"),
            TerminalState::Complete => write!(f, "complete"),
            TerminalState::Failed => write!(f, "failed"),
        }
    }
}

/// Aggregate result of one triage run.
///
/// Each stage result is present only if the pipeline reached that stage.
///
/// # Examples
///
/// ```
/// use ansieyes_core::{LibrarianResult, TerminalState, TriageOutcome};
///
/// let outcome = TriageOutcome {
///     librarian: Some(LibrarianResult::default()),
///     ..TriageOutcome::default()
/// };
/// assert_eq!(outcome.terminal_state(), TerminalState::NoRelevantFiles);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageOutcome {
    /// Security gate result.
    pub injection: Option<InjectionCheckResult>,
    /// Duplicate detection result.
    pub duplicate: Option<DuplicateCheckResult>,
    /// Librarian result.
    pub librarian: Option<LibrarianResult>,
    /// Surgeon result.
    pub surgeon: Option<SurgeonResult>,
    /// Run-level failure such as a failed clone.
    pub error: Option<String>,
}

impl TriageOutcome {
    /// Returns `true` if the security gate stopped the run.
    pub fn is_blocked(&self) -> bool {
        self.injection.as_ref().is_some_and(|i| i.blocks())
    }

    /// Returns `true` if the issue was found to be a duplicate.
    pub fn is_duplicate(&self) -> bool {
        self.duplicate.as_ref().is_some_and(|d| d.is_duplicate)
    }

    /// Classify the run. Blocked takes precedence over duplicate, which
    /// takes precedence over everything the later stages recorded.
    pub fn terminal_state(&self) -> TerminalState {
        if self.is_blocked() {
            return TerminalState::Blocked;
        }
        if self.is_duplicate() {
            return TerminalState::Duplicate;
        }
        if self.error.is_some() {
            return TerminalState::Failed;
        }
        if let Some(librarian) = &self.librarian {
            if librarian.relevant_files.is_empty() {
                return if librarian.error.is_some() {
                    TerminalState::Failed
                } else {
                    TerminalState::NoRelevantFiles
                };
            }
        }
        match &self.surgeon {
            Some(surgeon) if surgeon.is_complete() => TerminalState::Complete,
            _ => TerminalState::Failed,
        }
    }
}

/// A changed file in a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path of the file.
    pub filename: String,
    /// Change status (`added`, `modified`, `removed`, `renamed`).
    pub status: String,
    /// Lines added.
    pub additions: u64,
    /// Lines deleted.
    pub deletions: u64,
    /// Total lines changed.
    pub changes: u64,
    /// Unified diff patch, absent for binary or very large files.
    pub patch: Option<String>,
}

/// A pull request handed to the review tool.
///
/// Serialized with snake_case keys, the shape the review tool reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrSubmission {
    /// Pull request title.
    pub title: String,
    /// Pull request body.
    #[serde(default)]
    pub body: String,
    /// Web URL of the base repository.
    #[serde(default)]
    pub repo_url: String,
    /// Changed files.
    #[serde(default)]
    pub file_changes: Vec<FileChange>,
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use ansieyes_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summary.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// The markdown comment that would be posted.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
