//! Surgeon: deep analysis of the targeted bundle.

use std::path::{Path, PathBuf};

use ansieyes_core::{AnsieyesError, RepoConfig, StructuredAnalysis, SurgeonFindings, SurgeonResult};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::resources::ResourceManager;
use crate::tool::{strip_code_fences, ToolInvoker, ToolKind, Toolkit};

/// Extra attempts after a failed analysis call.
pub const SURGEON_RETRIES: usize = 2;

/// Per-repository analysis settings resolved from `.ansieyes.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisOverrides {
    /// Model to use instead of the toolkit default.
    pub model: Option<String>,
    /// Absolute path of a prompt template inside the repository.
    pub custom_prompt: Option<PathBuf>,
}

impl AnalysisOverrides {
    /// Read overrides from `repo_root`.
    ///
    /// A missing config gives no overrides; an unreadable or invalid one, or
    /// a prompt path that escapes the repository, is logged and ignored.
    pub fn load(repo_root: &Path) -> Self {
        let config = match RepoConfig::load(repo_root) {
            Ok(Some(config)) => config,
            Ok(None) => return Self::default(),
            Err(e) => {
                warn!(error = %e, "invalid repository config, using defaults");
                return Self::default();
            }
        };
        let custom_prompt = config.resolved_prompt_path(repo_root);
        if let (Some(requested), None) = (&config.custom_prompt_path, &custom_prompt) {
            warn!(path = %requested, "custom prompt missing or outside repository, ignoring");
        }
        Self {
            model: config.model.filter(|m| !m.trim().is_empty()),
            custom_prompt,
        }
    }
}

#[derive(Deserialize)]
struct AnalysisResponse {
    issue_type: Option<String>,
    severity: Option<String>,
    #[serde(default)]
    confidence_score: f64,
    analysis_summary: Option<String>,
    root_cause_analysis: Option<RootCause>,
    #[serde(default)]
    proposed_solutions: Vec<Solution>,
}

#[derive(Deserialize)]
struct RootCause {
    primary_cause: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Solution {
    Text(String),
    Entry { description: Option<String> },
}

impl From<AnalysisResponse> for StructuredAnalysis {
    fn from(r: AnalysisResponse) -> Self {
        StructuredAnalysis {
            issue_type: r.issue_type.unwrap_or_else(|| "unknown".into()),
            severity: r.severity.unwrap_or_else(|| "unknown".into()),
            confidence_score: r.confidence_score.clamp(0.0, 1.0),
            analysis_summary: r.analysis_summary.filter(|s| !s.trim().is_empty()),
            root_cause: r.root_cause_analysis.and_then(|rc| rc.primary_cause),
            proposed_solutions: r
                .proposed_solutions
                .into_iter()
                .map(|s| match s {
                    Solution::Text(text) => text,
                    Solution::Entry { description } => {
                        description.unwrap_or_else(|| "No description".into())
                    }
                })
                .collect(),
        }
    }
}

/// Interpret analyzer output.
///
/// A JSON object with `issue_type` or `severity` is structured; one with a
/// `report` or `markdown` string, or any non-JSON text, is a report.
///
/// # Errors
///
/// Returns [`AnsieyesError::Tool`] when the output carries an `error`
/// field, or [`AnsieyesError::Parse`] when it is empty or has no findings.
///
/// # Examples
///
/// ```
/// use ansieyes_core::SurgeonFindings;
/// use ansieyes_triage::surgeon::parse_findings;
///
/// let findings = parse_findings(r#"{"issue_type": "bug", "severity": "high"}"#).unwrap();
/// assert!(matches!(findings, SurgeonFindings::Structured(_)));
///
/// let findings = parse_findings("**Type**: `BUG`").unwrap();
/// assert!(matches!(findings, SurgeonFindings::Report(_)));
///
/// assert!(parse_findings("   ").is_err());
/// ```
pub fn parse_findings(raw: &str) -> Result<SurgeonFindings, AnsieyesError> {
    let cleaned = strip_code_fences(raw);
    if cleaned.is_empty() {
        return Err(AnsieyesError::Parse("analysis produced no output".into()));
    }

    let value: Value = match serde_json::from_str(cleaned) {
        Ok(value) => value,
        Err(_) => return Ok(SurgeonFindings::Report(cleaned.to_string())),
    };

    match value {
        Value::Object(map) => {
            if let Some(error) = map.get("error").filter(|e| !e.is_null()) {
                let message = error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(AnsieyesError::Tool {
                    tool: ToolKind::Analyze.to_string(),
                    message,
                });
            }
            if map.contains_key("issue_type") || map.contains_key("severity") {
                let response: AnalysisResponse = serde_json::from_value(Value::Object(map))
                    .map_err(|e| AnsieyesError::Parse(format!("malformed analysis: {e}")))?;
                return Ok(SurgeonFindings::Structured(response.into()));
            }
            ["report", "markdown"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .filter(|text| !text.trim().is_empty())
                .map(|text| SurgeonFindings::Report(text.to_string()))
                .ok_or_else(|| AnsieyesError::Parse("analysis output has no findings".into()))
        }
        Value::String(text) if !text.trim().is_empty() => Ok(SurgeonFindings::Report(text)),
        _ => Err(AnsieyesError::Parse(
            "analysis output is not an object".into(),
        )),
    }
}

/// Tool failures and timeouts may pass on another attempt; unusable output
/// will not.
fn is_retryable(error: &AnsieyesError) -> bool {
    matches!(
        error,
        AnsieyesError::Tool { .. } | AnsieyesError::Timeout { .. }
    )
}

/// Runs the toolkit's `analyze` module with bounded retries.
pub struct Surgeon<'a> {
    invoker: &'a dyn ToolInvoker,
    toolkit: &'a Toolkit,
}

impl<'a> Surgeon<'a> {
    pub fn new(invoker: &'a dyn ToolInvoker, toolkit: &'a Toolkit) -> Self {
        Self { invoker, toolkit }
    }

    /// Analyze `bundle`. Never fails; errors are recorded on the result.
    pub async fn analyze(
        &self,
        resources: &mut ResourceManager,
        title: &str,
        description: &str,
        bundle: &Path,
        overrides: &AnalysisOverrides,
    ) -> SurgeonResult {
        info!(
            stage = "surgeon",
            model = overrides.model.as_deref().unwrap_or("default"),
            "running deep analysis"
        );
        let mut last_error = String::new();
        for attempt in 1..=SURGEON_RETRIES + 1 {
            match self
                .attempt(resources, title, description, bundle, overrides)
                .await
            {
                Ok(findings) => {
                    info!(stage = "surgeon", attempt, "analysis complete");
                    return SurgeonResult::completed(findings);
                }
                Err(e) => {
                    warn!(stage = "surgeon", attempt, error = %e, "analysis attempt failed");
                    let retryable = is_retryable(&e);
                    last_error = e.to_string();
                    if !retryable {
                        break;
                    }
                }
            }
        }
        SurgeonResult::failed(last_error)
    }

    async fn attempt(
        &self,
        resources: &mut ResourceManager,
        title: &str,
        description: &str,
        bundle: &Path,
        overrides: &AnalysisOverrides,
    ) -> Result<SurgeonFindings, AnsieyesError> {
        let output_file = resources.create_file("ansieyes-surgeon-", ".json")?;
        let mut invocation = self
            .toolkit
            .invocation(ToolKind::Analyze, "analyze")
            .flag("--title", title)
            .flag("--description", description)
            .flag("--source-path", bundle.to_string_lossy())
            .flag("--output", output_file.to_string_lossy())
            .flag("--format", "json");
        if let Some(model) = &overrides.model {
            invocation = invocation.flag("--model", model.as_str());
        }
        if let Some(prompt) = &overrides.custom_prompt {
            invocation = invocation.flag("--custom-prompt", prompt.to_string_lossy());
        }

        let output = self
            .invoker
            .invoke(&invocation)
            .await?
            .into_result(ToolKind::Analyze)?;
        let written = std::fs::read_to_string(&output_file).unwrap_or_default();
        if written.trim().is_empty() {
            parse_findings(&output.stdout)
        } else {
            parse_findings(&written)
        }
    }
}
