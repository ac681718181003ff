//! Duplicate detection against older issues.

use ansieyes_core::{AnsieyesError, DuplicateCheckResult, IssueRef, IssueSummary};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::resources::ResourceManager;
use crate::tool::{parse_json_output, ToolInvoker, ToolKind, Toolkit};

#[derive(Serialize)]
struct CandidateRecord<'a> {
    issue_id: u64,
    title: &'a str,
    description: &'a str,
    status: &'a str,
    created_at: String,
    url: &'a str,
}

impl<'a> From<&'a IssueSummary> for CandidateRecord<'a> {
    fn from(issue: &'a IssueSummary) -> Self {
        Self {
            issue_id: issue.id,
            title: &issue.title,
            description: &issue.description,
            status: &issue.state,
            created_at: issue.created_at.to_rfc3339(),
            url: &issue.url,
        }
    }
}

#[derive(Deserialize)]
struct DuplicateResponse {
    #[serde(default)]
    is_duplicate: bool,
    duplicate_of: Option<DuplicateOf>,
    #[serde(default)]
    similarity_score: f64,
    #[serde(default)]
    confidence_score: f64,
    #[serde(default)]
    reasons: Vec<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct DuplicateOf {
    issue_id: u64,
    #[serde(default)]
    title: String,
}

impl From<DuplicateResponse> for DuplicateCheckResult {
    fn from(r: DuplicateResponse) -> Self {
        if let Some(error) = r.error {
            return DuplicateCheckResult::failed(error);
        }
        let duplicate_of = r.duplicate_of.map(|d| IssueRef {
            id: d.issue_id,
            title: d.title,
        });
        DuplicateCheckResult {
            // A duplicate without a target cannot be reported.
            is_duplicate: r.is_duplicate && duplicate_of.is_some(),
            duplicate_of,
            similarity_score: r.similarity_score.clamp(0.0, 1.0),
            confidence_score: r.confidence_score.clamp(0.0, 1.0),
            reasons: r.reasons,
            error: None,
        }
    }
}

/// Compares a new issue against older candidates through the toolkit's
/// `duplicate_check` module.
pub struct DuplicateDetector<'a> {
    invoker: &'a dyn ToolInvoker,
    toolkit: &'a Toolkit,
}

impl<'a> DuplicateDetector<'a> {
    pub fn new(invoker: &'a dyn ToolInvoker, toolkit: &'a Toolkit) -> Self {
        Self { invoker, toolkit }
    }

    /// Check `title`/`description` against `candidates`.
    ///
    /// Tool failures yield `is_duplicate = false` with `error` set.
    pub async fn check(
        &self,
        resources: &mut ResourceManager,
        title: &str,
        description: &str,
        candidates: &[IssueSummary],
    ) -> DuplicateCheckResult {
        if candidates.is_empty() {
            return DuplicateCheckResult::default();
        }
        info!(stage = "duplicate", candidates = candidates.len(), "checking for duplicates");
        match self.run(resources, title, description, candidates).await {
            Ok(result) => {
                if let Some(error) = &result.error {
                    warn!(stage = "duplicate", %error, "duplicate check reported an error");
                } else if let (true, Some(of)) = (result.is_duplicate, &result.duplicate_of) {
                    info!(stage = "duplicate", duplicate_of = of.id, "duplicate detected");
                }
                result
            }
            Err(e) => {
                warn!(stage = "duplicate", error = %e, "duplicate check failed, continuing");
                DuplicateCheckResult::failed(e.to_string())
            }
        }
    }

    async fn run(
        &self,
        resources: &mut ResourceManager,
        title: &str,
        description: &str,
        candidates: &[IssueSummary],
    ) -> Result<DuplicateCheckResult, AnsieyesError> {
        let records: Vec<CandidateRecord<'_>> = candidates.iter().map(Into::into).collect();
        let issues_file = resources.create_file("ansieyes-issues-", ".json")?;
        std::fs::write(&issues_file, serde_json::to_vec(&records)?)?;

        let invocation = self
            .toolkit
            .invocation(ToolKind::DuplicateCheck, "duplicate_check")
            .flag("--title", title)
            .flag("--description", description)
            .flag("--issues", issues_file.to_string_lossy())
            .flag("--output", "json");

        let output = self
            .invoker
            .invoke(&invocation)
            .await?
            .into_result(ToolKind::DuplicateCheck)?;
        let response: DuplicateResponse =
            parse_json_output(ToolKind::DuplicateCheck, &output.stdout)?;
        Ok(response.into())
    }
}
