use ansieyes_core::{AnsieyesError, FileChange, IssueSummary, PrSubmission, TriageRequest};
use ansieyes_triage::labels::Label;
use ansieyes_triage::publish::IssueTracker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::reference::IssueReference;

const PER_PAGE: usize = 100;
/// Upper bound on pages fetched when listing issues or pull request files.
const MAX_PAGES: u32 = 10;

/// GitHub client for fetching issues and pull requests.
///
/// # Examples
///
/// ```no_run
/// use ansieyes_github::GitHubClient;
///
/// let client = GitHubClient::new(Some("ghp_xxxx")).unwrap();
/// let repo = client.repository("octocat", "hello-world");
/// ```
pub struct GitHubClient {
    octocrab: octocrab::Octocrab,
}

impl GitHubClient {
    /// Create a client from an explicit token, `GITHUB_TOKEN`, or `GH_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::Config`] if no token is available, or
    /// [`AnsieyesError::GitHub`] if the client cannot be built.
    pub fn new(token: Option<&str>) -> Result<Self, AnsieyesError> {
        let token = match token {
            Some(t) => t.to_string(),
            None => token_from_env().ok_or_else(|| {
                AnsieyesError::Config(
                    "GITHUB_TOKEN not set. Pass --github-token or set GITHUB_TOKEN env var".into(),
                )
            })?,
        };

        let octocrab = octocrab::Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| AnsieyesError::GitHub(format!("failed to create GitHub client: {e}")))?;

        Ok(Self { octocrab })
    }

    /// A handle on one repository.
    pub fn repository(&self, owner: &str, repo: &str) -> Repository<'_> {
        Repository {
            octocrab: &self.octocrab,
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    /// A handle on the repository `reference` points into.
    pub fn repository_of(&self, reference: &IssueReference) -> Repository<'_> {
        self.repository(&reference.owner, &reference.repo)
    }
}

/// The tracker credential from the environment, if any.
pub fn token_from_env() -> Option<String> {
    ["GITHUB_TOKEN", "GH_TOKEN"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|t| !t.trim().is_empty()))
}

#[derive(Deserialize)]
struct RawIssue {
    number: u64,
    title: String,
    body: Option<String>,
    #[serde(default)]
    state: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    html_url: String,
    pull_request: Option<serde_json::Value>,
}

impl RawIssue {
    fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

impl From<RawIssue> for IssueSummary {
    fn from(raw: RawIssue) -> Self {
        IssueSummary {
            id: raw.number,
            title: raw.title,
            description: raw.body.unwrap_or_default(),
            state: raw.state,
            created_at: raw.created_at,
            url: raw.html_url,
        }
    }
}

#[derive(Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Deserialize)]
struct RawPull {
    title: String,
    body: Option<String>,
}

#[derive(Deserialize)]
struct RawFile {
    filename: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    #[serde(default)]
    changes: u64,
    patch: Option<String>,
}

impl From<RawFile> for FileChange {
    fn from(raw: RawFile) -> Self {
        FileChange {
            filename: raw.filename,
            status: raw.status,
            additions: raw.additions,
            deletions: raw.deletions,
            changes: raw.changes,
            patch: raw.patch,
        }
    }
}

/// One GitHub repository, addressed through raw REST routes.
pub struct Repository<'a> {
    octocrab: &'a octocrab::Octocrab,
    owner: String,
    repo: String,
}

fn api_error(action: &str) -> impl Fn(octocrab::Error) -> AnsieyesError + '_ {
    move |e| AnsieyesError::GitHub(format!("failed to {action}: {e}"))
}

impl Repository<'_> {
    fn route(&self, tail: &str) -> String {
        format!("/repos/{}/{}{tail}", self.owner, self.repo)
    }

    /// Web URL of the repository.
    pub fn url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }

    /// Fetch one issue.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::GitHub`] on API errors or if `number` is a
    /// pull request.
    pub async fn fetch_issue(&self, number: u64) -> Result<IssueSummary, AnsieyesError> {
        let raw: RawIssue = self
            .octocrab
            .get(self.route(&format!("/issues/{number}")), None::<&()>)
            .await
            .map_err(api_error("fetch issue"))?;
        if raw.is_pull_request() {
            return Err(AnsieyesError::GitHub(format!(
                "#{number} is a pull request, not an issue"
            )));
        }
        Ok(raw.into())
    }

    /// List issues in any state, excluding pull requests.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::GitHub`] on API errors.
    pub async fn list_issues(&self) -> Result<Vec<IssueSummary>, AnsieyesError> {
        let mut issues = Vec::new();
        for page in 1..=MAX_PAGES {
            let params = [
                ("state", "all".to_string()),
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let batch: Vec<RawIssue> = self
                .octocrab
                .get(self.route("/issues"), Some(&params))
                .await
                .map_err(api_error("list issues"))?;
            let len = batch.len();
            issues.extend(
                batch
                    .into_iter()
                    .filter(|i| !i.is_pull_request())
                    .map(IssueSummary::from),
            );
            if len < PER_PAGE {
                break;
            }
        }
        debug!(repo = %self.url(), count = issues.len(), "listed issues");
        Ok(issues)
    }

    /// Build a triage request for issue `number`, with every other issue of
    /// the repository as a duplicate candidate.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::GitHub`] on API errors.
    pub async fn triage_request(&self, number: u64) -> Result<TriageRequest, AnsieyesError> {
        let issue = self.fetch_issue(number).await?;
        let existing: Vec<IssueSummary> = self
            .list_issues()
            .await?
            .into_iter()
            .filter(|i| i.id != number)
            .collect();

        let mut request = TriageRequest::new(issue.title, issue.description, self.url());
        request.created_at = Some(issue.created_at);
        request.existing_issues = existing;
        Ok(request)
    }

    /// Fetch a pull request with its changed files.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::GitHub`] on API errors.
    pub async fn fetch_pull_request(&self, number: u64) -> Result<PrSubmission, AnsieyesError> {
        let pull: RawPull = self
            .octocrab
            .get(self.route(&format!("/pulls/{number}")), None::<&()>)
            .await
            .map_err(api_error("fetch pull request"))?;

        let mut file_changes = Vec::new();
        for page in 1..=MAX_PAGES {
            let params = [("per_page", PER_PAGE.to_string()), ("page", page.to_string())];
            let batch: Vec<RawFile> = self
                .octocrab
                .get(self.route(&format!("/pulls/{number}/files")), Some(&params))
                .await
                .map_err(api_error("list pull request files"))?;
            let len = batch.len();
            file_changes.extend(batch.into_iter().map(FileChange::from));
            if len < PER_PAGE {
                break;
            }
        }

        Ok(PrSubmission {
            title: pull.title,
            body: pull.body.unwrap_or_default(),
            repo_url: self.url(),
            file_changes,
        })
    }
}

#[async_trait]
impl IssueTracker for Repository<'_> {
    async fn issue_labels(&self, number: u64) -> Result<Vec<String>, AnsieyesError> {
        let labels: Vec<RawLabel> = self
            .octocrab
            .get(self.route(&format!("/issues/{number}/labels")), None::<&()>)
            .await
            .map_err(api_error("list issue labels"))?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    async fn ensure_label(&self, label: &Label) -> Result<(), AnsieyesError> {
        let body = serde_json::json!({ "name": label.name, "color": label.color });
        let created: Result<serde_json::Value, _> =
            self.octocrab.post(self.route("/labels"), Some(&body)).await;
        match created {
            Ok(_) => {
                debug!(label = %label.name, "created label");
                Ok(())
            }
            // 422 means the label already exists.
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code.as_u16() == 422 => {
                Ok(())
            }
            Err(e) => Err(api_error("create label")(e)),
        }
    }

    async fn replace_issue_labels(
        &self,
        number: u64,
        labels: &[String],
    ) -> Result<(), AnsieyesError> {
        let body = serde_json::json!({ "labels": labels });
        let _response: serde_json::Value = self
            .octocrab
            .put(self.route(&format!("/issues/{number}/labels")), Some(&body))
            .await
            .map_err(api_error("set issue labels"))?;
        Ok(())
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<(), AnsieyesError> {
        let body = serde_json::json!({ "body": body });
        let _response: serde_json::Value = self
            .octocrab
            .post(self.route(&format!("/issues/{number}/comments")), Some(&body))
            .await
            .map_err(api_error("post comment"))?;
        Ok(())
    }
}
