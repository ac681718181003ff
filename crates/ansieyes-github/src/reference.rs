use std::fmt;

use ansieyes_core::AnsieyesError;

/// An issue or pull request on GitHub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueReference {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl IssueReference {
    /// Web URL of the repository.
    pub fn repo_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for IssueReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Parse `owner/repo#number` or a GitHub issue / pull request URL.
///
/// # Errors
///
/// Returns [`AnsieyesError::Config`] if the format is invalid.
///
/// # Examples
///
/// ```
/// use ansieyes_github::parse_issue_reference;
///
/// let r = parse_issue_reference("octocat/hello-world#42").unwrap();
/// assert_eq!((r.owner.as_str(), r.repo.as_str(), r.number), ("octocat", "hello-world", 42));
///
/// let r = parse_issue_reference("https://github.com/octocat/hello-world/pull/7").unwrap();
/// assert_eq!(r.number, 7);
/// ```
pub fn parse_issue_reference(reference: &str) -> Result<IssueReference, AnsieyesError> {
    let invalid = || {
        AnsieyesError::Config(format!(
            "invalid issue reference '{reference}', expected owner/repo#number"
        ))
    };
    let reference = reference.trim();

    if let Some(path) = reference
        .strip_prefix("https://github.com/")
        .or_else(|| reference.strip_prefix("http://github.com/"))
    {
        let parts: Vec<&str> = path.trim_end_matches('/').split('/').collect();
        let [owner, repo, kind, number] = parts.as_slice() else {
            return Err(invalid());
        };
        if !matches!(*kind, "issues" | "pull") {
            return Err(invalid());
        }
        return build(owner, repo, number).ok_or_else(invalid);
    }

    let (owner_repo, number) = reference.split_once('#').ok_or_else(invalid)?;
    let (owner, repo) = owner_repo.split_once('/').ok_or_else(invalid)?;
    build(owner, repo, number).ok_or_else(invalid)
}

fn build(owner: &str, repo: &str, number: &str) -> Option<IssueReference> {
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some(IssueReference {
        owner: owner.to_string(),
        repo: repo.to_string(),
        number: number.parse().ok()?,
    })
}
