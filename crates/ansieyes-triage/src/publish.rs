//! Posting triage and review results back to the issue tracker.

use ansieyes_core::{AnsieyesError, TriageOutcome};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::comment::format_comment;
use crate::labels::{derive_labels, is_stale_label, Label, LabelSet};
use crate::review::{format_review_comment, ReviewOutcome};

/// The issue tracker operations the publisher needs.
///
/// Pull requests share the issue number space, so the same calls serve
/// both issues and pull requests.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Names of the labels currently on issue `number`.
    async fn issue_labels(&self, number: u64) -> Result<Vec<String>, AnsieyesError>;

    /// Create `label` in the repository if it does not exist yet.
    async fn ensure_label(&self, label: &Label) -> Result<(), AnsieyesError>;

    /// Set the labels of issue `number` to exactly `labels`.
    async fn replace_issue_labels(&self, number: u64, labels: &[String])
        -> Result<(), AnsieyesError>;

    /// Post `body` as a comment on issue `number`.
    async fn post_comment(&self, number: u64, body: &str) -> Result<(), AnsieyesError>;
}

/// Combine labels already on an issue with freshly derived ones.
///
/// Stale `Type :` and `Severity :` labels are dropped; other existing labels
/// keep their position. Derived labels are appended in order.
///
/// # Examples
///
/// ```
/// use ansieyes_triage::labels::{Label, LabelSet};
/// use ansieyes_triage::publish::merge_labels;
///
/// let derived: LabelSet = [Label::colored("Type : Feature"), Label::colored("ai-triaged")]
///     .into_iter()
///     .collect();
/// let existing = vec!["Type : Bug".to_string(), "help wanted".to_string()];
/// assert_eq!(
///     merge_labels(&existing, &derived),
///     vec!["help wanted", "Type : Feature", "ai-triaged"]
/// );
/// ```
pub fn merge_labels(existing: &[String], derived: &LabelSet) -> Vec<String> {
    let mut merged: Vec<String> = existing
        .iter()
        .filter(|name| !is_stale_label(name))
        .cloned()
        .collect();
    for name in derived.names() {
        if !merged.contains(&name) {
            merged.push(name);
        }
    }
    merged
}

/// What [`publish_outcome`] changed on the tracker.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// The comment was accepted by the tracker.
    pub comment_posted: bool,
    /// Labels on the issue after publishing.
    pub labels: Vec<String>,
    /// Stale labels that were removed.
    pub removed: Vec<String>,
}

/// Post the triage comment for `outcome` on issue `number` and update its
/// labels.
///
/// Labels are applied even when the comment fails.
///
/// # Errors
///
/// Returns the label error if labeling fails, otherwise the comment error if
/// posting failed.
pub async fn publish_outcome(
    tracker: &dyn IssueTracker,
    number: u64,
    outcome: &TriageOutcome,
) -> Result<PublishReport, AnsieyesError> {
    let body = format_comment(outcome);
    let comment = tracker.post_comment(number, &body).await;
    if let Err(e) = &comment {
        warn!(issue = number, error = %e, "failed to post triage comment");
    }

    let mut report = apply_labels(tracker, number, &derive_labels(outcome)).await?;
    comment?;
    report.comment_posted = true;
    info!(issue = number, labels = ?report.labels, "published triage result");
    Ok(report)
}

/// Remove stale labels from issue `number` and add `derived`.
///
/// # Errors
///
/// Returns [`AnsieyesError::GitHub`] if any tracker call fails.
pub async fn apply_labels(
    tracker: &dyn IssueTracker,
    number: u64,
    derived: &LabelSet,
) -> Result<PublishReport, AnsieyesError> {
    let existing = tracker.issue_labels(number).await?;
    let labels = merge_labels(&existing, derived);
    let removed: Vec<String> = existing
        .iter()
        .filter(|name| !labels.contains(name))
        .cloned()
        .collect();

    for label in derived.iter() {
        tracker.ensure_label(label).await?;
    }
    if labels != existing {
        tracker.replace_issue_labels(number, &labels).await?;
    } else {
        debug!(issue = number, "labels unchanged");
    }

    Ok(PublishReport {
        comment_posted: false,
        labels,
        removed,
    })
}

/// Post the review comment for `outcome` on pull request `number`.
///
/// Reviews carry no labels.
///
/// # Errors
///
/// Returns [`AnsieyesError::GitHub`] if the comment cannot be posted.
pub async fn publish_review(
    tracker: &dyn IssueTracker,
    number: u64,
    outcome: &ReviewOutcome,
) -> Result<(), AnsieyesError> {
    tracker
        .post_comment(number, &format_review_comment(outcome))
        .await?;
    info!(pr = number, "published review");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryTracker;
    use ansieyes_core::{
        InjectionCheckResult, LibrarianResult, RiskLevel, StructuredAnalysis, SurgeonFindings,
        SurgeonResult,
    };

    fn completed_bug() -> TriageOutcome {
        TriageOutcome {
            injection: Some(InjectionCheckResult::safe()),
            librarian: Some(LibrarianResult {
                relevant_files: vec!["src/app.py".into()],
                error: None,
            }),
            surgeon: Some(SurgeonResult::completed(SurgeonFindings::Structured(
                StructuredAnalysis {
                    issue_type: "bug".into(),
                    severity: "high".into(),
                    confidence_score: 0.8,
                    analysis_summary: Some("Null config".into()),
                    root_cause: None,
                    proposed_solutions: vec![],
                },
            ))),
            ..TriageOutcome::default()
        }
    }

    #[test]
    fn merge_keeps_unrelated_labels() {
        let derived: LabelSet = [Label::colored("ai-triaged")].into_iter().collect();
        let existing = vec!["ai-triaged".to_string(), "good first issue".to_string()];
        assert_eq!(
            merge_labels(&existing, &derived),
            vec!["ai-triaged", "good first issue"]
        );
    }

    #[tokio::test]
    async fn stale_type_label_is_replaced() {
        let tracker =
            MemoryTracker::new().with_issue_labels(7, &["Type : Feature", "Severity : Low", "ui"]);
        let report = publish_outcome(&tracker, 7, &completed_bug()).await.unwrap();

        assert!(report.comment_posted);
        assert_eq!(report.removed, vec!["Type : Feature", "Severity : Low"]);
        assert_eq!(
            tracker.labels_of(7),
            vec!["ui", "Type : Bug", "Severity : High", "ai-triaged"]
        );
        assert_eq!(tracker.label_color("Type : Bug").as_deref(), Some("d73a4a"));
        assert_eq!(tracker.label_color("Severity : High").as_deref(), Some("d93f0b"));
        assert_eq!(tracker.comments().len(), 1);
    }

    #[tokio::test]
    async fn blocked_outcome_gets_blocked_labels() {
        let tracker = MemoryTracker::new();
        let outcome = TriageOutcome {
            injection: Some(InjectionCheckResult::new(
                RiskLevel::High,
                0.7,
                vec!["instruction_override".into()],
            )),
            ..TriageOutcome::default()
        };
        publish_outcome(&tracker, 2, &outcome).await.unwrap();
        assert_eq!(tracker.labels_of(2), vec!["security-blocked", "invalid"]);
        assert_eq!(tracker.label_color("security-blocked").as_deref(), Some("8b0000"));
    }

    #[tokio::test]
    async fn labels_applied_when_comment_fails() {
        let tracker = MemoryTracker::failing_comments();
        let err = publish_outcome(&tracker, 9, &completed_bug())
            .await
            .unwrap_err();
        assert!(matches!(err, AnsieyesError::GitHub(_)));
        assert!(tracker.labels_of(9).contains(&"ai-triaged".to_string()));
    }

    #[tokio::test]
    async fn incomplete_run_only_removes_stale_labels() {
        let tracker = MemoryTracker::new().with_issue_labels(4, &["Type : Bug", "needs-info"]);
        let outcome = TriageOutcome {
            injection: Some(InjectionCheckResult::safe()),
            librarian: Some(LibrarianResult::default()),
            ..TriageOutcome::default()
        };
        let report = publish_outcome(&tracker, 4, &outcome).await.unwrap();
        assert_eq!(report.labels, vec!["needs-info"]);
        assert_eq!(tracker.labels_of(4), vec!["needs-info"]);
    }

    #[tokio::test]
    async fn review_posts_comment_without_labels() {
        let tracker = MemoryTracker::new();
        let outcome = ReviewOutcome {
            injection: InjectionCheckResult::safe(),
            report: Some("## 🤖 Ansieyes Report\n\nLGTM".into()),
            error: None,
            timed_out: false,
        };
        publish_review(&tracker, 11, &outcome).await.unwrap();
        assert_eq!(tracker.comments(), vec![(11, "## 🤖 Ansieyes Report\n\nLGTM".to_string())]);
        assert!(tracker.labels_of(11).is_empty());
    }
}
