//! Issue classification from Surgeon findings.

use ansieyes_core::SurgeonFindings;
use regex::Regex;

/// Category and severity of an analyzed issue, normalized for labeling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Issue category, e.g. `Bug` or `Feature Request`.
    pub issue_type: Option<String>,
    /// Severity level, e.g. `High`.
    pub severity: Option<String>,
}

/// Extracts a [`Classification`] from a pre-formatted report.
pub trait ReportClassifier: Send + Sync {
    /// Classify `report`. Missing captions leave the field `None`.
    fn classify(&self, report: &str) -> Classification;
}

/// Reads `Type:` and `Severity:` captions followed by a backticked value.
///
/// Captions may be bold on either side of the colon.
///
/// # Examples
///
/// ```
/// use ansieyes_triage::report::{CaptionClassifier, ReportClassifier};
///
/// let c = CaptionClassifier::new().classify("**Type**: `FEATURE_REQUEST`\n**Severity:** `high`");
/// assert_eq!(c.issue_type.as_deref(), Some("Feature Request"));
/// assert_eq!(c.severity.as_deref(), Some("High"));
/// ```
#[derive(Debug, Clone)]
pub struct CaptionClassifier {
    type_caption: Option<Regex>,
    severity_caption: Option<Regex>,
}

impl Default for CaptionClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn caption(name: &str) -> Option<Regex> {
    Regex::new(&format!(r"\b{name}\s*(?:\*\*)?\s*:\s*(?:\*\*)?\s*`([^`\n]+)`")).ok()
}

fn capture(re: Option<&Regex>, text: &str) -> Option<String> {
    re?.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| normalize_label_value(m.as_str()))
        .filter(|v| !v.is_empty())
}

impl CaptionClassifier {
    pub fn new() -> Self {
        Self {
            type_caption: caption("Type"),
            severity_caption: caption("Severity"),
        }
    }
}

impl ReportClassifier for CaptionClassifier {
    fn classify(&self, report: &str) -> Classification {
        Classification {
            issue_type: capture(self.type_caption.as_ref(), report),
            severity: capture(self.severity_caption.as_ref(), report),
        }
    }
}

/// Classify findings, preferring structured fields over report captions.
pub fn classify_findings(
    findings: &SurgeonFindings,
    classifier: &dyn ReportClassifier,
) -> Classification {
    match findings {
        SurgeonFindings::Structured(analysis) => {
            let field = |raw: &str| Some(normalize_label_value(raw)).filter(|v| !v.is_empty());
            Classification {
                issue_type: field(&analysis.issue_type),
                severity: field(&analysis.severity),
            }
        }
        SurgeonFindings::Report(text) => classifier.classify(text),
    }
}

/// Underscores to spaces, each word title-cased.
///
/// # Examples
///
/// ```
/// use ansieyes_triage::report::normalize_label_value;
///
/// assert_eq!(normalize_label_value("PERFORMANCE_ISSUE"), "Performance Issue");
/// assert_eq!(normalize_label_value("  bug "), "Bug");
/// ```
pub fn normalize_label_value(raw: &str) -> String {
    raw.replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
