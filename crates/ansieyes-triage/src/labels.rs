//! Label derivation from a triage outcome.

use ansieyes_core::{TerminalState, TriageOutcome};

use crate::report::{classify_findings, CaptionClassifier, ReportClassifier};

/// Marker applied after a completed or duplicate triage.
pub const PROCESSED_LABEL: &str = "ai-triaged";
/// Applied when the security gate blocks a run.
pub const BLOCKED_LABEL: &str = "security-blocked";
/// Applied alongside [`BLOCKED_LABEL`].
pub const INVALID_LABEL: &str = "invalid";
/// Applied to duplicates.
pub const DUPLICATE_LABEL: &str = "duplicate";
/// Prefix of category labels.
pub const TYPE_PREFIX: &str = "Type :";
/// Prefix of severity labels.
pub const SEVERITY_PREFIX: &str = "Severity :";

const RED: &str = "d73a4a";
const LIGHT_BLUE: &str = "a2eeef";
const GREEN: &str = "0e8a16";
const CRITICAL_RED: &str = "b60205";
const ORANGE: &str = "d93f0b";
const YELLOW: &str = "fbca04";
const GRAY: &str = "cfd3d7";
const DARK_RED: &str = "8b0000";
const NEUTRAL: &str = "ededed";

/// A label name with its hex color (no leading `#`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub color: String,
}

impl Label {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }

    /// A label colored by [`label_color`].
    pub fn colored(name: impl Into<String>) -> Self {
        let name = name.into();
        let color = label_color(&name);
        Self::new(name, color)
    }
}

/// Deterministic color for a label name.
///
/// # Examples
///
/// ```
/// use ansieyes_triage::labels::label_color;
///
/// assert_eq!(label_color("Type : Bug"), "d73a4a");
/// assert_eq!(label_color("Severity : Critical"), "b60205");
/// assert_eq!(label_color("Severity : Low"), "0e8a16");
/// assert_eq!(label_color("something-else"), "ededed");
/// ```
pub fn label_color(name: &str) -> &'static str {
    if let Some(value) = name.strip_prefix(TYPE_PREFIX) {
        return type_color(value);
    }
    if let Some(value) = name.strip_prefix(SEVERITY_PREFIX) {
        return severity_color(value);
    }
    match name {
        DUPLICATE_LABEL => GRAY,
        BLOCKED_LABEL => DARK_RED,
        _ => NEUTRAL,
    }
}

fn type_color(value: &str) -> &'static str {
    let value = value.trim().to_lowercase();
    if value.contains("bug") {
        RED
    } else if value.contains("enhancement") {
        LIGHT_BLUE
    } else if value.contains("feature") {
        GREEN
    } else {
        NEUTRAL
    }
}

fn severity_color(value: &str) -> &'static str {
    match value.trim().to_lowercase().as_str() {
        "critical" => CRITICAL_RED,
        "high" => ORANGE,
        "medium" => YELLOW,
        "low" => GREEN,
        _ => NEUTRAL,
    }
}

/// Returns `true` for labels replaced on every re-triage.
pub fn is_stale_label(name: &str) -> bool {
    name.starts_with(TYPE_PREFIX) || name.starts_with(SEVERITY_PREFIX)
}

/// An ordered set of labels, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<Label>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `label` unless one with the same name is present.
    pub fn insert(&mut self, label: Label) {
        if !self.contains(&label.name) {
            self.labels.push(label);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FromIterator<Label> for LabelSet {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        let mut set = LabelSet::new();
        for label in iter {
            set.insert(label);
        }
        set
    }
}

/// Derive labels with the default [`CaptionClassifier`].
///
/// # Examples
///
/// ```
/// use ansieyes_core::{InjectionCheckResult, RiskLevel, TriageOutcome};
/// use ansieyes_triage::labels::derive_labels;
///
/// let outcome = TriageOutcome {
///     injection: Some(InjectionCheckResult::new(RiskLevel::Critical, 0.9, vec![])),
///     ..TriageOutcome::default()
/// };
/// assert_eq!(derive_labels(&outcome).names(), vec!["security-blocked", "invalid"]);
/// ```
pub fn derive_labels(outcome: &TriageOutcome) -> LabelSet {
    derive_labels_with(outcome, &CaptionClassifier::new())
}

/// Derive labels, first match wins: blocked, duplicate, complete, else none.
pub fn derive_labels_with(outcome: &TriageOutcome, classifier: &dyn ReportClassifier) -> LabelSet {
    let mut set = LabelSet::new();
    match outcome.terminal_state() {
        TerminalState::Blocked => {
            set.insert(Label::colored(BLOCKED_LABEL));
            set.insert(Label::colored(INVALID_LABEL));
        }
        TerminalState::Duplicate => {
            set.insert(Label::colored(DUPLICATE_LABEL));
            set.insert(Label::colored(PROCESSED_LABEL));
        }
        TerminalState::Complete => {
            if let Some(findings) = outcome.surgeon.as_ref().and_then(|s| s.findings.as_ref()) {
                let classification = classify_findings(findings, classifier);
                if let Some(issue_type) = classification.issue_type {
                    set.insert(Label::colored(format!("{TYPE_PREFIX} {issue_type}")));
                }
                if let Some(severity) = classification.severity {
                    set.insert(Label::colored(format!("{SEVERITY_PREFIX} {severity}")));
                }
            }
            set.insert(Label::colored(PROCESSED_LABEL));
        }
        TerminalState::NoRelevantFiles | TerminalState::Failed => {}
    }
    set
}
