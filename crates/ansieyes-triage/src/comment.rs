//! Markdown comment rendering for triage outcomes.
//!
//! [`format_comment`] is pure: the same outcome always renders the same text.

use std::fmt::Write;

use ansieyes_core::{
    InjectionCheckResult, LibrarianResult, StructuredAnalysis, SurgeonFindings, TerminalState,
    TriageOutcome,
};

/// Heading of every Ansieyes comment.
pub const REPORT_HEADER: &str = "## 🤖 Ansieyes Report";

/// Heading the analyzer puts on pre-formatted triage reports.
pub const UPSTREAM_TRIAGE_BANNER: &str = "## 🤖 AI Two-Pass Issue Triage";

const FOOTER: &str = "---\n\n<sub>🤖 *This analysis used the Two-Pass Architecture: \
Librarian identified relevant files, then Surgeon performed deep analysis.*</sub>";

/// Render `outcome` as the comment to post.
///
/// The template follows the same precedence as label derivation: blocked,
/// duplicate, complete, then incomplete.
///
/// # Examples
///
/// ```
/// use ansieyes_core::{LibrarianResult, TriageOutcome};
/// use ansieyes_triage::comment::format_comment;
///
/// let outcome = TriageOutcome {
///     librarian: Some(LibrarianResult::default()),
///     ..TriageOutcome::default()
/// };
/// let text = format_comment(&outcome);
/// assert!(text.starts_with("## 🤖 Ansieyes Report"));
/// assert!(text.contains("could not identify any files"));
/// ```
pub fn format_comment(outcome: &TriageOutcome) -> String {
    match outcome.terminal_state() {
        TerminalState::Blocked => blocked_notice("issue", outcome.injection.as_ref()),
        TerminalState::Duplicate => duplicate(outcome),
        TerminalState::Complete => complete(outcome),
        state @ (TerminalState::NoRelevantFiles | TerminalState::Failed) => {
            incomplete(outcome, state)
        }
    }
}

fn percent(score: f64) -> f64 {
    score.clamp(0.0, 1.0) * 100.0
}

/// Notice posted instead of an analysis when the security gate blocks.
pub(crate) fn blocked_notice(subject: &str, injection: Option<&InjectionCheckResult>) -> String {
    let mut c = String::new();
    let _ = writeln!(c, "## 🛡️ Security Check Failed\n");
    let _ = writeln!(
        c,
        "This {subject} was not analyzed because its content matched patterns \
         associated with prompt injection.\n"
    );
    if let Some(check) = injection {
        let _ = writeln!(
            c,
            "**Risk Level**: `{}`  ",
            check.risk_level.to_string().to_uppercase()
        );
        let _ = writeln!(c, "**Confidence**: `{:.0}%`", percent(check.confidence));
        if !check.detected_patterns.is_empty() {
            let patterns: Vec<String> = check
                .detected_patterns
                .iter()
                .map(|p| format!("`{p}`"))
                .collect();
            let _ = writeln!(c, "\n**Detected Patterns**: {}", patterns.join(", "));
        }
        c.push('\n');
    }
    let _ = writeln!(
        c,
        "A maintainer can review the {subject}, edit it, and request analysis again.\n"
    );
    c.push_str("---\n\n<sub>🤖 *Blocked by the Ansieyes security gate.*</sub>");
    c
}

fn duplicate(outcome: &TriageOutcome) -> String {
    let mut c = format!("{REPORT_HEADER}\n\n");
    let Some(dup) = &outcome.duplicate else {
        return c;
    };
    c.push_str("### 🔍 Duplicate Issue Detected\n\n");
    match &dup.duplicate_of {
        Some(of) if !of.title.is_empty() => {
            let _ = writeln!(c, "This issue appears to be a duplicate of #{} ({})\n", of.id, of.title);
        }
        Some(of) => {
            let _ = writeln!(c, "This issue appears to be a duplicate of #{}\n", of.id);
        }
        None => c.push_str("This issue appears to be a duplicate of an existing issue.\n\n"),
    }
    let _ = writeln!(c, "**Similarity Score**: {:.1}%", percent(dup.similarity_score));
    let _ = writeln!(c, "**Confidence**: {:.1}%\n", percent(dup.confidence_score));
    if !dup.reasons.is_empty() {
        c.push_str("#### Why\n\n");
        for reason in &dup.reasons {
            let _ = writeln!(c, "- {reason}");
        }
        c.push('\n');
    }
    c
}

fn librarian_section(c: &mut String, librarian: &LibrarianResult) {
    let files = &librarian.relevant_files;
    c.push_str("### 📚 Pass 1: Librarian (File Identification)\n\n");
    let _ = writeln!(
        c,
        "Identified **{}** relevant file(s) for deep analysis:\n",
        files.len()
    );
    c.push_str("<details>\n<summary><b>View Identified Files</b></summary>\n\n");
    for (i, file) in files.iter().enumerate() {
        let _ = writeln!(c, "{}. `{file}`", i + 1);
    }
    c.push_str("\n</details>\n\n---\n\n");
}

fn surgeon_section(c: &mut String, analysis: &StructuredAnalysis) {
    c.push_str("### 🔬 Pass 2: Surgeon (Deep Analysis)\n\n");
    let _ = writeln!(c, "**Type**: `{}`  ", analysis.issue_type.to_uppercase());
    let _ = writeln!(c, "**Severity**: `{}`  ", analysis.severity.to_uppercase());
    let _ = writeln!(
        c,
        "**Confidence**: `{:.0}%`\n",
        percent(analysis.confidence_score)
    );
    if let Some(summary) = &analysis.analysis_summary {
        let _ = writeln!(c, "#### Summary\n\n{summary}\n");
    }
    if let Some(cause) = &analysis.root_cause {
        let _ = writeln!(c, "#### Root Cause\n\n> {cause}\n");
    }
    if !analysis.proposed_solutions.is_empty() {
        c.push_str("#### Proposed Solutions\n\n");
        for (i, solution) in analysis.proposed_solutions.iter().enumerate() {
            let _ = writeln!(c, "{}. {solution}", i + 1);
        }
        c.push('\n');
    }
}

fn complete(outcome: &TriageOutcome) -> String {
    match outcome.surgeon.as_ref().and_then(|s| s.findings.as_ref()) {
        Some(SurgeonFindings::Report(text)) => text.replace(UPSTREAM_TRIAGE_BANNER, REPORT_HEADER),
        Some(SurgeonFindings::Structured(analysis)) => {
            let mut c = format!("{REPORT_HEADER}\n\n");
            if let Some(librarian) = &outcome.librarian {
                librarian_section(&mut c, librarian);
            }
            surgeon_section(&mut c, analysis);
            c.push_str(FOOTER);
            c
        }
        None => incomplete(outcome, TerminalState::Failed),
    }
}

fn failure_reason(outcome: &TriageOutcome) -> Option<&str> {
    outcome
        .error
        .as_deref()
        .or_else(|| outcome.librarian.as_ref().and_then(|l| l.error.as_deref()))
        .or_else(|| outcome.surgeon.as_ref().and_then(|s| s.error.as_deref()))
}

fn incomplete(outcome: &TriageOutcome, state: TerminalState) -> String {
    let mut c = format!("{REPORT_HEADER}\n\n### ⚠️ Triage Incomplete\n\n");
    if state == TerminalState::NoRelevantFiles {
        c.push_str(
            "The Librarian could not identify any files relevant to this issue, \
             so no deep analysis was performed. Adding reproduction steps, file \
             names or stack traces to the issue can help.\n\n",
        );
    } else {
        match failure_reason(outcome) {
            Some(reason) => {
                let _ = writeln!(c, "Analysis could not be completed:\n\n```\n{}\n```\n", reason.trim());
            }
            None => c.push_str("Analysis could not be completed.\n\n"),
        }
    }
    if let Some(librarian) = outcome.librarian.as_ref().filter(|l| !l.relevant_files.is_empty()) {
        librarian_section(&mut c, librarian);
    } else {
        c.push_str("---\n\n");
    }
    c.push_str("<sub>🤖 *A maintainer will follow up on this issue.*</sub>");
    c
}
