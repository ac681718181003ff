//! In-memory fakes for the tool and tracker boundaries (testing only)
//!
//! Provides `ScriptedInvoker` and `MemoryTracker`, which satisfy the
//! [`ToolInvoker`] and [`IssueTracker`] contracts without starting processes
//! or talking to a network.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use ansieyes_core::AnsieyesError;
use async_trait::async_trait;

use crate::labels::Label;
use crate::publish::IssueTracker;
use crate::tool::{ToolInvocation, ToolInvoker, ToolKind, ToolOutput};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// ScriptedInvoker
// ---------------------------------------------------------------------------

type Responder = dyn Fn(&ToolInvocation) -> Result<ToolOutput, AnsieyesError> + Send + Sync;

/// Tool invoker that answers every call with a closure and records it.
///
/// The closure runs synchronously and may write files the real tool would
/// have produced.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ansieyes_triage::fakes::ScriptedInvoker;
/// use ansieyes_triage::tool::{ToolInvocation, ToolInvoker, ToolKind, ToolOutput};
///
/// # tokio_test_block(async {
/// let invoker = ScriptedInvoker::new(|_| Ok(ToolOutput::ok("done")));
/// let inv = ToolInvocation::new(ToolKind::Chunk, "repomix", Duration::from_secs(1));
/// let out = invoker.invoke(&inv).await.unwrap();
/// assert_eq!(out.stdout, "done");
/// assert_eq!(invoker.count(ToolKind::Chunk), 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f);
/// # }
/// ```
pub struct ScriptedInvoker {
    responder: Box<Responder>,
    calls: Mutex<Vec<ToolInvocation>>,
}

impl std::fmt::Debug for ScriptedInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedInvoker")
            .field("calls", &lock(&self.calls).len())
            .finish()
    }
}

impl ScriptedInvoker {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ToolInvocation) -> Result<ToolOutput, AnsieyesError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call succeeds with empty output.
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(ToolOutput::ok("")))
    }

    /// All recorded invocations, in call order.
    pub fn calls(&self) -> Vec<ToolInvocation> {
        lock(&self.calls).clone()
    }

    /// Recorded invocations of one tool kind.
    pub fn calls_for(&self, tool: ToolKind) -> Vec<ToolInvocation> {
        lock(&self.calls)
            .iter()
            .filter(|inv| inv.tool == tool)
            .cloned()
            .collect()
    }

    /// Number of recorded invocations of one tool kind.
    pub fn count(&self, tool: ToolKind) -> usize {
        lock(&self.calls).iter().filter(|inv| inv.tool == tool).count()
    }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolOutput, AnsieyesError> {
        lock(&self.calls).push(invocation.clone());
        (self.responder)(invocation)
    }
}

// ---------------------------------------------------------------------------
// MemoryTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TrackerState {
    issue_labels: HashMap<u64, Vec<String>>,
    repo_labels: BTreeMap<String, String>,
    comments: Vec<(u64, String)>,
}

/// In-memory issue tracker backed by per-issue label lists.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    state: Mutex<TrackerState>,
    fail_comments: bool,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker whose comment endpoint always fails.
    pub fn failing_comments() -> Self {
        Self {
            fail_comments: true,
            ..Self::default()
        }
    }

    /// Seed labels already applied to `number`.
    pub fn with_issue_labels(self, number: u64, labels: &[&str]) -> Self {
        {
            let mut state = lock(&self.state);
            state
                .issue_labels
                .insert(number, labels.iter().map(|l| l.to_string()).collect());
            for label in labels {
                state
                    .repo_labels
                    .entry(label.to_string())
                    .or_insert_with(|| "ededed".into());
            }
        }
        self
    }

    /// Labels currently applied to `number`.
    pub fn labels_of(&self, number: u64) -> Vec<String> {
        lock(&self.state)
            .issue_labels
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    /// Color of a repository label, if it exists.
    pub fn label_color(&self, name: &str) -> Option<String> {
        lock(&self.state).repo_labels.get(name).cloned()
    }

    /// Posted comments as `(issue, body)`, in order.
    pub fn comments(&self) -> Vec<(u64, String)> {
        lock(&self.state).comments.clone()
    }
}

#[async_trait]
impl IssueTracker for MemoryTracker {
    async fn issue_labels(&self, number: u64) -> Result<Vec<String>, AnsieyesError> {
        Ok(self.labels_of(number))
    }

    async fn ensure_label(&self, label: &Label) -> Result<(), AnsieyesError> {
        lock(&self.state)
            .repo_labels
            .entry(label.name.clone())
            .or_insert_with(|| label.color.clone());
        Ok(())
    }

    async fn replace_issue_labels(
        &self,
        number: u64,
        labels: &[String],
    ) -> Result<(), AnsieyesError> {
        let mut state = lock(&self.state);
        if let Some(missing) = labels.iter().find(|l| !state.repo_labels.contains_key(*l)) {
            return Err(AnsieyesError::GitHub(format!("label '{missing}' does not exist")));
        }
        state.issue_labels.insert(number, labels.to_vec());
        Ok(())
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<(), AnsieyesError> {
        if self.fail_comments {
            return Err(AnsieyesError::GitHub("comment endpoint unavailable".into()));
        }
        lock(&self.state).comments.push((number, body.to_string()));
        Ok(())
    }
}
