use std::fmt;
use std::sync::Arc;

use ansieyes_core::{
    AnsieyesConfig, AnsieyesError, SurgeonResult, ToolsConfig, TriageOutcome, TriageRequest,
};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::duplicate::DuplicateDetector;
use crate::gate::{InjectionDetector, SecurityGate};
use crate::librarian::Librarian;
use crate::resources::ResourceManager;
use crate::snapshot::{SnapshotBuilder, EMPTY_SNAPSHOT};
use crate::surgeon::{AnalysisOverrides, Surgeon};
use crate::tool::{ToolInvoker, Toolkit};

/// Issue triage orchestrator.
///
/// Runs security gate, duplicate detection, repository acquisition,
/// Librarian, snapshot and Surgeon in that order, stopping at the first
/// terminal state. Every temporary artifact is released before
/// [`TriageEngine::triage`] returns.
///
/// The engine holds only immutable configuration and shared collaborators,
/// so one instance can serve concurrent runs.
pub struct TriageEngine {
    toolkit: Toolkit,
    tools: ToolsConfig,
    invoker: Arc<dyn ToolInvoker>,
    gate: SecurityGate,
}

impl fmt::Debug for TriageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriageEngine")
            .field("toolkit", &self.toolkit)
            .field("tools", &self.tools)
            .field("gate", &self.gate)
            .finish()
    }
}

impl TriageEngine {
    /// Build an engine from configuration.
    ///
    /// The detector is used only when `[security] enabled` is set; otherwise
    /// the gate fails open.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::Config`] if the model API key or the toolkit
    /// location is missing.
    pub fn new(
        config: &AnsieyesConfig,
        invoker: Arc<dyn ToolInvoker>,
        detector: Option<Arc<dyn InjectionDetector>>,
    ) -> Result<Self, AnsieyesError> {
        let toolkit = Toolkit::from_config(&config.engine)?;
        let gate = if config.security.enabled {
            SecurityGate::new(detector)
        } else {
            SecurityGate::default()
        };
        Ok(Self::from_parts(toolkit, config.tools.clone(), invoker, gate))
    }

    /// Assemble an engine from already-built parts.
    pub fn from_parts(
        toolkit: Toolkit,
        tools: ToolsConfig,
        invoker: Arc<dyn ToolInvoker>,
        gate: SecurityGate,
    ) -> Self {
        Self {
            toolkit,
            tools,
            invoker,
            gate,
        }
    }

    /// Triage one issue. Never fails: stage errors are recorded on the
    /// returned outcome.
    pub async fn triage(&self, request: &TriageRequest) -> TriageOutcome {
        let mut resources = ResourceManager::new(self.tools.git.clone());
        let outcome = self.run(request, &mut resources).await;

        let report = resources.release_all();
        if !report.is_clean() {
            warn!(failed = report.failed.len(), "some temporary artifacts were not removed");
        }
        info!(state = %outcome.terminal_state(), "triage finished");
        outcome
    }

    async fn run(&self, request: &TriageRequest, resources: &mut ResourceManager) -> TriageOutcome {
        let invoker = self.invoker.as_ref();
        let mut outcome = TriageOutcome::default();

        info!(stage = "security", "screening issue text");
        let text = format!("{}\n\n{}", request.title, request.description);
        let injection = self.gate.check(&text).await;
        let blocked = injection.blocks();
        outcome.injection = Some(injection);
        if blocked {
            return outcome;
        }

        let candidates = request.older_candidates(Utc::now());
        if candidates.is_empty() {
            debug!(stage = "duplicate", "no older candidates, skipping");
        } else {
            let duplicate = DuplicateDetector::new(invoker, &self.toolkit)
                .check(resources, &request.title, &request.description, &candidates)
                .await;
            let is_duplicate = duplicate.is_duplicate;
            outcome.duplicate = Some(duplicate);
            if is_duplicate {
                return outcome;
            }
        }

        let repo = match resources
            .acquire_repo(invoker, &request.repo_url, request.repo_path.as_deref())
            .await
        {
            Ok(repo) => repo,
            Err(e) => {
                warn!(stage = "clone", error = %e, "repository unavailable");
                outcome.error = Some(match e {
                    AnsieyesError::Resource(message) => message,
                    other => other.to_string(),
                });
                return outcome;
            }
        };

        let librarian = Librarian::new(invoker, &self.toolkit, &self.tools.repomix)
            .identify_relevant_files(resources, &request.title, &request.description, &repo.path)
            .await;
        let files = librarian.relevant_files.clone();
        outcome.librarian = Some(librarian);
        if files.is_empty() {
            return outcome;
        }

        let bundle = SnapshotBuilder::new(invoker, &self.tools.repomix)
            .build(resources, &files, &request.repo_url)
            .await;
        let surgeon = match bundle {
            Some(bundle) => {
                let overrides = AnalysisOverrides::load(&repo.path);
                Surgeon::new(invoker, &self.toolkit)
                    .analyze(
                        resources,
                        &request.title,
                        &request.description,
                        &bundle,
                        &overrides,
                    )
                    .await
            }
            None => SurgeonResult::failed(EMPTY_SNAPSHOT),
        };
        outcome.surgeon = Some(surgeon);
        outcome
    }
}
