//! Targeted code bundle for deep analysis.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ansieyes_core::AnsieyesError;
use tracing::{info, warn};

use crate::resources::ResourceManager;
use crate::tool::{ToolInvocation, ToolInvoker, ToolKind};

/// Time budget for one snapshot attempt.
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(300);

/// Surgeon error recorded when no usable bundle could be built.
pub const EMPTY_SNAPSHOT: &str = "Failed to generate targeted repomix";

/// Builds a plain-text bundle of the selected files with `repomix --remote`.
pub struct SnapshotBuilder<'a> {
    invoker: &'a dyn ToolInvoker,
    repomix: &'a str,
}

fn non_empty(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(invoker: &'a dyn ToolInvoker, repomix: &'a str) -> Self {
        Self { invoker, repomix }
    }

    /// Bundle `files` from `repo_url`.
    ///
    /// A failed, timed-out or empty targeted attempt is retried once for the
    /// whole repository. Returns `None` if neither attempt produced a
    /// non-empty bundle.
    pub async fn build(
        &self,
        resources: &mut ResourceManager,
        files: &[String],
        repo_url: &str,
    ) -> Option<PathBuf> {
        let bundle = match resources.create_file("ansieyes-snapshot-", ".txt") {
            Ok(path) => path,
            Err(e) => {
                warn!(stage = "snapshot", error = %e, "cannot create snapshot file");
                return None;
            }
        };

        info!(stage = "snapshot", files = files.len(), "building targeted snapshot");
        if let Err(e) = self.attempt(&bundle, repo_url, files).await {
            warn!(stage = "snapshot", error = %e, "targeted snapshot failed, falling back to full repository");
            if let Err(e) = self.attempt(&bundle, repo_url, &[]).await {
                warn!(stage = "snapshot", error = %e, "full repository snapshot failed");
            }
        }

        if non_empty(&bundle) {
            Some(bundle)
        } else {
            warn!(stage = "snapshot", "snapshot bundle is missing or empty");
            None
        }
    }

    async fn attempt(
        &self,
        bundle: &Path,
        repo_url: &str,
        files: &[String],
    ) -> Result<(), AnsieyesError> {
        let mut invocation =
            ToolInvocation::from_command(ToolKind::Snapshot, self.repomix, SNAPSHOT_TIMEOUT)
                .flag("--remote", repo_url)
                .flag("--style", "plain")
                .flag("--output", bundle.to_string_lossy());
        for file in files {
            invocation = invocation.flag("--include", file.as_str());
        }
        self.invoker
            .invoke(&invocation)
            .await?
            .into_result(ToolKind::Snapshot)?;
        if non_empty(bundle) {
            Ok(())
        } else {
            Err(AnsieyesError::Resource("snapshot bundle is empty".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedInvoker;
    use crate::tool::ToolOutput;

    fn write_bundle(inv: &ToolInvocation) {
        std::fs::write(inv.flag_value("--output").unwrap(), "bundle").unwrap();
    }

    #[tokio::test]
    async fn targeted_snapshot_includes_each_file() {
        let invoker = ScriptedInvoker::new(|inv| {
            write_bundle(inv);
            Ok(ToolOutput::ok(""))
        });
        let mut resources = ResourceManager::new("git");
        let files = vec!["src/a.rs".to_string(), "src/b.rs".to_string()];
        let bundle = SnapshotBuilder::new(&invoker, "repomix")
            .build(&mut resources, &files, "https://github.com/acme/app")
            .await
            .unwrap();

        assert!(bundle.is_file());
        let calls = invoker.calls_for(ToolKind::Snapshot);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].flag_values("--include"), vec!["src/a.rs", "src/b.rs"]);
        assert_eq!(calls[0].flag_value("--remote"), Some("https://github.com/acme/app"));
        assert_eq!(calls[0].timeout, SNAPSHOT_TIMEOUT);

        resources.release_all();
        assert!(!bundle.exists());
    }

    #[tokio::test]
    async fn falls_back_once_without_filter() {
        let invoker = ScriptedInvoker::new(|inv| {
            if inv.has_flag("--include") {
                Err(AnsieyesError::Timeout {
                    tool: inv.tool.to_string(),
                    seconds: 300,
                })
            } else {
                write_bundle(inv);
                Ok(ToolOutput::ok(""))
            }
        });
        let mut resources = ResourceManager::new("git");
        let bundle = SnapshotBuilder::new(&invoker, "repomix")
            .build(&mut resources, &["x.py".to_string()], "https://github.com/acme/app")
            .await;
        assert!(bundle.is_some());
        let calls = invoker.calls_for(ToolKind::Snapshot);
        assert_eq!(calls.len(), 2);
        assert!(!calls[1].has_flag("--include"));
    }

    #[tokio::test]
    async fn empty_after_both_attempts_is_none() {
        let invoker = ScriptedInvoker::succeeding();
        let mut resources = ResourceManager::new("git");
        let bundle = SnapshotBuilder::new(&invoker, "repomix")
            .build(&mut resources, &["x.py".to_string()], "https://github.com/acme/app")
            .await;
        assert!(bundle.is_none());
        assert_eq!(invoker.count(ToolKind::Snapshot), 2);
        resources.release_all();
        assert_eq!(resources.outstanding(), 0);
    }
}
