//! Ephemeral filesystem artifacts owned by one pipeline run.
//!
//! The [`ResourceManager`] is the only place the pipeline creates temporary
//! directories and files. Everything it hands out is removed by
//! [`ResourceManager::release_all`] or, failing that, when the manager drops.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ansieyes_core::AnsieyesError;
use tempfile::{TempDir, TempPath};
use tracing::{debug, info, warn};

use crate::tool::{ToolInvocation, ToolInvoker, ToolKind};

/// Time budget for the shallow clone.
pub const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// A repository checkout used by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    /// Root of the checkout.
    pub path: PathBuf,
    /// `false` when the path was supplied by the caller and must not be deleted.
    pub owned: bool,
}

/// What [`ResourceManager::release_all`] removed and what it could not.
#[derive(Debug, Default)]
pub struct ReleaseReport {
    /// Artifacts that were removed.
    pub removed: Vec<PathBuf>,
    /// Artifacts whose removal failed, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl ReleaseReport {
    /// Returns `true` if every artifact was removed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Tracks clones, chunk directories, snapshot bundles and scratch files.
///
/// # Examples
///
/// ```
/// use ansieyes_triage::resources::ResourceManager;
///
/// let mut resources = ResourceManager::new("git");
/// let dir = resources.create_dir("ansieyes-chunks-").unwrap();
/// assert!(dir.is_dir());
///
/// let report = resources.release_all();
/// assert!(report.is_clean());
/// assert!(!dir.exists());
/// ```
#[derive(Debug)]
pub struct ResourceManager {
    git: String,
    dirs: Vec<TempDir>,
    files: Vec<TempPath>,
}

impl ResourceManager {
    /// Create a manager that clones with the `git` executable.
    pub fn new(git: impl Into<String>) -> Self {
        Self {
            git: git.into(),
            dirs: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Obtain a checkout of `url`.
    ///
    /// A `supplied` path is used as-is and never deleted. Otherwise the
    /// repository is shallow-cloned into a managed temporary directory.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::Resource`] if the supplied path is not a
    /// directory, or the clone fails or times out.
    pub async fn acquire_repo(
        &mut self,
        invoker: &dyn ToolInvoker,
        url: &str,
        supplied: Option<&Path>,
    ) -> Result<RepoHandle, AnsieyesError> {
        if let Some(path) = supplied {
            if !path.is_dir() {
                return Err(AnsieyesError::Resource(format!(
                    "repository path {} is not a directory",
                    path.display()
                )));
            }
            info!(path = %path.display(), "using existing repository checkout");
            return Ok(RepoHandle {
                path: path.to_path_buf(),
                owned: false,
            });
        }

        let dir = self.create_dir("ansieyes-clone-")?;
        let target = dir.join("repo");
        let invocation = ToolInvocation::from_command(ToolKind::Clone, &self.git, CLONE_TIMEOUT)
            .args(["clone", "--depth", "1"])
            .arg(url)
            .arg(target.to_string_lossy());

        info!(url, "cloning repository");
        match invoker.invoke(&invocation).await {
            Ok(output) => {
                output.into_result(ToolKind::Clone).map_err(|e| {
                    AnsieyesError::Resource(format!("Failed to clone repository: {e}"))
                })?;
            }
            Err(e) if e.is_timeout() => {
                return Err(AnsieyesError::Resource("Repository clone timeout".into()));
            }
            Err(e) => {
                return Err(AnsieyesError::Resource(format!(
                    "Failed to clone repository: {e}"
                )));
            }
        }

        Ok(RepoHandle {
            path: target,
            owned: true,
        })
    }

    /// Create a managed temporary directory.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::Io`] if the directory cannot be created.
    pub fn create_dir(&mut self, prefix: &str) -> Result<PathBuf, AnsieyesError> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "created temporary directory");
        self.dirs.push(dir);
        Ok(path)
    }

    /// Create a managed, empty temporary file.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::Io`] if the file cannot be created.
    pub fn create_file(&mut self, prefix: &str, suffix: &str) -> Result<PathBuf, AnsieyesError> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile()?;
        let temp_path = file.into_temp_path();
        let path = temp_path.to_path_buf();
        debug!(path = %path.display(), "created temporary file");
        self.files.push(temp_path);
        Ok(path)
    }

    /// Number of artifacts not yet released.
    pub fn outstanding(&self) -> usize {
        self.dirs.len() + self.files.len()
    }

    /// Remove every managed artifact. Failures are logged, never raised.
    pub fn release_all(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();

        for file in self.files.drain(..) {
            let path = file.to_path_buf();
            match file.close() {
                Ok(()) => report.removed.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => report.removed.push(path),
                Err(e) => report.failed.push((path, e.to_string())),
            }
        }
        for dir in self.dirs.drain(..) {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => report.removed.push(path),
                Err(e) => report.failed.push((path, e.to_string())),
            }
        }

        for (path, reason) in &report.failed {
            warn!(path = %path.display(), %reason, "failed to remove temporary artifact");
        }
        debug!(removed = report.removed.len(), "released temporary artifacts");
        report
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new("git")
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        if self.outstanding() > 0 {
            self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedInvoker;
    use crate::tool::ToolOutput;

    fn cloning_invoker() -> ScriptedInvoker {
        ScriptedInvoker::new(|inv| {
            if inv.tool == ToolKind::Clone {
                let target = inv.args.last().cloned().unwrap_or_default();
                std::fs::create_dir_all(Path::new(&target).join("src")).unwrap();
                std::fs::write(Path::new(&target).join("src/main.rs"), "fn main() {}").unwrap();
            }
            Ok(ToolOutput::ok(""))
        })
    }

    #[tokio::test]
    async fn supplied_path_is_not_owned() {
        let checkout = tempfile::tempdir().unwrap();
        let mut resources = ResourceManager::new("git");
        let invoker = ScriptedInvoker::succeeding();
        let handle = resources
            .acquire_repo(&invoker, "https://example.com/r", Some(checkout.path()))
            .await
            .unwrap();
        assert!(!handle.owned);
        assert_eq!(invoker.calls().len(), 0);
        resources.release_all();
        assert!(checkout.path().exists());
    }

    #[tokio::test]
    async fn missing_supplied_path_is_resource_error() {
        let mut resources = ResourceManager::new("git");
        let err = resources
            .acquire_repo(
                &ScriptedInvoker::succeeding(),
                "u",
                Some(Path::new("/no/such/checkout")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AnsieyesError::Resource(_)));
    }

    #[tokio::test]
    async fn clone_is_shallow_and_released() {
        let mut resources = ResourceManager::new("git");
        let invoker = cloning_invoker();
        let handle = resources
            .acquire_repo(&invoker, "https://github.com/acme/app", None)
            .await
            .unwrap();
        assert!(handle.owned);
        assert!(handle.path.join("src/main.rs").exists());

        let calls = invoker.calls_for(ToolKind::Clone);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].flag_value("--depth"), Some("1"));
        assert_eq!(calls[0].timeout, CLONE_TIMEOUT);

        let report = resources.release_all();
        assert!(report.is_clean());
        assert!(!handle.path.exists());
        assert_eq!(resources.outstanding(), 0);
    }

    #[tokio::test]
    async fn clone_timeout_is_resource_error() {
        let mut resources = ResourceManager::new("git");
        let invoker = ScriptedInvoker::new(|inv| {
            Err(AnsieyesError::Timeout {
                tool: inv.tool.to_string(),
                seconds: 300,
            })
        });
        let err = resources
            .acquire_repo(&invoker, "https://github.com/acme/app", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "resource error: Repository clone timeout");
        resources.release_all();
        assert_eq!(resources.outstanding(), 0);
    }

    #[tokio::test]
    async fn clone_failure_carries_stderr() {
        let mut resources = ResourceManager::new("git");
        let invoker =
            ScriptedInvoker::new(|_| Ok(ToolOutput::failure(128, "fatal: repository not found")));
        let err = resources
            .acquire_repo(&invoker, "https://github.com/acme/gone", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("repository not found"));
    }

    #[test]
    fn files_are_removed_on_release() {
        let mut resources = ResourceManager::new("git");
        let file = resources.create_file("ansieyes-snapshot-", ".txt").unwrap();
        assert!(file.exists());
        assert_eq!(resources.outstanding(), 1);
        let report = resources.release_all();
        assert_eq!(report.removed, vec![file.clone()]);
        assert!(!file.exists());
    }

    #[test]
    fn file_deleted_by_tool_still_counts_as_removed() {
        let mut resources = ResourceManager::new("git");
        let file = resources.create_file("ansieyes-out-", ".json").unwrap();
        std::fs::remove_file(&file).unwrap();
        assert!(resources.release_all().is_clean());
    }

    #[test]
    fn drop_releases_outstanding_artifacts() {
        let (dir, file) = {
            let mut resources = ResourceManager::new("git");
            (
                resources.create_dir("ansieyes-chunks-").unwrap(),
                resources.create_file("ansieyes-issues-", ".json").unwrap(),
            )
        };
        assert!(!dir.exists());
        assert!(!file.exists());
    }
}
