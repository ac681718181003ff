//! Librarian: picks the files worth a deep look.
//!
//! The repository is split into one compressed chunk per top-level
//! directory, and the retrieval service ranks files from those chunks.

use std::collections::HashSet;
use std::path::{Component, Path};
use std::time::Duration;

use ansieyes_core::{AnsieyesError, LibrarianResult};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::resources::ResourceManager;
use crate::tool::{parse_json_output, ToolInvocation, ToolInvoker, ToolKind, Toolkit};

/// Repository file listing top-level directories to leave out of chunking.
pub const EXCLUSION_FILE: &str = ".ansieyesignore";

/// Time budget for one chunk.
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(300);

const CHUNK_FLAGS: &[&str] = &[
    "--style",
    "plain",
    "--compress",
    "--remove-comments",
    "--remove-empty-lines",
    "--no-file-summary",
    "--no-directory-structure",
];

#[derive(Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    relevant_files: Vec<RelevantFile>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RelevantFile {
    Path(String),
    Entry {
        #[serde(alias = "file_path", alias = "file")]
        path: String,
    },
}

impl RelevantFile {
    fn into_path(self) -> String {
        match self {
            RelevantFile::Path(path) | RelevantFile::Entry { path } => path,
        }
    }
}

/// Parse exclusion entries: blank and `#` lines skipped, slashes trimmed.
///
/// # Examples
///
/// ```
/// use ansieyes_triage::librarian::parse_exclusions;
///
/// let excluded = parse_exclusions("# vendored\n/vendor/\n\ndocs\n");
/// assert!(excluded.contains("vendor"));
/// assert!(excluded.contains("docs"));
/// assert_eq!(excluded.len(), 2);
/// ```
pub fn parse_exclusions(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.trim_matches('/').to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Read [`EXCLUSION_FILE`] from `repo`. A missing file excludes nothing.
pub fn read_exclusions(repo: &Path) -> HashSet<String> {
    match std::fs::read_to_string(repo.join(EXCLUSION_FILE)) {
        Ok(content) => parse_exclusions(&content),
        Err(_) => HashSet::new(),
    }
}

/// Top-level directory names to chunk, sorted.
///
/// # Errors
///
/// Returns [`AnsieyesError::Io`] if `repo` cannot be listed.
pub fn chunkable_dirs(repo: &Path) -> Result<Vec<String>, AnsieyesError> {
    let excluded = read_exclusions(repo);
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(repo)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || excluded.contains(&name) {
            continue;
        }
        dirs.push(name);
    }
    dirs.sort();
    Ok(dirs)
}

/// Make retrieved paths repository-relative and unique.
///
/// Leading `./` and `/` are stripped, the first occurrence of each path is
/// kept, and paths with a `..` component are dropped.
///
/// # Examples
///
/// ```
/// use ansieyes_triage::librarian::normalize_paths;
///
/// let paths = normalize_paths(vec![
///     " ./src/main.rs ".into(),
///     "/src/main.rs".into(),
///     "../etc/passwd".into(),
///     "lib/util.py".into(),
/// ]);
/// assert_eq!(paths, vec!["src/main.rs", "lib/util.py"]);
/// ```
pub fn normalize_paths(raw: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter_map(|path| {
            let mut p = path.trim();
            loop {
                if let Some(rest) = p.strip_prefix("./") {
                    p = rest;
                } else if let Some(rest) = p.strip_prefix('/') {
                    p = rest;
                } else {
                    break;
                }
            }
            if p.is_empty() || Path::new(p).components().any(|c| c == Component::ParentDir) {
                return None;
            }
            Some(p.to_string())
        })
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Runs chunking and retrieval for one repository checkout.
pub struct Librarian<'a> {
    invoker: &'a dyn ToolInvoker,
    toolkit: &'a Toolkit,
    repomix: &'a str,
}

impl<'a> Librarian<'a> {
    pub fn new(invoker: &'a dyn ToolInvoker, toolkit: &'a Toolkit, repomix: &'a str) -> Self {
        Self {
            invoker,
            toolkit,
            repomix,
        }
    }

    /// Identify files relevant to the issue. Never fails; errors are
    /// recorded on the result.
    pub async fn identify_relevant_files(
        &self,
        resources: &mut ResourceManager,
        title: &str,
        description: &str,
        repo: &Path,
    ) -> LibrarianResult {
        info!(stage = "librarian", repo = %repo.display(), "identifying relevant files");
        match self.run(resources, title, description, repo).await {
            Ok(result) => {
                info!(stage = "librarian", files = result.relevant_files.len(), "retrieval finished");
                result
            }
            Err(e) => {
                warn!(stage = "librarian", error = %e, "librarian failed");
                LibrarianResult::failed(e.to_string())
            }
        }
    }

    async fn run(
        &self,
        resources: &mut ResourceManager,
        title: &str,
        description: &str,
        repo: &Path,
    ) -> Result<LibrarianResult, AnsieyesError> {
        let dirs = chunkable_dirs(repo)?;
        let chunk_dir = resources.create_dir("ansieyes-chunks-")?;

        let mut produced = 0usize;
        for dir in &dirs {
            let output = chunk_dir.join(format!("{}.txt", dir.replace('/', "_")));
            let invocation = ToolInvocation::from_command(ToolKind::Chunk, self.repomix, CHUNK_TIMEOUT)
                .flag("--include", format!("./{dir}/**"))
                .args(CHUNK_FLAGS.iter().copied())
                .flag("--output", output.to_string_lossy())
                .cwd(repo);
            let result = self
                .invoker
                .invoke(&invocation)
                .await
                .and_then(|out| out.into_result(ToolKind::Chunk));
            match result {
                Ok(_) if output.is_file() => {
                    debug!(stage = "librarian", dir = %dir, "chunk generated");
                    produced += 1;
                }
                Ok(_) => warn!(stage = "librarian", dir = %dir, "chunking produced no output, skipping"),
                Err(e) => warn!(stage = "librarian", dir = %dir, error = %e, "chunking failed, skipping"),
            }
        }

        if produced == 0 {
            return Ok(LibrarianResult::failed(
                "no repository chunks could be generated",
            ));
        }

        let output_file = resources.create_file("ansieyes-librarian-", ".json")?;
        let invocation = self
            .toolkit
            .invocation(ToolKind::Retrieve, "librarian")
            .flag("--title", title)
            .flag("--description", description)
            .flag("--chunks-dir", chunk_dir.to_string_lossy())
            .flag("--output", output_file.to_string_lossy())
            .arg("--verbose");
        let output = self
            .invoker
            .invoke(&invocation)
            .await?
            .into_result(ToolKind::Retrieve)?;

        let written = std::fs::read_to_string(&output_file).unwrap_or_default();
        let raw = if written.trim().is_empty() {
            output.stdout.as_str()
        } else {
            written.as_str()
        };
        let response: RetrievalResponse = parse_json_output(ToolKind::Retrieve, raw)?;

        let files = normalize_paths(
            response
                .relevant_files
                .into_iter()
                .map(RelevantFile::into_path)
                .collect(),
        );
        if files.is_empty() {
            if let Some(error) = response.error {
                return Ok(LibrarianResult::failed(error));
            }
        }
        Ok(LibrarianResult {
            relevant_files: files,
            error: None,
        })
    }
}
