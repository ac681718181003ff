use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AnsieyesError;

/// File name of the per-repository configuration read from the repository root.
pub const REPO_CONFIG_FILE: &str = ".ansieyes.json";

/// Top-level configuration loaded from `.ansieyes.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
///
/// # Examples
///
/// ```
/// use ansieyes_core::AnsieyesConfig;
///
/// let config = AnsieyesConfig::default();
/// assert_eq!(config.engine.python, "python3");
/// assert!(config.security.enabled);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnsieyesConfig {
    /// Analysis toolkit settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// External binaries used for cloning and chunking.
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Security gate settings.
    #[serde(default)]
    pub security: SecurityConfig,
}

impl AnsieyesConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::Io`] if the file cannot be read, or
    /// [`AnsieyesError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ansieyes_core::AnsieyesConfig;
    /// use std::path::Path;
    ///
    /// let config = AnsieyesConfig::from_file(Path::new(".ansieyes.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, AnsieyesError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use ansieyes_core::AnsieyesConfig;
    ///
    /// let toml = r#"
    /// [engine]
    /// tool_timeout_secs = 120
    /// "#;
    /// let config = AnsieyesConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.engine.tool_timeout_secs, 120);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, AnsieyesError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }
}

/// Settings for the external analysis toolkit (`python3 -m cli.<module>`).
///
/// # Examples
///
/// ```
/// use ansieyes_core::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.api_key_env, "GEMINI_API_KEY");
/// assert_eq!(config.tool_timeout_secs, 600);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory containing the analysis toolkit.
    pub toolkit_path: Option<PathBuf>,
    /// Python interpreter used to run the toolkit modules.
    #[serde(default = "default_python")]
    pub python: String,
    /// Environment variable holding the model API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// API key for the model provider. Overrides `api_key_env` when set.
    pub api_key: Option<String>,
    /// Time budget for each toolkit call in seconds (default: 600).
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_python() -> String {
    "python3".into()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}

fn default_tool_timeout_secs() -> u64 {
    600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            toolkit_path: None,
            python: default_python(),
            api_key_env: default_api_key_env(),
            api_key: None,
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl EngineConfig {
    /// Resolve the API key from the config or the `api_key_env` variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }

    /// Resolve the toolkit location from the config or `ANSIEYES_TOOLKIT_PATH`.
    pub fn resolve_toolkit_path(&self) -> Option<PathBuf> {
        self.toolkit_path
            .clone()
            .or_else(|| std::env::var_os("ANSIEYES_TOOLKIT_PATH").map(PathBuf::from))
    }
}

/// Locations of the external binaries invoked by the pipeline.
///
/// # Examples
///
/// ```
/// use ansieyes_core::ToolsConfig;
///
/// let tools = ToolsConfig::default();
/// assert_eq!(tools.git, "git");
/// assert_eq!(tools.repomix, "repomix");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Git executable used for shallow clones.
    #[serde(default = "default_git")]
    pub git: String,
    /// Repomix executable used for chunking and snapshots.
    #[serde(default = "default_repomix")]
    pub repomix: String,
}

fn default_git() -> String {
    "git".into()
}

fn default_repomix() -> String {
    "repomix".into()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git: default_git(),
            repomix: default_repomix(),
        }
    }
}

/// Security gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Run the built-in injection detector (default: true).
    ///
    /// When disabled the gate fails open and every check reports `disabled`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Per-repository overrides read from `.ansieyes.json` at the repository root.
///
/// # Examples
///
/// ```
/// use ansieyes_core::RepoConfig;
///
/// let config: RepoConfig =
///     serde_json::from_str(r#"{"model": "gemini-2.5-pro", "customPromptPath": "prompts/triage.md"}"#)
///         .unwrap();
/// assert_eq!(config.model.as_deref(), Some("gemini-2.5-pro"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    /// Override model identifier for deep analysis.
    pub model: Option<String>,
    /// Prompt template path, relative to the repository root.
    pub custom_prompt_path: Option<String>,
}

impl RepoConfig {
    /// Load the repository config from `repo_root`.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AnsieyesError::Io`] if the file cannot be read, or
    /// [`AnsieyesError::Serialization`] if it is not valid JSON.
    pub fn load(repo_root: &Path) -> Result<Option<Self>, AnsieyesError> {
        let path = repo_root.join(REPO_CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let config = serde_json::from_str(&content)?;
        Ok(Some(config))
    }

    /// Resolve `custom_prompt_path` against `repo_root`.
    ///
    /// Returns `None` when no path is configured, the file does not exist, or
    /// the resolved path lies outside the repository.
    pub fn resolved_prompt_path(&self, repo_root: &Path) -> Option<PathBuf> {
        let relative = self.custom_prompt_path.as_deref()?.trim();
        if relative.is_empty() {
            return None;
        }
        let root = repo_root.canonicalize().ok()?;
        let candidate = root.join(relative).canonicalize().ok()?;
        if candidate.starts_with(&root) && candidate.is_file() {
            Some(candidate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = AnsieyesConfig::default();
        assert_eq!(config.engine.python, "python3");
        assert_eq!(config.engine.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.engine.tool_timeout_secs, 600);
        assert!(config.engine.toolkit_path.is_none());
        assert_eq!(config.tools.git, "git");
        assert_eq!(config.tools.repomix, "repomix");
        assert!(config.security.enabled);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[engine]
toolkit_path = "/opt/ai-issue-triage"
python = "/usr/bin/python3.12"
api_key_env = "TRIAGE_KEY"
tool_timeout_secs = 90

[tools]
git = "/usr/local/bin/git"
repomix = "npx repomix"

[security]
enabled = false
"#;
        let config = AnsieyesConfig::from_toml(toml).unwrap();
        assert_eq!(
            config.engine.toolkit_path.as_deref(),
            Some(Path::new("/opt/ai-issue-triage"))
        );
        assert_eq!(config.engine.python, "/usr/bin/python3.12");
        assert_eq!(config.engine.api_key_env, "TRIAGE_KEY");
        assert_eq!(config.engine.tool_timeout_secs, 90);
        assert_eq!(config.tools.git, "/usr/local/bin/git");
        assert!(!config.security.enabled);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = AnsieyesConfig::from_toml("").unwrap();
        assert_eq!(config.engine.tool_timeout_secs, 600);
        assert!(config.security.enabled);
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = AnsieyesConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }

    #[test]
    fn explicit_api_key_wins() {
        let engine = EngineConfig {
            api_key: Some("from-config".into()),
            api_key_env: "ANSIEYES_TEST_UNSET_KEY_VAR".into(),
            ..EngineConfig::default()
        };
        assert_eq!(engine.resolve_api_key().as_deref(), Some("from-config"));
    }

    #[test]
    fn blank_api_key_is_treated_as_missing() {
        let engine = EngineConfig {
            api_key: Some("   ".into()),
            api_key_env: "ANSIEYES_TEST_UNSET_KEY_VAR".into(),
            ..EngineConfig::default()
        };
        assert!(engine.resolve_api_key().is_none());
    }

    #[test]
    fn missing_repo_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RepoConfig::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn repo_config_reads_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(REPO_CONFIG_FILE),
            r#"{"model": "gemini-2.5-flash", "customPromptPath": "triage.md"}"#,
        )
        .unwrap();
        let config = RepoConfig::load(dir.path()).unwrap().unwrap();
        assert_eq!(config.model.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(config.custom_prompt_path.as_deref(), Some("triage.md"));
    }

    #[test]
    fn malformed_repo_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(REPO_CONFIG_FILE), "{ not json").unwrap();
        assert!(RepoConfig::load(dir.path()).is_err());
    }

    #[test]
    fn prompt_path_resolves_inside_repo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("prompts")).unwrap();
        std::fs::write(dir.path().join("prompts/triage.md"), "prompt").unwrap();
        let config = RepoConfig {
            model: None,
            custom_prompt_path: Some("prompts/triage.md".into()),
        };
        let resolved = config.resolved_prompt_path(dir.path()).unwrap();
        assert!(resolved.ends_with("prompts/triage.md"));
    }

    #[test]
    fn prompt_path_outside_repo_is_rejected() {
        let outer = tempfile::tempdir().unwrap();
        let repo = outer.path().join("repo");
        std::fs::create_dir(&repo).unwrap();
        std::fs::write(outer.path().join("secret.md"), "nope").unwrap();
        let config = RepoConfig {
            model: None,
            custom_prompt_path: Some("../secret.md".into()),
        };
        assert!(config.resolved_prompt_path(&repo).is_none());
    }

    #[test]
    fn missing_prompt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig {
            model: None,
            custom_prompt_path: Some("nowhere.md".into()),
        };
        assert!(config.resolved_prompt_path(dir.path()).is_none());
    }
}
