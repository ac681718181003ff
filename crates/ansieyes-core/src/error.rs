use std::path::PathBuf;

/// Errors that can occur across Ansieyes.
///
/// Library crates use this type directly; the binary crate renders it as a
/// `miette` report at the boundary. Inside the triage pipeline every variant
/// except [`AnsieyesError::Config`] is captured into the run outcome rather
/// than returned to the caller.
///
/// # Examples
///
/// ```
/// use ansieyes_core::AnsieyesError;
///
/// let err = AnsieyesError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum AnsieyesError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(
        code(ansieyes::config),
        help("run `ansieyes doctor` to check your setup")
    )]
    Config(String),

    /// Repository clone or snapshot could not be acquired.
    #[error("resource error: {0}")]
    Resource(String),

    /// An external tool failed to start or exited unsuccessfully.
    #[error("{tool} failed: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Captured error output or spawn failure.
        message: String,
    },

    /// An external tool exceeded its time budget.
    #[error("{tool} timed out after {seconds} seconds")]
    Timeout {
        /// Name of the tool that timed out.
        tool: String,
        /// The budget that was exceeded.
        seconds: u64,
    },

    /// Tool output did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// Issue tracker API failure.
    #[error("GitHub error: {0}")]
    GitHub(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl AnsieyesError {
    /// Returns `true` for [`AnsieyesError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, AnsieyesError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AnsieyesError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = AnsieyesError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn tool_error_names_the_tool() {
        let err = AnsieyesError::Tool {
            tool: "repomix".into(),
            message: "exit status 2".into(),
        };
        assert_eq!(err.to_string(), "repomix failed: exit status 2");
        assert!(!err.is_timeout());
    }

    #[test]
    fn timeout_error_shows_budget() {
        let err = AnsieyesError::Timeout {
            tool: "git clone".into(),
            seconds: 300,
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "git clone timed out after 300 seconds");
    }

    #[test]
    fn file_not_found_shows_path() {
        let err = AnsieyesError::FileNotFound(PathBuf::from("/tmp/missing.json"));
        assert!(err.to_string().contains("/tmp/missing.json"));
    }
}
