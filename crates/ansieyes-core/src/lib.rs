//! Core types, configuration, and error handling for Ansieyes.
//!
//! This crate provides the shared foundation used by the other crates:
//! - [`AnsieyesError`]: unified error type using `thiserror`
//! - [`AnsieyesConfig`]: bot configuration loaded from `.ansieyes.toml`
//! - [`RepoConfig`]: per-repository overrides loaded from `.ansieyes.json`
//! - Stage results and the aggregate [`TriageOutcome`]

mod config;
mod error;
mod types;

pub use config::{
    AnsieyesConfig, EngineConfig, RepoConfig, SecurityConfig, ToolsConfig, REPO_CONFIG_FILE,
};
pub use error::AnsieyesError;
pub use types::{
    DuplicateCheckResult, FileChange, InjectionCheckResult, IssueRef, IssueSummary,
    LibrarianResult, OutputFormat, PrSubmission, RiskLevel, StructuredAnalysis, SurgeonFindings,
    SurgeonResult, TerminalState, TriageOutcome, TriageRequest,
};

/// A convenience `Result` type for Ansieyes operations.
pub type Result<T> = std::result::Result<T, AnsieyesError>;
