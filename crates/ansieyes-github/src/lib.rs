//! GitHub integration for Ansieyes.
//!
//! Fetches issues and pull requests into pipeline inputs and implements
//! [`ansieyes_triage::publish::IssueTracker`] against the REST API.

pub mod client;
pub mod reference;

pub use client::{token_from_env, GitHubClient, Repository};
pub use reference::{parse_issue_reference, IssueReference};
