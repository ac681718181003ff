//! Triage and review orchestration for Ansieyes.
//!
//! Provides the staged issue pipeline (security gate, duplicate detection,
//! Librarian, snapshot, Surgeon), label and comment rendering, the pull
//! request reviewer, and the [`publish::IssueTracker`] boundary used to
//! post results.

pub mod comment;
pub mod duplicate;
pub mod fakes;
pub mod gate;
pub mod labels;
pub mod librarian;
pub mod pipeline;
pub mod publish;
pub mod report;
pub mod resources;
pub mod review;
pub mod snapshot;
pub mod surgeon;
pub mod tool;
