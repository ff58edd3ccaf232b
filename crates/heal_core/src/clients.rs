//! Contracts for the external collaborators the engine drives.
//!
//! The engine owns prompts, branch names and retry policy; implementations
//! only own transport. Every error type reports whether it is transient so
//! the shared retry helper can decide to try again.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::issue::{Issue, IssueType, Severity};

/// Implemented by collaborator errors that may succeed on retry.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Tracker unreachable: {0}")]
    Unreachable(String),

    #[error("Tracker authentication failed: {0}")]
    Auth(String),

    #[error("Invalid tracker response: {0}")]
    InvalidResponse(String),
}

impl Transient for TrackerError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Issue tracker query client.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Short tracker prefix used in branch names and commit subjects.
    fn prefix(&self) -> String;

    async fn validate_connection(&self) -> Result<bool, TrackerError>;

    /// Returns a finite, already-deduplicated set of issues.
    async fn fetch_issues(
        &self,
        project_key: &str,
        severities: &[Severity],
        types: &[IssueType],
    ) -> Result<Vec<Issue>, TrackerError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unparseable inference response: {0}")]
    Parse(String),

    #[error("Inference transport error: {0}")]
    Transport(String),

    #[error("Inference provider rejected credentials: {0}")]
    Unauthorized(String),

    /// The provider refused this particular request (bad model, oversized
    /// prompt, ...). Retrying the same request will not help.
    #[error("Inference request rejected: {0}")]
    Rejected(String),

    #[error("Inference provider not configured")]
    NotConfigured,
}

impl Transient for InferenceError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Parse(_) | Self::Transport(_))
    }
}

impl InferenceError {
    /// Conditions that make every further inference call pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::NotConfigured)
    }
}

/// Language model inference client.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<String, InferenceError>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VcsError {
    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    #[error("Remote transport error: {0}")]
    Transport(String),

    #[error("Remote authentication failed: {0}")]
    Auth(String),

    #[error("Git command failed: {0}")]
    Command(String),
}

impl Transient for VcsError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Version-control operations client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Verify the working tree is usable and check out `base`.
    async fn ensure_ready(&self, base: &str) -> Result<(), VcsError>;

    /// Create `name` from `base` and check it out, carrying working-tree edits.
    async fn create_branch(&self, name: &str, base: &str) -> Result<(), VcsError>;

    /// Stage `files` and commit them on `branch`. Returns the commit id.
    async fn commit(
        &self,
        branch: &str,
        message: &str,
        files: &[PathBuf],
    ) -> Result<String, VcsError>;

    /// Push `branch` and open a review request. Returns its URL.
    async fn open_merge_request(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String, VcsError>;

    async fn checkout(&self, branch: &str) -> Result<(), VcsError>;
}
