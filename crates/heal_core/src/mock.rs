//! Scripted collaborators for testing.
//!
//! In-memory implementations of [`IssueTracker`], [`InferenceClient`] and
//! [`VcsClient`] that record every call, so engine runs can be exercised
//! without a tracker, a model or a remote.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::clients::{
    InferenceClient, InferenceError, IssueTracker, TrackerError, VcsClient, VcsError,
};
use crate::issue::{Issue, IssueType, Severity};
use crate::retry::CancellationFlag;

/// Mock issue tracker serving a fixed issue list.
#[derive(Clone, Default)]
pub struct MockTracker {
    issues: Arc<RwLock<Vec<Issue>>>,
    connect_error: Arc<RwLock<Option<TrackerError>>>,
    fetch_error: Arc<RwLock<Option<TrackerError>>>,
    fetch_calls: Arc<AtomicUsize>,
}

impl MockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issues(self, issues: Vec<Issue>) -> Self {
        *self.issues.write() = issues;
        self
    }

    /// Make `validate_connection` fail with `error`.
    pub fn fail_connection(self, error: TrackerError) -> Self {
        *self.connect_error.write() = Some(error);
        self
    }

    pub fn fail_fetch(self, error: TrackerError) -> Self {
        *self.fetch_error.write() = Some(error);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IssueTracker for MockTracker {
    fn prefix(&self) -> String {
        "sonar".to_string()
    }

    async fn validate_connection(&self) -> Result<bool, TrackerError> {
        match self.connect_error.read().clone() {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }

    async fn fetch_issues(
        &self,
        _project_key: &str,
        severities: &[Severity],
        types: &[IssueType],
    ) -> Result<Vec<Issue>, TrackerError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.fetch_error.read().clone() {
            return Err(e);
        }
        Ok(self
            .issues
            .read()
            .iter()
            .filter(|i| severities.is_empty() || severities.contains(&i.severity))
            .filter(|i| types.is_empty() || types.contains(&i.issue_type))
            .cloned()
            .collect())
    }
}

/// A captured inference request.
#[derive(Debug, Clone)]
pub struct CapturedPrompt {
    pub system: String,
    pub user: String,
    pub timeout: Duration,
}

/// Mock inference client returning queued responses in order.
///
/// When the queue runs dry every further call fails with a transport error.
#[derive(Clone, Default)]
pub struct MockInference {
    responses: Arc<RwLock<VecDeque<Result<String, InferenceError>>>>,
    prompts: Arc<RwLock<Vec<CapturedPrompt>>>,
    cancel_after: Arc<RwLock<Option<(usize, CancellationFlag)>>>,
}

impl MockInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<String, InferenceError>) {
        self.responses.write().push_back(response);
    }

    /// Queue a well-formed plan with the given confidence.
    pub fn push_plan(&self, confidence: f64) {
        self.push_response(Ok(format!(
            r#"{{"analysis": "The finding is valid.", "solution": "Apply the minimal change\nKeep behaviour identical", "confidence": {}, "effort": "LOW", "side_effects": "none"}}"#,
            confidence
        )));
    }

    /// Queue a patch answer wrapping `code` in a fenced block.
    pub fn push_patch(&self, fence: &str, code: &str) {
        self.push_response(Ok(format!("```{}\n{}\n```", fence, code)));
    }

    /// Raise `flag` once `calls` requests have been answered.
    pub fn cancel_after(&self, calls: usize, flag: CancellationFlag) {
        *self.cancel_after.write() = Some((calls, flag));
    }

    pub fn call_count(&self) -> usize {
        self.prompts.read().len()
    }

    pub fn prompts(&self) -> Vec<CapturedPrompt> {
        self.prompts.read().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.read().len()
    }
}

#[async_trait]
impl InferenceClient for MockInference {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        timeout: Duration,
    ) -> Result<String, InferenceError> {
        let calls = {
            let mut prompts = self.prompts.write();
            prompts.push(CapturedPrompt {
                system: system_prompt.to_string(),
                user: user_prompt.to_string(),
                timeout,
            });
            prompts.len()
        };
        if let Some((after, flag)) = self.cancel_after.read().as_ref() {
            if calls >= *after {
                flag.cancel();
            }
        }
        self.responses
            .write()
            .pop_front()
            .unwrap_or_else(|| Err(InferenceError::Transport("no scripted response".to_string())))
    }
}

/// A recorded VCS operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsCall {
    EnsureReady { base: String },
    CreateBranch { name: String, base: String },
    Commit { branch: String, message: String, files: Vec<PathBuf> },
    OpenMergeRequest { branch: String, title: String, body: String },
    Checkout { branch: String },
}

/// Mock VCS client with an in-memory branch list.
#[derive(Clone, Default)]
pub struct MockVcs {
    calls: Arc<RwLock<Vec<VcsCall>>>,
    branches: Arc<RwLock<HashSet<String>>>,
    ready_error: Arc<RwLock<Option<VcsError>>>,
    commit_error: Arc<RwLock<Option<VcsError>>>,
    nth_commit_error: Arc<RwLock<Option<(usize, VcsError)>>>,
    commit_attempts: Arc<AtomicUsize>,
    merge_request_errors: Arc<RwLock<VecDeque<VcsError>>>,
    merge_requests: Arc<AtomicUsize>,
}

impl MockVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `name` already exists locally.
    pub fn with_branch(self, name: impl Into<String>) -> Self {
        self.branches.write().insert(name.into());
        self
    }

    pub fn fail_ready(self, error: VcsError) -> Self {
        *self.ready_error.write() = Some(error);
        self
    }

    pub fn fail_commit(self, error: VcsError) -> Self {
        *self.commit_error.write() = Some(error);
        self
    }

    /// Fail only the `n`th commit call (1-based).
    pub fn fail_nth_commit(self, n: usize, error: VcsError) -> Self {
        *self.nth_commit_error.write() = Some((n, error));
        self
    }

    /// Fail the next merge request call with `error`. Queued failures are
    /// consumed one per call.
    pub fn fail_merge_request(self, error: VcsError) -> Self {
        self.merge_request_errors.write().push_back(error);
        self
    }

    pub fn calls(&self) -> Vec<VcsCall> {
        self.calls.read().clone()
    }

    pub fn created_branches(&self) -> Vec<String> {
        self.calls
            .read()
            .iter()
            .filter_map(|c| match c {
                VcsCall::CreateBranch { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> Vec<(String, String)> {
        self.calls
            .read()
            .iter()
            .filter_map(|c| match c {
                VcsCall::Commit {
                    branch, message, ..
                } => Some((branch.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn merge_request_count(&self) -> usize {
        self.merge_requests.load(Ordering::SeqCst)
    }

    fn record(&self, call: VcsCall) {
        self.calls.write().push(call);
    }
}

#[async_trait]
impl VcsClient for MockVcs {
    async fn ensure_ready(&self, base: &str) -> Result<(), VcsError> {
        self.record(VcsCall::EnsureReady {
            base: base.to_string(),
        });
        match self.ready_error.read().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn create_branch(&self, name: &str, base: &str) -> Result<(), VcsError> {
        self.record(VcsCall::CreateBranch {
            name: name.to_string(),
            base: base.to_string(),
        });
        if !self.branches.write().insert(name.to_string()) {
            return Err(VcsError::BranchExists(name.to_string()));
        }
        Ok(())
    }

    async fn commit(
        &self,
        branch: &str,
        message: &str,
        files: &[PathBuf],
    ) -> Result<String, VcsError> {
        self.record(VcsCall::Commit {
            branch: branch.to_string(),
            message: message.to_string(),
            files: files.to_vec(),
        });
        let attempt = self.commit_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(e) = self.commit_error.read().clone() {
            return Err(e);
        }
        if let Some((n, e)) = self.nth_commit_error.read().clone() {
            if n == attempt {
                return Err(e);
            }
        }
        Ok(format!("commit-{}", self.calls.read().len()))
    }

    async fn open_merge_request(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String, VcsError> {
        self.record(VcsCall::OpenMergeRequest {
            branch: branch.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        if let Some(e) = self.merge_request_errors.write().pop_front() {
            return Err(e);
        }
        let n = self.merge_requests.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("https://git.example.com/merge_requests/{}", n))
    }

    async fn checkout(&self, branch: &str) -> Result<(), VcsError> {
        self.record(VcsCall::Checkout {
            branch: branch.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_inference_queue() {
        let mock = MockInference::new();
        mock.push_response(Ok("first".into()));

        let timeout = Duration::from_secs(1);
        assert_eq!(mock.complete("s", "u", timeout).await.unwrap(), "first");
        assert!(matches!(
            mock.complete("s", "u", timeout).await,
            Err(InferenceError::Transport(_))
        ));
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.prompts()[0].user, "u");
    }

    #[tokio::test]
    async fn test_mock_inference_cancels_after_calls() {
        let mock = MockInference::new();
        let flag = CancellationFlag::new();
        mock.cancel_after(2, flag.clone());
        mock.push_plan(0.9);
        mock.push_plan(0.9);

        let _ = mock.complete("s", "u", Duration::from_secs(1)).await;
        assert!(!flag.is_cancelled());
        let _ = mock.complete("s", "u", Duration::from_secs(1)).await;
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn test_mock_vcs_branch_collision() {
        let vcs = MockVcs::new().with_branch("fix/a");
        assert!(matches!(
            vcs.create_branch("fix/a", "main").await,
            Err(VcsError::BranchExists(_))
        ));
        vcs.create_branch("fix/b", "main").await.unwrap();
        assert_eq!(vcs.created_branches(), vec!["fix/a", "fix/b"]);
    }

    #[tokio::test]
    async fn test_mock_tracker_filters() {
        let tracker = MockTracker::new().with_issues(vec![
            Issue::new("1", Severity::Blocker, IssueType::Bug, "A.java", 1, "m"),
            Issue::new("2", Severity::Info, IssueType::CodeSmell, "B.java", 1, "m"),
        ]);
        let issues = tracker
            .fetch_issues("p", &[Severity::Blocker], &[])
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(tracker.fetch_count(), 1);
    }
}
