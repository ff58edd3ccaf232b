//! Run-scoped workflow state.
//!
//! One [`WorkflowState`] exists per run. It is owned by the caller of the
//! engine and passed to every stage by `&mut`, so several runs can share a
//! process without sharing state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backlog::Backlog;
use crate::context::CodeContext;
use crate::issue::{CodeFix, FixPlan, Issue, ValidationResult, ValidationStatus};
use crate::machine::Stage;

/// Terminal outcome of one issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Fixed,
    NeedsReview,
    Failed,
    Skipped,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::NeedsReview => "needs_review",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Recorded result for one backlog issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueOutcome {
    pub issue: Issue,
    pub kind: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<FixPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_request: Option<String>,
}

/// One entry of the run's error list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// `None` for run-level (fatal) errors
    pub issue_id: Option<String>,
    pub error: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub fetched: usize,
    pub analyzed: usize,
    pub plans_created: usize,
    pub fixes_applied: usize,
    pub fixes_validated: usize,
    pub published: usize,
    pub branches_created: usize,
    pub merge_requests_created: usize,
}

/// Work in progress for the issue under the cursor.
#[derive(Debug, Clone, Default)]
pub struct IssueWork {
    pub context: Option<CodeContext>,
    pub plan: Option<FixPlan>,
    /// Applied but not yet accepted
    pub fix: Option<CodeFix>,
    pub validation: Option<ValidationResult>,
    pub attempt: u32,
    /// At least one attempt reached the working tree
    pub applied: bool,
    /// Waiting in the pending batch instead of being published alone
    pub batched: bool,
    pub feedback: Option<String>,
    pub outcome: Option<(OutcomeKind, Option<String>)>,
    pub branch: Option<String>,
    pub merge_request: Option<String>,
}

/// A validated fix waiting for the next batch flush.
#[derive(Debug, Clone)]
pub struct PendingFix {
    pub result: ValidationResult,
    pub outcome_index: usize,
}

#[derive(Debug)]
pub struct WorkflowState {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub stage: Stage,
    pub backlog: Backlog,
    pub cursor: usize,
    pub outcomes: Vec<IssueOutcome>,
    pub errors: Vec<ErrorEntry>,
    /// Increases with every fix attempt; used for branch collision suffixes
    pub fix_counter: u64,
    pub counters: RunCounters,
    /// Every stage entered, in order
    pub trace: Vec<Stage>,
    pub fatal: Option<String>,
    pub cancelled: bool,
    pub empty_backlog: bool,
    pub merge_requests: Vec<String>,
    pub current: IssueWork,
    pub pending_batch: Vec<PendingFix>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

impl WorkflowState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at: Utc::now(),
            stage: Stage::Init,
            backlog: Backlog::empty(),
            cursor: 0,
            outcomes: Vec::new(),
            errors: Vec::new(),
            fix_counter: 0,
            counters: RunCounters::default(),
            trace: Vec::new(),
            fatal: None,
            cancelled: false,
            empty_backlog: false,
            merge_requests: Vec::new(),
            current: IssueWork::default(),
            pending_batch: Vec::new(),
        }
    }

    pub fn current_issue(&self) -> Option<&Issue> {
        self.backlog.get(self.cursor)
    }

    pub fn has_more(&self) -> bool {
        self.cursor < self.backlog.len()
    }

    pub fn next_fix_number(&mut self) -> u64 {
        self.fix_counter += 1;
        self.fix_counter
    }

    pub fn record_error(
        &mut self,
        issue_id: Option<&str>,
        error: impl Into<String>,
        action: impl Into<String>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        self.errors.push(ErrorEntry {
            issue_id: issue_id.map(str::to_string),
            error: error.into(),
            action: action.into(),
            message: (!message.is_empty()).then_some(message),
        });
    }

    /// Mark the current issue as finished with `kind`.
    pub fn conclude(&mut self, kind: OutcomeKind, detail: impl Into<String>) {
        let detail = detail.into();
        self.current.outcome = Some((kind, (!detail.is_empty()).then_some(detail)));
    }

    /// Move the current issue's work into the outcome list and advance the
    /// cursor. Returns the index of the recorded outcome.
    pub fn finish_current(&mut self) -> Option<usize> {
        let issue = self.current_issue()?.clone();
        let work = std::mem::take(&mut self.current);
        let (kind, detail) = work
            .outcome
            .unwrap_or((OutcomeKind::Failed, Some("no outcome recorded".to_string())));
        let (validation, diagnostics) = match work.validation {
            Some(v) => (Some(v.status), v.diagnostics),
            None => (None, Vec::new()),
        };
        self.outcomes.push(IssueOutcome {
            issue,
            kind,
            detail,
            plan: work.plan,
            validation,
            diagnostics,
            branch: work.branch,
            merge_request: work.merge_request,
        });
        self.cursor += 1;
        Some(self.outcomes.len() - 1)
    }

    /// Record every issue from the cursor onwards as skipped.
    pub fn skip_remaining(&mut self, reason: &str) {
        while let Some(issue) = self.current_issue().cloned() {
            self.outcomes.push(IssueOutcome {
                issue,
                kind: OutcomeKind::Skipped,
                detail: Some(reason.to_string()),
                plan: None,
                validation: None,
                diagnostics: Vec::new(),
                branch: None,
                merge_request: None,
            });
            self.cursor += 1;
        }
        self.current = IssueWork::default();
    }

    /// Files touched by fixes waiting in the pending batch.
    pub fn pending_files(&self) -> Vec<PathBuf> {
        self.pending_batch
            .iter()
            .map(|p| p.result.fix.path().to_path_buf())
            .collect()
    }

    pub fn outcome_for(&self, issue_id: &str) -> Option<&IssueOutcome> {
        self.outcomes.iter().find(|o| o.issue.id == issue_id)
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::{prioritize, IssueFilter};
    use crate::issue::{IssueType, Severity};

    fn state() -> WorkflowState {
        let mut state = WorkflowState::new("s1");
        state.backlog = prioritize(
            vec![
                Issue::new("I1", Severity::Blocker, IssueType::Bug, "A.java", 10, "m"),
                Issue::new("I2", Severity::Minor, IssueType::CodeSmell, "B.java", 5, "m"),
            ],
            &IssueFilter::default(),
        )
        .unwrap();
        state
    }

    #[test]
    fn test_finish_current_records_and_advances() {
        let mut state = state();
        state.conclude(OutcomeKind::NeedsReview, "confidence 0.50 below 0.80");
        assert_eq!(state.finish_current(), Some(0));

        assert_eq!(state.cursor, 1);
        assert_eq!(state.current_issue().unwrap().id, "I2");
        let outcome = state.outcome_for("I1").unwrap();
        assert_eq!(outcome.kind, OutcomeKind::NeedsReview);
        assert_eq!(outcome.detail.as_deref(), Some("confidence 0.50 below 0.80"));
        assert!(state.current.outcome.is_none());
    }

    #[test]
    fn test_skip_remaining() {
        let mut state = state();
        state.conclude(OutcomeKind::Fixed, "");
        state.finish_current();
        state.skip_remaining("run cancelled");

        assert!(!state.has_more());
        assert_eq!(state.count(OutcomeKind::Skipped), 1);
        assert_eq!(state.outcomes.len(), 2);
    }

    #[test]
    fn test_record_error() {
        let mut state = state();
        state.record_error(Some("I1"), "syntax_fail", "reverted", "");
        assert_eq!(
            state.errors,
            vec![ErrorEntry {
                issue_id: Some("I1".into()),
                error: "syntax_fail".into(),
                action: "reverted".into(),
                message: None,
            }]
        );
    }

    #[test]
    fn test_fix_counter_is_monotonic() {
        let mut state = state();
        assert_eq!(state.next_fix_number(), 1);
        assert_eq!(state.next_fix_number(), 2);
    }
}
