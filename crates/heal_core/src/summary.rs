//! Persisted run summary.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CoreResult;
use crate::machine::Stage;
use crate::state::{ErrorEntry, IssueOutcome, OutcomeKind, WorkflowState};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    EmptyBacklog,
    Cancelled,
    Aborted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::EmptyBacklog => "empty_backlog",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        }
    }
}

/// Structured record of one run, written to `<state_dir>/reports/<session_id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: String,
    pub status: RunStatus,
    pub total_issues: usize,
    pub fixes_applied: usize,
    pub fixes_validated: usize,
    pub branches_created: usize,
    pub merge_requests_created: usize,
    pub success_rate: f64,
    pub processing_time_seconds: f64,
    pub errors: Vec<ErrorEntry>,

    pub fetched: usize,
    pub analyzed: usize,
    pub published: usize,
    pub fixed: usize,
    pub needs_review: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<IssueOutcome>,
    pub merge_requests: Vec<String>,
    pub stages: Vec<Stage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// Aggregate the final state of a run.
    pub fn from_state(state: &WorkflowState) -> Self {
        let finished_at = Utc::now();
        let total_issues = state.backlog.len();
        let c = &state.counters;
        let success_rate = if total_issues == 0 {
            0.0
        } else {
            c.fixes_validated as f64 / total_issues as f64
        };
        let status = if state.fatal.is_some() {
            RunStatus::Aborted
        } else if state.cancelled {
            RunStatus::Cancelled
        } else if state.empty_backlog {
            RunStatus::EmptyBacklog
        } else {
            RunStatus::Completed
        };
        let elapsed = (finished_at - state.started_at).num_milliseconds().max(0) as f64 / 1000.0;

        Self {
            session_id: state.session_id.clone(),
            status,
            total_issues,
            fixes_applied: c.fixes_applied,
            fixes_validated: c.fixes_validated,
            branches_created: c.branches_created,
            merge_requests_created: c.merge_requests_created,
            success_rate,
            processing_time_seconds: elapsed,
            errors: state.errors.clone(),
            fetched: c.fetched,
            analyzed: c.analyzed,
            published: c.published,
            fixed: state.count(OutcomeKind::Fixed),
            needs_review: state.count(OutcomeKind::NeedsReview),
            failed: state.count(OutcomeKind::Failed),
            skipped: state.count(OutcomeKind::Skipped),
            outcomes: state.outcomes.clone(),
            merge_requests: state.merge_requests.clone(),
            stages: state.trace.clone(),
            started_at: state.started_at,
            finished_at,
        }
    }

    /// Whether any issue ended as failed.
    pub fn has_issue_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn report_path(state_dir: &Path, session_id: &str) -> PathBuf {
        state_dir.join("reports").join(format!("{}.json", session_id))
    }

    /// Save as pretty JSON under `<state_dir>/reports`.
    pub fn save(&self, state_dir: &Path) -> CoreResult<PathBuf> {
        let path = Self::report_path(state_dir, &self.session_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        info!("Saved run report to {}", path.display());
        Ok(path)
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Most recently written report in `<state_dir>/reports`, if any.
    pub fn latest(state_dir: &Path) -> CoreResult<Option<PathBuf>> {
        let dir = state_dir.join("reports");
        if !dir.exists() {
            return Ok(None);
        }
        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, path));
            }
        }
        Ok(newest.map(|(_, p)| p))
    }
}
