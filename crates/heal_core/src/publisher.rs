//! Branch, commit and merge request protocol for validated fixes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::clients::{VcsClient, VcsError};
use crate::context::Language;
use crate::issue::{CodeFix, Issue, ValidationResult};
use crate::retry::{retry_transient, CancellationFlag, RetryError, RetryPolicy};

const SLUG_MAX: usize = 40;

/// Publishing a fix or batch failed. `committed` lists the issues whose
/// local commits were created and kept for a manual push.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("publish to {branch} failed: {reason}")]
pub struct PublishFailed {
    pub branch: String,
    pub reason: String,
    pub committed: Vec<String>,
}

impl PublishFailed {
    /// Whether a local commit exists for `issue_id`.
    pub fn is_committed(&self, issue_id: &str) -> bool {
        self.committed.iter().any(|id| id == issue_id)
    }

    /// Whether the branch holds at least one commit.
    pub fn has_commits(&self) -> bool {
        !self.committed.is_empty()
    }
}

/// A published branch and its review request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub branch: String,
    pub commits: Vec<String>,
    pub merge_request_url: String,
    pub issue_ids: Vec<String>,
}

/// Turns PASS-ed fixes into branches, commits and merge requests.
#[derive(Clone)]
pub struct Publisher {
    vcs: Arc<dyn VcsClient>,
    tracker_prefix: String,
    base_branch: String,
    retry: RetryPolicy,
}

impl Publisher {
    pub fn new(
        vcs: Arc<dyn VcsClient>,
        tracker_prefix: impl Into<String>,
        base_branch: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            vcs,
            tracker_prefix: tracker_prefix.into(),
            base_branch: base_branch.into(),
            retry,
        }
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    /// `fix/<prefix>-<short-id>-<slug>`
    pub fn branch_name(&self, issue: &Issue) -> String {
        format!(
            "fix/{}-{}-{}",
            self.tracker_prefix,
            issue.short_id(),
            slugify(&issue.message)
        )
    }

    /// `fix/<prefix>-batch-<timestamp>-<category>`, where the category is the
    /// shared issue type or `mixed`.
    pub fn batch_branch_name(&self, fixes: &[ValidationResult], at: DateTime<Utc>) -> String {
        let mut types = fixes.iter().map(|r| r.fix.issue().issue_type);
        let category = match types.next() {
            Some(first) if types.all(|t| t == first) => first.slug(),
            _ => "mixed",
        };
        format!(
            "fix/{}-batch-{}-{}",
            self.tracker_prefix,
            at.format("%Y%m%d%H%M%S"),
            category
        )
    }

    pub fn commit_message(&self, fix: &CodeFix) -> String {
        let issue = fix.issue();
        format!(
            "fix({tracker}): resolve {label} in {file_name}\n\n\
- Issue: {id}\n\
- Type: {severity} {issue_type}\n\
- File: {path}:{line}\n\
- Fix: {brief}\n\
- Confidence: {confidence:.2}\n\n\
Resolves issue: {id}",
            tracker = self.tracker_prefix,
            label = issue.issue_type.label(),
            file_name = issue.file_name(),
            id = issue.id,
            severity = issue.severity,
            issue_type = issue.issue_type,
            path = issue.file.display(),
            line = issue.line,
            brief = fix.plan().brief(),
            confidence = fix.plan().confidence,
        )
    }

    pub fn merge_request_title(&self, fixes: &[ValidationResult]) -> String {
        match fixes {
            [single] => {
                let issue = single.fix.issue();
                format!(
                    "fix({}): resolve {} in {}",
                    self.tracker_prefix,
                    issue.issue_type.label(),
                    issue.file_name()
                )
            }
            many => format!(
                "fix({}): resolve {} issues",
                self.tracker_prefix,
                many.len()
            ),
        }
    }

    pub fn merge_request_body(&self, fixes: &[ValidationResult]) -> String {
        let mut body = String::new();
        if fixes.len() > 1 {
            body.push_str(&format!(
                "Automated remediation of {} static-analysis issues, one commit per fix.\n\n",
                fixes.len()
            ));
        }
        for result in fixes {
            body.push_str(&fix_section(result, fixes.len() > 1));
        }
        body.push_str("\n---\nGenerated by heal. Please review before merging.\n");
        body
    }

    /// Publish one validated fix on its own branch.
    pub async fn publish_one(
        &self,
        result: &ValidationResult,
        fix_counter: u64,
        cancel: &CancellationFlag,
    ) -> Result<Publication, PublishFailed> {
        let branch = self.branch_name(result.fix.issue());
        self.publish(std::slice::from_ref(result), branch, fix_counter, cancel)
            .await
    }

    /// Publish a batch of validated fixes on one branch, one commit per fix.
    pub async fn publish_batch(
        &self,
        results: &[ValidationResult],
        fix_counter: u64,
        cancel: &CancellationFlag,
    ) -> Result<Publication, PublishFailed> {
        let branch = self.batch_branch_name(results, Utc::now());
        self.publish(results, branch, fix_counter, cancel).await
    }

    async fn publish(
        &self,
        results: &[ValidationResult],
        branch: String,
        fix_counter: u64,
        cancel: &CancellationFlag,
    ) -> Result<Publication, PublishFailed> {
        let fail = |branch: &str, reason: String, committed: Vec<String>| PublishFailed {
            branch: branch.to_string(),
            reason,
            committed,
        };

        if results.is_empty() {
            return Err(fail(&branch, "nothing to publish".to_string(), Vec::new()));
        }
        if let Some(bad) = results.iter().find(|r| !r.is_pass()) {
            return Err(fail(
                &branch,
                format!(
                    "fix for {} did not pass validation ({})",
                    bad.fix.issue().id,
                    bad.status.as_str()
                ),
                Vec::new(),
            ));
        }

        let branch = match self.vcs.create_branch(&branch, &self.base_branch).await {
            Ok(()) => branch,
            Err(VcsError::BranchExists(_)) => {
                let renamed = format!("{}-{}", branch, fix_counter);
                warn!(branch = %branch, renamed = %renamed, "Branch exists, retrying with suffix");
                self.vcs
                    .create_branch(&renamed, &self.base_branch)
                    .await
                    .map_err(|e| fail(&renamed, e.to_string(), Vec::new()))?;
                renamed
            }
            Err(e) => return Err(fail(&branch, e.to_string(), Vec::new())),
        };

        let issue_ids: Vec<String> = results.iter().map(|r| r.fix.issue().id.clone()).collect();
        let mut commits = Vec::with_capacity(results.len());
        for result in results {
            let message = self.commit_message(&result.fix);
            let files = vec![result.fix.path().to_path_buf()];
            match self.vcs.commit(&branch, &message, &files).await {
                Ok(hash) => commits.push(hash),
                Err(e) => {
                    self.return_to_base().await;
                    let committed = issue_ids[..commits.len()].to_vec();
                    return Err(fail(&branch, e.to_string(), committed));
                }
            }
        }

        let title = self.merge_request_title(results);
        let body = self.merge_request_body(results);
        let url = retry_transient(&self.retry, cancel, "open_merge_request", |_| {
            self.vcs.open_merge_request(&branch, &title, &body)
        })
        .await;

        self.return_to_base().await;

        let merge_request_url = url.map_err(|e| {
            let reason = match e {
                RetryError::Exhausted { last, .. } => last.to_string(),
                RetryError::Permanent { error, .. } => error.to_string(),
                RetryError::Cancelled { .. } => "run cancelled".to_string(),
            };
            fail(&branch, reason, issue_ids.clone())
        })?;

        info!(
            branch = %branch,
            commits = commits.len(),
            url = %merge_request_url,
            "Published fixes"
        );
        Ok(Publication {
            branch,
            commits,
            merge_request_url,
            issue_ids,
        })
    }

    async fn return_to_base(&self) {
        if let Err(e) = self.vcs.checkout(&self.base_branch).await {
            warn!(base = %self.base_branch, "Failed to return to base branch: {}", e);
        }
    }
}

/// Lowercase ASCII slug with single dashes, capped at a word boundary.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let mut slug = slug.trim_end_matches('-').to_string();
    if slug.len() > SLUG_MAX {
        slug.truncate(SLUG_MAX);
        if let Some(cut) = slug.rfind('-') {
            slug.truncate(cut);
        }
    }
    if slug.is_empty() {
        "fix".to_string()
    } else {
        slug
    }
}

/// Lines that differ between `old` and `new`, trimmed to the changed region.
pub fn changed_lines<'a>(old: &'a str, new: &'a str) -> (Vec<&'a str>, Vec<&'a str>) {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let prefix = old_lines
        .iter()
        .zip(&new_lines)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old_lines.len().min(new_lines.len()) - prefix;
    let suffix = old_lines
        .iter()
        .rev()
        .zip(new_lines.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    (
        old_lines[prefix..old_lines.len() - suffix].to_vec(),
        new_lines[prefix..new_lines.len() - suffix].to_vec(),
    )
}

fn fix_section(result: &ValidationResult, heading: bool) -> String {
    let fix = &result.fix;
    let issue = fix.issue();
    let plan = fix.plan();
    let fence = Language::from_path(fix.path()).fence();
    let (before, after) = changed_lines(fix.original(), fix.replacement());

    let mut out = String::new();
    if heading {
        out.push_str(&format!("# {} `{}`\n\n", issue.id, issue.file.display()));
    }
    out.push_str(&format!(
        "## Problem\n**{} {}** at `{}:{}`{}\n\n{}\n\n",
        issue.severity,
        issue.issue_type,
        issue.file.display(),
        issue.line,
        issue
            .rule
            .as_deref()
            .map(|r| format!(" (rule `{}`)", r))
            .unwrap_or_default(),
        issue.message
    ));
    out.push_str(&format!(
        "## Solution\n{}\n\n{}\n\n",
        plan.solution.trim(),
        plan.analysis.trim()
    ));
    out.push_str(&format!(
        "## Changes\n**Before**\n```{fence}\n{}\n```\n**After**\n```{fence}\n{}\n```\n\n",
        before.join("\n"),
        after.join("\n"),
    ));
    out.push_str(&format!(
        "## Validation\n\
- [x] Syntax check passed\n\
- [x] Enclosing signature unchanged\n\
- [x] No unresolved symbols in the changed lines\n\
- [ ] Behaviour reviewed by a human\n\n\
Confidence: {:.2} | Effort: {}\n",
        plan.confidence,
        plan.effort.as_str()
    ));
    if !plan.side_effects.trim().is_empty() {
        out.push_str(&format!("Side effects: {}\n", plan.side_effects.trim()));
    }
    out.push('\n');
    out
}
