//! Remediation workflow engine.
//!
//! Drives one run through the stage graph in [`crate::machine`]. Each stage
//! works on the caller's [`WorkflowState`], returns a [`Signal`], and the
//! transition table picks the next stage. Per-issue failures are contained
//! to the issue and recorded; only run-level conditions raise
//! [`Signal::Fatal`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::applicator::{ApplyError, FixApplicator};
use crate::backlog::prioritize;
use crate::clients::{InferenceClient, IssueTracker, TrackerError, VcsClient};
use crate::config::{HealerConfig, PublishMode};
use crate::context::{is_repo_relative, ContextExtractor};
use crate::error::CoreError;
use crate::generator::{FixGenerator, GenerationFailed};
use crate::issue::{ValidationResult, ValidationStatus};
use crate::machine::{transition, Signal, Stage};
use crate::plans::FixPlanStore;
use crate::publisher::{PublishFailed, Publication, Publisher};
use crate::retry::{retry_transient, CancellationFlag, RetryError, RetryPolicy};
use crate::state::{OutcomeKind, PendingFix, WorkflowState};
use crate::summary::RunSummary;
use crate::validator::Validator;

const CANCELLED: &str = "run cancelled";

/// Orchestrates issue retrieval, fix generation, application, validation
/// and publication for one repository.
pub struct WorkflowEngine {
    config: HealerConfig,
    repo_root: PathBuf,
    state_dir: PathBuf,
    retry: RetryPolicy,
    tracker: Arc<dyn IssueTracker>,
    vcs: Arc<dyn VcsClient>,
    extractor: ContextExtractor,
    generator: FixGenerator,
    validator: Validator,
    publisher: Publisher,
    plans: FixPlanStore,
    cancel: CancellationFlag,
    missing_credentials: Vec<String>,
}

impl WorkflowEngine {
    pub fn new(
        config: HealerConfig,
        repo_root: impl Into<PathBuf>,
        tracker: Arc<dyn IssueTracker>,
        inference: Arc<dyn InferenceClient>,
        vcs: Arc<dyn VcsClient>,
    ) -> Self {
        let repo_root = repo_root.into();
        let state_dir = config.state_path(&repo_root);
        let retry = config.retry_policy();
        let prefix = if config.publish.tracker_prefix.trim().is_empty() {
            tracker.prefix()
        } else {
            config.publish.tracker_prefix.clone()
        };

        Self {
            extractor: ContextExtractor::new(repo_root.clone(), config.generation.context_lines),
            generator: FixGenerator::new(inference, config.inference_timeout(), retry.clone()),
            validator: Validator::new(repo_root.clone())
                .with_enabled(config.validation.enabled)
                .with_logic_concern_as_failure(config.validation.logic_concern_is_failure),
            publisher: Publisher::new(
                vcs.clone(),
                prefix,
                config.publish.base_branch.clone(),
                retry.clone(),
            ),
            plans: FixPlanStore::new(&state_dir),
            cancel: CancellationFlag::new(),
            missing_credentials: Vec::new(),
            config,
            repo_root,
            state_dir,
            retry,
            tracker,
            vcs,
        }
    }

    /// Share a cancellation flag with the caller (e.g. a Ctrl-C handler).
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Register a credential the run needs. An empty value aborts the run
    /// at INIT.
    pub fn require_credential(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        if value.map_or(true, |v| v.trim().is_empty()) {
            self.missing_credentials.push(name.into());
        }
        self
    }

    pub fn config(&self) -> &HealerConfig {
        &self.config
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Run with a fresh state.
    pub async fn execute(&self) -> RunSummary {
        let mut state = WorkflowState::default();
        self.run(&mut state).await
    }

    /// Drive `state` from INIT to END and persist the run report.
    pub async fn run(&self, state: &mut WorkflowState) -> RunSummary {
        let span = info_span!("run", session_id = %state.session_id);
        self.drive(state).instrument(span).await
    }

    async fn drive(&self, state: &mut WorkflowState) -> RunSummary {
        let backup_dir = self.state_dir.join("backups").join(&state.session_id);
        let mut applicator = FixApplicator::new(self.repo_root.clone(), backup_dir);

        info!(
            project = %self.config.project_key,
            repo = %self.repo_root.display(),
            mode = self.config.publish.mode.as_str(),
            "Run started"
        );
        state.stage = Stage::Init;
        state.trace.push(Stage::Init);

        while !state.stage.is_terminal() {
            let stage = state.stage;
            let signal = if stage.is_per_issue() {
                let issue_id = state
                    .current_issue()
                    .map(|i| i.id.clone())
                    .unwrap_or_default();
                let span = info_span!("issue", issue_id = %issue_id);
                self.step(stage, state, &mut applicator)
                    .instrument(span)
                    .await
            } else {
                self.step(stage, state, &mut applicator).await
            };

            let next = match transition(stage, signal) {
                Some(next) => next,
                None if stage == Stage::Error => Stage::End,
                None => {
                    self.fatal(
                        state,
                        "internal_error",
                        format!("no transition from {} on {:?}", stage, signal),
                    );
                    Stage::Error
                }
            };
            debug!(from = %stage, to = %next, ?signal, "Transition");
            state.stage = next;
            state.trace.push(next);
        }

        let summary = RunSummary::from_state(state);
        if let Err(e) = summary.save(&self.state_dir) {
            warn!("Failed to save run report: {}", e);
        }
        info!(
            status = summary.status.as_str(),
            total = summary.total_issues,
            applied = summary.fixes_applied,
            validated = summary.fixes_validated,
            merge_requests = summary.merge_requests_created,
            seconds = summary.processing_time_seconds,
            "Run finished"
        );
        summary
    }

    async fn step(
        &self,
        stage: Stage,
        state: &mut WorkflowState,
        applicator: &mut FixApplicator,
    ) -> Signal {
        match stage {
            Stage::Init => self.init(state),
            Stage::PrepareRepo => self.prepare_repo(state).await,
            Stage::ConnectTracker => self.connect_tracker(state).await,
            Stage::FetchIssues => self.fetch_issues(state).await,
            Stage::AnalyzeIssue => self.analyze_issue(state, applicator).await,
            Stage::CreateFixPlan => self.create_fix_plan(state).await,
            Stage::ApplyFix => self.apply_fix(state, applicator).await,
            Stage::ValidateFix => self.validate_fix(state, applicator),
            Stage::PublishFix => self.publish_fix(state, applicator).await,
            Stage::LogResult => self.log_result(state, applicator).await,
            Stage::Finalize => self.finalize(state, applicator).await,
            Stage::Error => self.handle_error(state, applicator),
            Stage::End => Signal::Proceed,
        }
    }

    // ---- run-level stages ----

    fn init(&self, state: &mut WorkflowState) -> Signal {
        if let Err(e) = self.config.validate() {
            return self.fatal(state, "invalid_config", e.to_string());
        }
        if !self.missing_credentials.is_empty() {
            return self.fatal(
                state,
                "missing_credentials",
                format!("empty credentials: {}", self.missing_credentials.join(", ")),
            );
        }
        if self.cancel.is_cancelled() {
            return self.cancelled(state);
        }
        Signal::Proceed
    }

    async fn prepare_repo(&self, state: &mut WorkflowState) -> Signal {
        if !self.repo_root.is_dir() {
            return self.fatal(
                state,
                "repository_unavailable",
                format!("{} is not a directory", self.repo_root.display()),
            );
        }
        let base = self.config.publish.base_branch.as_str();
        let ready = retry_transient(&self.retry, &self.cancel, "ensure_ready", |_| {
            self.vcs.ensure_ready(base)
        })
        .await;
        match ready {
            Ok(()) => {
                info!(base, "Repository ready");
                Signal::Proceed
            }
            Err(RetryError::Cancelled { .. }) => self.cancelled(state),
            Err(e) => self.fatal(state, "repository_unavailable", retry_reason(e)),
        }
    }

    async fn connect_tracker(&self, state: &mut WorkflowState) -> Signal {
        let connected = retry_transient(&self.retry, &self.cancel, "validate_connection", |_| {
            self.tracker.validate_connection()
        })
        .await;
        match connected {
            Ok(true) => {
                info!("Tracker connection verified");
                Signal::Proceed
            }
            Ok(false) => self.fatal(
                state,
                "tracker_unreachable",
                "tracker did not report a healthy status",
            ),
            Err(RetryError::Cancelled { .. }) => self.cancelled(state),
            Err(e) => {
                let (label, reason) = tracker_failure(e);
                self.fatal(state, label, reason)
            }
        }
    }

    async fn fetch_issues(&self, state: &mut WorkflowState) -> Signal {
        let filter = &self.config.filter;
        let fetched = retry_transient(&self.retry, &self.cancel, "fetch_issues", |_| {
            self.tracker
                .fetch_issues(&self.config.project_key, &filter.severities, &filter.types)
        })
        .await;
        let issues = match fetched {
            Ok(issues) => issues,
            Err(RetryError::Cancelled { .. }) => return self.cancelled(state),
            Err(e) => {
                let (label, reason) = tracker_failure(e);
                return self.fatal(state, label, reason);
            }
        };

        state.counters.fetched = issues.len();
        match prioritize(issues, filter) {
            Ok(backlog) => {
                info!(
                    fetched = state.counters.fetched,
                    backlog = backlog.len(),
                    "Backlog prioritized"
                );
                state.backlog = backlog;
                Signal::Proceed
            }
            Err(empty) => {
                info!("{}", empty);
                state.empty_backlog = true;
                Signal::EmptyBacklog
            }
        }
    }

    // ---- per-issue stages ----

    async fn analyze_issue(
        &self,
        state: &mut WorkflowState,
        applicator: &mut FixApplicator,
    ) -> Signal {
        let Some(issue) = state.current_issue().cloned() else {
            return self.fatal(state, "internal_error", "issue cursor is past the backlog");
        };
        if self.cancel.is_cancelled() {
            return self.skip_cancelled(state);
        }

        if self.config.publish.mode == PublishMode::Batch
            && state.pending_files().iter().any(|p| *p == issue.file)
        {
            info!(file = %issue.file.display(), "File already has a pending fix, flushing batch");
            if let Err(e) = self.flush_batch(state, applicator).await {
                return self.fatal(state, e.label(), e.to_string());
            }
        }

        info!(
            severity = %issue.severity,
            issue_type = %issue.issue_type,
            file = %issue.file.display(),
            line = issue.line,
            "Analyzing issue"
        );
        match self.extractor.extract(&issue).await {
            Ok(ctx) => {
                state.counters.analyzed += 1;
                state.current.context = Some(ctx);
                Signal::Proceed
            }
            Err(e) => {
                warn!("Cannot extract code context: {}", e);
                state.record_error(Some(&issue.id), context_error_label(&e), "skipped", e.to_string());
                state.conclude(OutcomeKind::Failed, e.to_string());
                Signal::IssueDone
            }
        }
    }

    async fn create_fix_plan(&self, state: &mut WorkflowState) -> Signal {
        let (Some(issue), Some(ctx)) = (state.current_issue().cloned(), state.current.context.clone())
        else {
            return self.fatal(state, "internal_error", "no code context for the current issue");
        };

        let plan = match self.generator.plan(&issue, &ctx, &self.cancel).await {
            Ok(plan) => plan,
            Err(failed) => return self.generation_failed(state, failed),
        };
        state.counters.plans_created += 1;

        let threshold = self.config.generation.confidence_threshold;
        if plan.needs_review(threshold) {
            info!(
                confidence = plan.confidence,
                threshold, "Plan below confidence threshold, needs manual review"
            );
            state.conclude(
                OutcomeKind::NeedsReview,
                format!(
                    "confidence {:.2} below threshold {:.2}",
                    plan.confidence, threshold
                ),
            );
            state.current.plan = Some(plan);
            return Signal::IssueDone;
        }

        if let Err(e) = self.plans.append(&self.config.project_key, &plan) {
            warn!("Failed to store fix plan: {}", e);
        }
        state.current.plan = Some(plan);
        Signal::Proceed
    }

    async fn apply_fix(&self, state: &mut WorkflowState, applicator: &mut FixApplicator) -> Signal {
        let (Some(issue), Some(plan)) = (state.current_issue().cloned(), state.current.plan.clone())
        else {
            return self.fatal(state, "internal_error", "no fix plan for the current issue");
        };
        if self.cancel.is_cancelled() {
            return self.skip_cancelled(state);
        }

        state.current.attempt += 1;
        let attempt = state.current.attempt;
        let fix_number = state.next_fix_number();

        if !is_repo_relative(&issue.file) {
            let e = CoreError::PathOutsideRepo(issue.file.clone());
            state.record_error(Some(&issue.id), context_error_label(&e), "skipped", e.to_string());
            state.conclude(OutcomeKind::Failed, e.to_string());
            return Signal::IssueDone;
        }

        // The file may have changed since ANALYZE_ISSUE or a previous attempt,
        // so the snapshot and window are taken again here.
        let original = match tokio::fs::read_to_string(self.repo_root.join(&issue.file)).await {
            Ok(content) => content,
            Err(e) => {
                let message = format!("cannot read {}: {}", issue.file.display(), e);
                state.record_error(Some(&issue.id), "io_error", "skipped", message.clone());
                state.conclude(OutcomeKind::Failed, message);
                return Signal::IssueDone;
            }
        };
        let ctx = match self.extractor.build(&issue, &original) {
            Ok(ctx) => ctx,
            Err(e) => {
                state.record_error(Some(&issue.id), context_error_label(&e), "skipped", e.to_string());
                state.conclude(OutcomeKind::Failed, e.to_string());
                return Signal::IssueDone;
            }
        };

        let feedback = state.current.feedback.take();
        let fix = match self
            .generator
            .patch(&plan, &ctx, &original, attempt, feedback.as_deref(), &self.cancel)
            .await
        {
            Ok(fix) => fix,
            Err(failed) => return self.generation_failed(state, failed),
        };
        state.current.context = Some(ctx);

        match applicator.apply(&fix) {
            Ok(applied) => {
                if !state.current.applied {
                    state.current.applied = true;
                    state.counters.fixes_applied += 1;
                }
                debug!(
                    fix_number,
                    attempt,
                    path = %applied.path.display(),
                    start = applied.byte_range.start,
                    end = applied.byte_range.end,
                    "Fix applied"
                );
                state.current.fix = Some(fix);
                Signal::Proceed
            }
            Err(e @ ApplyError::RollbackFailed { .. }) => {
                self.abort_issue(state, e.label(), e.to_string())
            }
            Err(e) => {
                let action = match e {
                    ApplyError::Io { .. } => "reverted",
                    _ => "skipped",
                };
                warn!("Apply failed: {}", e);
                state.record_error(Some(&issue.id), e.label(), action, e.to_string());
                state.conclude(OutcomeKind::Failed, e.to_string());
                Signal::IssueDone
            }
        }
    }

    fn validate_fix(&self, state: &mut WorkflowState, applicator: &mut FixApplicator) -> Signal {
        let (Some(fix), Some(ctx)) = (state.current.fix.take(), state.current.context.clone())
        else {
            return self.fatal(state, "internal_error", "no applied fix for the current issue");
        };
        let issue_id = fix.issue().id.clone();

        let result = self.validator.validate(fix, &ctx);
        info!(
            status = result.status.as_str(),
            attempt = result.fix.attempt(),
            diagnostics = result.diagnostics.len(),
            "Validation finished"
        );

        if result.is_pass() {
            state.counters.fixes_validated += 1;
            state.current.validation = Some(result);
            return Signal::Proceed;
        }

        if let Err(e) = applicator.rollback(&result.fix) {
            return self.abort_issue(state, e.label(), e.to_string());
        }
        let diagnostics = result.diagnostics.join("\n");

        if !self.validator.is_hard_failure(&result) {
            info!("Fix reverted, needs manual review");
            state.conclude(OutcomeKind::NeedsReview, result.diagnostics.join("; "));
            state.current.validation = Some(result);
            return Signal::IssueDone;
        }

        if result.status == ValidationStatus::SyntaxFail
            && result.fix.attempt() < self.config.generation.fix_attempts
        {
            warn!(
                attempt = result.fix.attempt(),
                max = self.config.generation.fix_attempts,
                "Syntax check failed, regenerating patch"
            );
            state.current.feedback = Some(diagnostics);
            state.current.validation = Some(result);
            return Signal::RetryFix;
        }

        warn!(status = result.status.as_str(), "Fix rejected and reverted");
        state.record_error(Some(&issue_id), result.status.as_str(), "reverted", diagnostics.clone());
        state.conclude(OutcomeKind::Failed, diagnostics);
        state.current.validation = Some(result);
        Signal::IssueDone
    }

    /// Publication runs to completion once started, so it does not observe
    /// the run's cancellation flag.
    async fn publish_fix(&self, state: &mut WorkflowState, applicator: &mut FixApplicator) -> Signal {
        let Some(result) = state.current.validation.clone().filter(|r| r.is_pass()) else {
            return self.fatal(state, "internal_error", "no validated fix to publish");
        };

        match self.config.publish.mode {
            PublishMode::Off => {
                applicator.release(result.fix.path());
                state.conclude(OutcomeKind::Fixed, "left in working tree");
                Signal::Proceed
            }
            PublishMode::Batch => {
                state.current.batched = true;
                state.conclude(OutcomeKind::Fixed, "queued for batch publish");
                Signal::Proceed
            }
            PublishMode::PerIssue => {
                match self
                    .publisher
                    .publish_one(&result, state.fix_counter, &CancellationFlag::new())
                    .await
                {
                    Ok(publication) => {
                        applicator.release(result.fix.path());
                        state.current.branch = Some(publication.branch.clone());
                        state.current.merge_request = Some(publication.merge_request_url.clone());
                        record_publication(state, &publication);
                        state.conclude(OutcomeKind::Fixed, "");
                        Signal::Proceed
                    }
                    Err(failed) => {
                        if failed.has_commits() {
                            state.counters.branches_created += 1;
                        }
                        if let Err(e) = publish_failed(state, applicator, &result, &failed) {
                            return self.abort_issue(state, e.label(), e.to_string());
                        }
                        state.conclude(OutcomeKind::Failed, failed.to_string());
                        Signal::IssueDone
                    }
                }
            }
        }
    }

    async fn log_result(&self, state: &mut WorkflowState, applicator: &mut FixApplicator) -> Signal {
        let batched = state
            .current
            .validation
            .clone()
            .filter(|_| state.current.batched);
        if let Some((kind, detail)) = &state.current.outcome {
            info!(
                outcome = kind.as_str(),
                detail = detail.as_deref().unwrap_or(""),
                "Issue finished"
            );
        }

        let index = state.finish_current();
        if let (Some(result), Some(outcome_index)) = (batched, index) {
            state.pending_batch.push(PendingFix {
                result,
                outcome_index,
            });
            if state.pending_batch.len() >= self.config.publish.batch_size {
                if let Err(e) = self.flush_batch(state, applicator).await {
                    return self.fatal(state, e.label(), e.to_string());
                }
            }
        }

        if self.cancel.is_cancelled() {
            state.cancelled = true;
        }
        if state.cancelled {
            state.skip_remaining(CANCELLED);
            return Signal::BacklogExhausted;
        }
        if state.has_more() {
            Signal::MoreIssues
        } else {
            Signal::BacklogExhausted
        }
    }

    async fn finalize(&self, state: &mut WorkflowState, applicator: &mut FixApplicator) -> Signal {
        if !state.pending_batch.is_empty() {
            let outcome = if state.cancelled {
                revert_pending(state, applicator, "run cancelled before batch publish")
            } else {
                self.flush_batch(state, applicator).await
            };
            if let Err(e) = outcome {
                return self.fatal(state, e.label(), e.to_string());
            }
        }

        let c = &state.counters;
        info!(
            fetched = c.fetched,
            analyzed = c.analyzed,
            fixed = state.count(OutcomeKind::Fixed),
            validated = c.fixes_validated,
            published = c.published,
            failed = state.count(OutcomeKind::Failed),
            needs_review = state.count(OutcomeKind::NeedsReview),
            "Run finalized"
        );
        Signal::Proceed
    }

    fn handle_error(&self, state: &mut WorkflowState, applicator: &mut FixApplicator) -> Signal {
        for pending in std::mem::take(&mut state.pending_batch) {
            if let Some(outcome) = state.outcomes.get_mut(pending.outcome_index) {
                outcome.kind = OutcomeKind::Skipped;
                outcome.detail = Some("run aborted before batch publish".to_string());
            }
        }
        for failure in applicator.restore_all() {
            error!("Failed to restore backup: {}", failure);
        }
        state.skip_remaining("run aborted");
        error!(
            reason = state.fatal.as_deref().unwrap_or("unknown"),
            "Run aborted"
        );
        Signal::Proceed
    }

    // ---- helpers ----

    /// Publish every pending batch fix on one branch.
    async fn flush_batch(
        &self,
        state: &mut WorkflowState,
        applicator: &mut FixApplicator,
    ) -> Result<(), ApplyError> {
        if state.pending_batch.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut state.pending_batch);
        let results: Vec<ValidationResult> = pending.iter().map(|p| p.result.clone()).collect();
        info!(fixes = results.len(), "Publishing batch");

        match self
            .publisher
            .publish_batch(&results, state.fix_counter, &CancellationFlag::new())
            .await
        {
            Ok(publication) => {
                for p in &pending {
                    applicator.release(p.result.fix.path());
                    if let Some(outcome) = state.outcomes.get_mut(p.outcome_index) {
                        outcome.branch = Some(publication.branch.clone());
                        outcome.merge_request = Some(publication.merge_request_url.clone());
                        outcome.detail = None;
                    }
                }
                record_publication(state, &publication);
            }
            Err(failed) => {
                if failed.has_commits() {
                    state.counters.branches_created += 1;
                }
                for p in &pending {
                    publish_failed(state, applicator, &p.result, &failed)?;
                    if let Some(outcome) = state.outcomes.get_mut(p.outcome_index) {
                        outcome.kind = OutcomeKind::Failed;
                        outcome.detail = Some(failed.to_string());
                    }
                }
            }
        }
        Ok(())
    }

    fn generation_failed(&self, state: &mut WorkflowState, failed: GenerationFailed) -> Signal {
        if failed.cancelled {
            return self.skip_cancelled(state);
        }
        if failed.fatal {
            return self.abort_issue(state, "inference_unavailable", failed.reason);
        }
        warn!(attempts = failed.attempts, "Generation failed: {}", failed.reason);
        state.record_error(
            Some(&failed.issue_id),
            "generation_failed",
            "skipped",
            failed.reason.clone(),
        );
        state.conclude(OutcomeKind::Failed, failed.to_string());
        Signal::IssueDone
    }

    fn skip_cancelled(&self, state: &mut WorkflowState) -> Signal {
        info!("Run cancelled, skipping issue");
        state.cancelled = true;
        state.conclude(OutcomeKind::Skipped, CANCELLED);
        Signal::IssueDone
    }

    fn cancelled(&self, state: &mut WorkflowState) -> Signal {
        info!(stage = %state.stage, "Run cancelled");
        state.cancelled = true;
        Signal::Cancelled
    }

    /// Record the current issue as failed, then raise a run-level failure.
    fn abort_issue(&self, state: &mut WorkflowState, error: &str, message: impl Into<String>) -> Signal {
        let message = message.into();
        state.conclude(OutcomeKind::Failed, message.clone());
        state.finish_current();
        self.fatal(state, error, message)
    }

    fn fatal(&self, state: &mut WorkflowState, error: &str, message: impl Into<String>) -> Signal {
        let message = message.into();
        error!(stage = %state.stage, error, "{}", message);
        state.record_error(None, error, "aborted", message.clone());
        state.fatal = Some(message);
        Signal::Fatal
    }
}

fn record_publication(state: &mut WorkflowState, publication: &Publication) {
    state.counters.branches_created += 1;
    state.counters.merge_requests_created += 1;
    state.counters.published += publication.issue_ids.len();
    state.merge_requests.push(publication.merge_request_url.clone());
}

/// Keep committed work, revert anything that never left the working tree.
fn publish_failed(
    state: &mut WorkflowState,
    applicator: &mut FixApplicator,
    result: &ValidationResult,
    failed: &PublishFailed,
) -> Result<(), ApplyError> {
    let action = if failed.is_committed(&result.fix.issue().id) {
        applicator.release(result.fix.path());
        "kept_local_commit"
    } else {
        applicator.rollback(&result.fix)?;
        "reverted"
    };
    warn!(branch = %failed.branch, action, "Publish failed: {}", failed.reason);
    state.record_error(
        Some(&result.fix.issue().id),
        "publish_failed",
        action,
        failed.reason.clone(),
    );
    Ok(())
}

fn revert_pending(
    state: &mut WorkflowState,
    applicator: &mut FixApplicator,
    reason: &str,
) -> Result<(), ApplyError> {
    for pending in std::mem::take(&mut state.pending_batch) {
        applicator.rollback(&pending.result.fix)?;
        if let Some(outcome) = state.outcomes.get_mut(pending.outcome_index) {
            outcome.kind = OutcomeKind::Skipped;
            outcome.detail = Some(reason.to_string());
        }
    }
    Ok(())
}

fn context_error_label(err: &CoreError) -> &'static str {
    match err {
        CoreError::PathOutsideRepo(_) => "path_outside_repo",
        _ => "context_unavailable",
    }
}

fn tracker_failure(err: RetryError<TrackerError>) -> (&'static str, String) {
    match err {
        RetryError::Permanent {
            error: TrackerError::Auth(message),
            ..
        } => ("tracker_auth_failed", message),
        RetryError::Permanent { error, .. } => ("tracker_error", error.to_string()),
        other => ("tracker_unreachable", retry_reason(other)),
    }
}

fn retry_reason<E: std::fmt::Display>(err: RetryError<E>) -> String {
    match err {
        RetryError::Exhausted { attempts, last } => {
            format!("{} (gave up after {} attempts)", last, attempts)
        }
        RetryError::Permanent { error, .. } => error.to_string(),
        RetryError::Cancelled { .. } => CANCELLED.to_string(),
    }
}
