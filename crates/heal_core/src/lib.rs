//! # heal_core
//!
//! Remediation workflow engine for heal.
//!
//! This crate takes static-analysis findings from an issue tracker, asks a
//! language model for a fix plan and a patch, applies the patch under a
//! backup-then-overwrite discipline, validates it and publishes accepted
//! fixes as review requests.
//!
//! # Architecture
//!
//! - **Issue model**: findings, fix plans, code fixes and validation results
//! - **Backlog**: filtering and stable priority ordering
//! - **Generator**: prompt construction and response parsing
//! - **Applicator**: backup arena, atomic writes, idempotent rollback
//! - **Validator**: tree-sitter syntax check plus structural heuristics
//! - **Publisher**: branch naming, commit template, merge request body
//! - **Engine**: explicit stage machine over a per-run [`WorkflowState`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use heal_core::{HealerConfig, WorkflowEngine};
//!
//! let config = HealerConfig::load(&repo_root)?;
//! let engine = WorkflowEngine::new(config, repo_root, tracker, inference, vcs);
//! let summary = engine.execute().await;
//! println!("{} of {} issues fixed", summary.fixes_validated, summary.total_issues);
//! ```

pub mod applicator;
pub mod backlog;
pub mod clients;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod generator;
pub mod git;
pub mod issue;
pub mod machine;
pub mod mock;
pub mod plans;
pub mod publisher;
pub mod retry;
pub mod state;
pub mod summary;
pub mod validator;

pub use applicator::{AppliedFix, ApplyError, BackupArena, FixApplicator, RollbackResult};
pub use backlog::{prioritize, Backlog, EmptyBacklog, IssueFilter};
pub use clients::{
    InferenceClient, InferenceError, IssueTracker, TrackerError, Transient, VcsClient, VcsError,
};
pub use config::{HealerConfig, PublishMode, CONFIG_FILE};
pub use context::{CodeContext, ContextExtractor, Language};
pub use engine::WorkflowEngine;
pub use error::{CoreError, CoreResult};
pub use generator::{FixGenerator, GenerationFailed, Prompt};
pub use git::{GitCommit, GitIdentity, GitOps};
pub use issue::{
    CodeFix, Effort, FixPlan, Issue, IssueType, Severity, ValidationResult, ValidationStatus,
};
pub use machine::{transition, Signal, Stage};
pub use plans::FixPlanStore;
pub use publisher::{Publication, PublishFailed, Publisher};
pub use retry::{retry_transient, CancellationFlag, RetryError, RetryPolicy};
pub use state::{ErrorEntry, IssueOutcome, OutcomeKind, WorkflowState};
pub use summary::{RunStatus, RunSummary};
pub use validator::Validator;
