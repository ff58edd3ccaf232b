//! Report command - Show a persisted run report.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::debug;

use heal_core::{HealerConfig, OutcomeKind, RunStatus, RunSummary};

use super::{repo_root, CliError};

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Path to the target repository
    #[arg(long = "repo", env = "TARGET_REPO_PATH", default_value = ".")]
    repo: PathBuf,

    /// Session id to show (defaults to the most recent run)
    #[arg(long)]
    pub session: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ReportArgs) -> Result<()> {
    let root = repo_root(&args.repo)?;
    let config =
        HealerConfig::load(&root).map_err(|e| CliError::InvalidConfig(e.to_string()))?;
    let state_dir = config.state_path(&root);

    let path = match &args.session {
        Some(id) => {
            let path = RunSummary::report_path(&state_dir, id);
            if !path.exists() {
                return Err(CliError::ReportNotFound(id.clone()).into());
            }
            path
        }
        None => RunSummary::latest(&state_dir)?.ok_or_else(|| {
            CliError::ReportNotFound(format!("no reports in {}", state_dir.display()))
        })?,
    };
    debug!("Loading report {}", path.display());

    let summary = RunSummary::load(&path)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn status_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Completed => "✅",
        RunStatus::EmptyBacklog => "📭",
        RunStatus::Cancelled => "⏹️ ",
        RunStatus::Aborted => "❌",
    }
}

fn outcome_icon(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Fixed => "✅",
        OutcomeKind::NeedsReview => "👀",
        OutcomeKind::Failed => "❌",
        OutcomeKind::Skipped => "⏭️ ",
    }
}

/// Human-readable rendering shared by `run` and `report`.
pub fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{} Run {} ({})",
        status_icon(summary.status),
        summary.session_id,
        summary.status.as_str()
    );
    println!(
        "   Issues: {} fetched, {} in backlog, {} analyzed",
        summary.fetched, summary.total_issues, summary.analyzed
    );
    println!(
        "   Fixes: {} applied, {} validated, {} published",
        summary.fixes_applied, summary.fixes_validated, summary.published
    );
    println!(
        "   Outcomes: {} fixed, {} needs review, {} failed, {} skipped",
        summary.fixed, summary.needs_review, summary.failed, summary.skipped
    );
    println!(
        "   Success rate: {:.0}% in {:.1}s",
        summary.success_rate * 100.0,
        summary.processing_time_seconds
    );

    if !summary.outcomes.is_empty() {
        println!();
        for outcome in &summary.outcomes {
            let issue = &outcome.issue;
            print!(
                "   {} {} {}:{} [{}]",
                outcome_icon(outcome.kind),
                issue.id,
                issue.file.display(),
                issue.line,
                issue.severity
            );
            match (&outcome.merge_request, &outcome.detail) {
                (Some(url), _) => println!(" → {}", url),
                (None, Some(detail)) => println!(" ({})", detail),
                (None, None) => println!(),
            }
        }
    }

    if !summary.merge_requests.is_empty() {
        println!();
        println!("🔀 Merge requests ({}):", summary.merge_requests_created);
        for url in &summary.merge_requests {
            println!("   {}", url);
        }
    }

    if !summary.errors.is_empty() {
        println!();
        println!("⚠️  Errors ({}):", summary.errors.len());
        for entry in &summary.errors {
            let scope = entry.issue_id.as_deref().unwrap_or("run");
            match &entry.message {
                Some(message) => println!(
                    "   {} {} → {}: {}",
                    scope, entry.error, entry.action, message
                ),
                None => println!("   {} {} → {}", scope, entry.error, entry.action),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heal_core::WorkflowState;
    use tempfile::TempDir;

    fn saved_report(root: &std::path::Path) -> RunSummary {
        let summary = RunSummary::from_state(&WorkflowState::default());
        summary.save(&root.join(".heal")).unwrap();
        summary
    }

    #[tokio::test]
    async fn test_report_by_session() {
        let dir = TempDir::new().unwrap();
        let summary = saved_report(dir.path());

        let args = ReportArgs {
            repo: dir.path().to_path_buf(),
            session: Some(summary.session_id.clone()),
            json: true,
        };
        assert!(execute(args).await.is_ok());
    }

    #[tokio::test]
    async fn test_report_latest() {
        let dir = TempDir::new().unwrap();
        saved_report(dir.path());

        let args = ReportArgs {
            repo: dir.path().to_path_buf(),
            session: None,
            json: false,
        };
        assert!(execute(args).await.is_ok());
    }

    #[tokio::test]
    async fn test_report_missing() {
        let dir = TempDir::new().unwrap();
        let args = ReportArgs {
            repo: dir.path().to_path_buf(),
            session: Some("nope".into()),
            json: false,
        };
        let err = execute(args).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::ReportNotFound(_))
        ));
    }
}
