//! Issues command - List the prioritized backlog.
//!
//! Fetches from the tracker and applies the same filter and ordering as a
//! run, without touching the repository.

use anyhow::Result;
use clap::Args;
use tracing::info;

use heal_core::{prioritize, Issue, IssueTracker};

use super::{load_config, validated, CliError, FilterArgs, RepoArgs, SonarArgs};

#[derive(Args, Debug)]
pub struct IssuesArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    #[command(flatten)]
    pub sonar: SonarArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Show at most this many issues
    #[arg(long)]
    pub limit: Option<usize>,

    /// Print the backlog as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: IssuesArgs) -> Result<()> {
    let config = validated(load_config(&args.repo, &args.sonar, &args.filter)?)?;
    if super::non_empty(args.sonar.sonar_token.as_deref()).is_none() {
        return Err(CliError::InvalidArgument("SONAR_TOKEN is required".into()).into());
    }

    let tracker = args.sonar.client();
    if !tracker.validate_connection().await? {
        anyhow::bail!("SonarQube at {} is not ready", args.sonar.sonar_url);
    }

    let issues = tracker
        .fetch_issues(
            &config.project_key,
            &config.filter.severities,
            &config.filter.types,
        )
        .await?;
    let fetched = issues.len();

    let backlog: Vec<Issue> = match prioritize(issues, &config.filter) {
        Ok(backlog) => backlog.iter().cloned().collect(),
        Err(_) => Vec::new(),
    };
    info!(fetched, backlog = backlog.len(), "Backlog computed");

    let shown = &backlog[..args.limit.unwrap_or(backlog.len()).min(backlog.len())];
    if args.json {
        println!("{}", serde_json::to_string_pretty(shown)?);
        return Ok(());
    }

    if backlog.is_empty() {
        println!("📭 No issues match the filter ({} fetched)", fetched);
        return Ok(());
    }

    println!(
        "📋 {} issue(s) for {} ({} fetched):",
        backlog.len(),
        config.project_key,
        fetched
    );
    for issue in shown {
        println!("{}", format_issue(issue));
    }
    if shown.len() < backlog.len() {
        println!("   ... {} more", backlog.len() - shown.len());
    }
    Ok(())
}

fn format_issue(issue: &Issue) -> String {
    let rule = issue
        .rule
        .as_deref()
        .map(|r| format!(" ({})", r))
        .unwrap_or_default();
    format!(
        "   [{:<8}] {:<13} {}:{}  {}{}",
        issue.severity.as_str(),
        issue.issue_type.as_str(),
        issue.file.display(),
        issue.line,
        issue.message,
        rule
    )
}
