//! CLI command definitions.
//!
//! Each subcommand maps to one entry point of the remediation workflow.
//! Shared flag groups (`RepoArgs`, `SonarArgs`, `FilterArgs`) are flattened
//! into the commands that need them.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use heal_core::{HealerConfig, IssueType, Severity};
use heal_remote::SonarQubeClient;

pub mod issues;
pub mod report;
pub mod run;

/// heal - Static-analysis remediation workflow
#[derive(Parser)]
#[command(name = "heal")]
#[command(version, about = "heal - Fix static-analysis findings with a language model")]
#[command(long_about = r#"
heal takes open findings from SonarQube, asks a language model for a fix
plan and a patch, applies and validates the patch, and publishes accepted
fixes as merge requests.

COMMANDS:
  run      → Run the remediation workflow against a repository
  issues   → List the prioritized backlog without changing anything
  report   → Show a persisted run report

CONFIGURATION:
  <repo>/.heal/config.yaml holds workflow settings; credentials and
  endpoints come from flags or environment variables.

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or configuration
  3 - Run aborted by a fatal error
  4 - Issue failures (with --fail-on-issue-errors)
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the remediation workflow
    Run(run::RunArgs),

    /// List the prioritized issue backlog
    Issues(issues::IssuesArgs),

    /// Show a persisted run report
    Report(report::ReportArgs),
}

/// Errors that map to specific exit codes.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Run aborted: {0}")]
    RunAborted(String),

    #[error("{0} issue(s) failed")]
    IssueFailures(usize),

    #[error("Report not found: {0}")]
    ReportNotFound(String),
}

#[derive(Args, Debug, Clone)]
pub struct RepoArgs {
    /// Path to the target repository
    #[arg(long = "repo", env = "TARGET_REPO_PATH", default_value = ".")]
    pub path: PathBuf,

    /// Base branch for fix branches (overrides config)
    #[arg(long, env = "TARGET_REPO_BRANCH")]
    pub branch: Option<String>,

    /// Config file (defaults to <repo>/.heal/config.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SonarArgs {
    /// SonarQube server URL
    #[arg(long, env = "SONAR_URL", default_value = "http://localhost:9000")]
    pub sonar_url: String,

    /// SonarQube user token
    #[arg(long, env = "SONAR_TOKEN", hide_env_values = true)]
    pub sonar_token: Option<String>,

    /// SonarQube project key (overrides config)
    #[arg(long, env = "SONAR_PROJECT_KEY")]
    pub project_key: Option<String>,
}

impl SonarArgs {
    pub fn client(&self) -> SonarQubeClient {
        SonarQubeClient::new(&self.sonar_url, self.sonar_token.clone().unwrap_or_default())
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Severities to include, comma separated (e.g. BLOCKER,CRITICAL)
    #[arg(long, value_delimiter = ',')]
    pub severities: Vec<String>,

    /// Issue types to include, comma separated (e.g. BUG,VULNERABILITY)
    #[arg(long, value_delimiter = ',')]
    pub types: Vec<String>,
}

impl FilterArgs {
    fn severities(&self) -> Result<Vec<Severity>, CliError> {
        self.severities
            .iter()
            .map(|s| s.parse().map_err(|e| CliError::InvalidArgument(format!("{}", e))))
            .collect()
    }

    fn types(&self) -> Result<Vec<IssueType>, CliError> {
        self.types
            .iter()
            .map(|s| s.parse().map_err(|e| CliError::InvalidArgument(format!("{}", e))))
            .collect()
    }
}

/// Load the repository config, apply command-line overrides and validate.
pub fn load_config(
    repo: &RepoArgs,
    sonar: &SonarArgs,
    filter: &FilterArgs,
) -> Result<HealerConfig, CliError> {
    let mut config = match &repo.config {
        Some(path) => HealerConfig::from_file(path),
        None => HealerConfig::load(&repo.path),
    }
    .map_err(|e| CliError::InvalidConfig(e.to_string()))?;

    if let Some(key) = non_empty(sonar.project_key.as_deref()) {
        config.project_key = key.to_string();
    }
    if let Some(branch) = non_empty(repo.branch.as_deref()) {
        config.publish.base_branch = branch.to_string();
    }

    let severities = filter.severities()?;
    if !severities.is_empty() {
        config.filter.severities = severities;
    }
    let types = filter.types()?;
    if !types.is_empty() {
        config.filter.types = types;
    }

    Ok(config)
}

/// Validate after every override has been applied.
pub fn validated(config: HealerConfig) -> Result<HealerConfig, CliError> {
    config
        .validate()
        .map_err(|e| CliError::InvalidConfig(e.to_string()))?;
    Ok(config)
}

pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Absolute repository root, so the state directory and git agree on it.
pub fn repo_root(path: &Path) -> anyhow::Result<PathBuf> {
    Ok(std::fs::canonicalize(path).map_err(|e| {
        CliError::InvalidArgument(format!("repository {}: {}", path.display(), e))
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use heal_core::PublishMode;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn repo_args(path: &Path) -> RepoArgs {
        RepoArgs {
            path: path.to_path_buf(),
            branch: None,
            config: None,
        }
    }

    fn sonar_args(project_key: Option<&str>) -> SonarArgs {
        SonarArgs {
            sonar_url: "http://localhost:9000".into(),
            sonar_token: Some("t".into()),
            project_key: project_key.map(String::from),
        }
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = parse(&[
            "heal",
            "--log-format",
            "json",
            "run",
            "--repo",
            "/tmp/x",
            "--project-key",
            "demo",
            "--severities",
            "BLOCKER,critical",
            "--mode",
            "batch",
            "--batch-size",
            "5",
            "--fail-on-issue-errors",
        ]);
        assert_eq!(cli.log_format, LogFormat::Json);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.repo.path, PathBuf::from("/tmp/x"));
        assert_eq!(args.sonar.project_key.as_deref(), Some("demo"));
        assert_eq!(args.filter.severities, vec!["BLOCKER", "critical"]);
        assert_eq!(args.mode.as_deref(), Some("batch"));
        assert_eq!(args.batch_size, Some(5));
        assert!(args.fail_on_issue_errors);
    }

    #[test]
    fn test_parse_rejects_verbose_and_quiet() {
        assert!(Cli::try_parse_from(["heal", "-v", "-q", "report"]).is_err());
    }

    #[test]
    fn test_parse_report_session() {
        let cli = parse(&["heal", "report", "--session", "abc", "--json"]);
        let Commands::Report(args) = cli.command else {
            panic!("expected report");
        };
        assert_eq!(args.session.as_deref(), Some("abc"));
        assert!(args.json);
    }

    #[test]
    fn test_load_config_applies_overrides() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".heal")).unwrap();
        std::fs::write(
            dir.path().join(heal_core::CONFIG_FILE),
            "project_key: from-file\npublish:\n  mode: batch\n",
        )
        .unwrap();

        let mut repo = repo_args(dir.path());
        repo.branch = Some("develop".into());
        let filter = FilterArgs {
            severities: vec!["blocker".into()],
            types: vec!["code-smell".into()],
        };

        let config = load_config(&repo, &sonar_args(Some("demo")), &filter).unwrap();
        assert_eq!(config.project_key, "demo");
        assert_eq!(config.publish.base_branch, "develop");
        assert_eq!(config.publish.mode, PublishMode::Batch);
        assert_eq!(config.filter.severities, vec![Severity::Blocker]);
        assert_eq!(config.filter.types, vec![IssueType::CodeSmell]);
    }

    #[test]
    fn test_load_config_keeps_file_project_key() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".heal")).unwrap();
        std::fs::write(dir.path().join(heal_core::CONFIG_FILE), "project_key: from-file\n").unwrap();

        let config =
            load_config(&repo_args(dir.path()), &sonar_args(Some("  ")), &FilterArgs::default())
                .unwrap();
        assert_eq!(config.project_key, "from-file");
    }

    #[test]
    fn test_invalid_filter_is_argument_error() {
        let dir = TempDir::new().unwrap();
        let filter = FilterArgs {
            severities: vec!["SEVERE".into()],
            types: vec![],
        };
        let err = load_config(&repo_args(dir.path()), &sonar_args(None), &filter).unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }

    #[test]
    fn test_missing_project_key_is_config_error() {
        let dir = TempDir::new().unwrap();
        let config =
            load_config(&repo_args(dir.path()), &sonar_args(None), &FilterArgs::default()).unwrap();
        assert!(matches!(validated(config), Err(CliError::InvalidConfig(_))));
    }

    #[test]
    fn test_broken_config_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".heal")).unwrap();
        std::fs::write(dir.path().join(heal_core::CONFIG_FILE), "publish: [not, a, map]\n").unwrap();
        let err = load_config(&repo_args(dir.path()), &sonar_args(None), &FilterArgs::default())
            .unwrap_err();
        assert!(matches!(err, CliError::InvalidConfig(_)));
    }
}
