//! Run command - Execute the remediation workflow.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use heal_core::{
    CancellationFlag, GitIdentity, GitOps, HealerConfig, PublishMode, RunStatus, RunSummary,
    WorkflowEngine,
};
use heal_llm::{LlmAdapter, LlmError, LlmProvider, LlmSettings};
use heal_remote::{Forge, GitHubForge, GitLabForge, RepositoryClient, DEFAULT_REMOTE};

use super::report::print_summary;
use super::{load_config, non_empty, repo_root, validated, CliError, FilterArgs, RepoArgs, SonarArgs};

#[derive(Args, Debug, Clone, Default)]
pub struct LlmArgs {
    /// Inference provider: openai, anthropic or ollama
    #[arg(long = "llm-provider", env = "HEAL_LLM_PROVIDER")]
    pub provider: Option<String>,

    /// Model name (defaults per provider)
    #[arg(long = "llm-model", env = "HEAL_LLM_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,
}

impl LlmArgs {
    fn settings(&self) -> LlmSettings {
        LlmSettings {
            provider: self.provider.clone(),
            model: self.model.clone(),
            openai_api_key: self.openai_api_key.clone(),
            anthropic_api_key: self.anthropic_api_key.clone(),
            ollama_url: self.ollama_url.clone(),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ForgeArgs {
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
    pub gitlab_token: Option<String>,

    #[arg(long, env = "GITLAB_URL", default_value = "https://gitlab.com")]
    pub gitlab_url: String,

    /// Numeric id or group/project path
    #[arg(long, env = "GITLAB_PROJECT_ID")]
    pub gitlab_project_id: Option<String>,

    /// Author name for fix commits
    #[arg(long, env = "GIT_USER_NAME")]
    pub git_user_name: Option<String>,

    /// Author email for fix commits
    #[arg(long, env = "GIT_USER_EMAIL")]
    pub git_user_email: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    #[command(flatten)]
    pub sonar: SonarArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub llm: LlmArgs,

    #[command(flatten)]
    pub forge: ForgeArgs,

    /// Publish mode: per_issue, batch or off
    #[arg(long)]
    pub mode: Option<String>,

    /// Fixes per branch in batch mode
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Minimum plan confidence for automatic fixing
    #[arg(long)]
    pub confidence_threshold: Option<f64>,

    /// Patch attempts per issue (regenerates with parser feedback)
    #[arg(long)]
    pub fix_attempts: Option<u32>,

    /// Exit with code 4 when any issue failed
    #[arg(long)]
    pub fail_on_issue_errors: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    fn apply_overrides(&self, config: &mut HealerConfig) -> Result<(), CliError> {
        if let Some(mode) = &self.mode {
            config.publish.mode = mode
                .parse::<PublishMode>()
                .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
        }
        if let Some(size) = self.batch_size {
            config.publish.batch_size = size;
        }
        if let Some(threshold) = self.confidence_threshold {
            config.generation.confidence_threshold = threshold;
        }
        if let Some(attempts) = self.fix_attempts {
            config.generation.fix_attempts = attempts;
        }
        Ok(())
    }
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let root = repo_root(&args.repo.path)?;
    let repo = RepoArgs {
        path: root.clone(),
        ..args.repo.clone()
    };

    let mut config = load_config(&repo, &args.sonar, &args.filter)?;
    args.apply_overrides(&mut config)?;
    let config = validated(config)?;

    info!(
        project = %config.project_key,
        repo = %root.display(),
        mode = config.publish.mode.as_str(),
        "Starting remediation run"
    );

    let mut missing: Vec<String> = Vec::new();

    let settings = args.llm.settings();
    let inference = match LlmAdapter::from_settings(&settings) {
        Ok(adapter) => {
            info!(provider = %adapter.provider(), model = adapter.model(), "Inference provider");
            adapter
        }
        Err(LlmError::NotConfigured) => {
            missing.push(llm_credential_name(&settings));
            LlmAdapter::new(LlmProvider::OpenAI, None, settings.model().map(str::to_string))
        }
        Err(e) => return Err(CliError::InvalidArgument(e.to_string()).into()),
    };

    let mut git = GitOps::new(&root);
    if let Some(identity) = git_identity(&args.forge) {
        git = git.with_identity(identity);
    }

    let mut vcs = RepositoryClient::new(git.clone(), config.publish.base_branch.clone());
    if config.publish.mode != PublishMode::Off {
        match select_forge(&args.forge, &git)? {
            Some(forge) => {
                info!(forge = forge.name(), "Review requests enabled");
                vcs = vcs.with_forge(forge);
            }
            None => missing.push("GITHUB_TOKEN or GITLAB_TOKEN".to_string()),
        }
    }

    let cancel = CancellationFlag::new();
    let mut engine = WorkflowEngine::new(
        config,
        root,
        Arc::new(args.sonar.client()),
        Arc::new(inference),
        Arc::new(vcs),
    )
    .with_cancellation(cancel.clone())
    .require_credential("SONAR_TOKEN", args.sonar.sonar_token.as_deref());
    for name in missing {
        engine = engine.require_credential(name, None);
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            cancel.cancel();
        }
    });

    let summary = engine.execute().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    run_outcome(&summary, args.fail_on_issue_errors)?;
    Ok(())
}

/// Map a finished run to the command result.
fn run_outcome(summary: &RunSummary, fail_on_issue_errors: bool) -> Result<(), CliError> {
    if summary.status == RunStatus::Aborted {
        let reason = summary
            .errors
            .iter()
            .find(|e| e.issue_id.is_none())
            .map(|e| match &e.message {
                Some(message) => format!("{}: {}", e.error, message),
                None => e.error.clone(),
            })
            .unwrap_or_else(|| "fatal error".to_string());
        return Err(CliError::RunAborted(reason));
    }
    if fail_on_issue_errors && summary.has_issue_failures() {
        return Err(CliError::IssueFailures(summary.failed));
    }
    Ok(())
}

fn llm_credential_name(settings: &LlmSettings) -> String {
    match settings.resolve_provider() {
        Ok(LlmProvider::OpenAI) => "OPENAI_API_KEY".to_string(),
        Ok(LlmProvider::Anthropic) => "ANTHROPIC_API_KEY".to_string(),
        Ok(LlmProvider::Ollama) => "OLLAMA_URL".to_string(),
        Err(_) => "OPENAI_API_KEY, ANTHROPIC_API_KEY or OLLAMA_URL".to_string(),
    }
}

fn git_identity(args: &ForgeArgs) -> Option<GitIdentity> {
    let name = non_empty(args.git_user_name.as_deref())?;
    let email = non_empty(args.git_user_email.as_deref())?;
    Some(GitIdentity {
        name: name.to_string(),
        email: email.to_string(),
    })
}

/// GitLab when a token and project are given, otherwise GitHub derived
/// from the `origin` remote.
fn select_forge(args: &ForgeArgs, git: &GitOps) -> Result<Option<Arc<dyn Forge>>, CliError> {
    if let (Some(token), Some(project)) = (
        non_empty(args.gitlab_token.as_deref()),
        non_empty(args.gitlab_project_id.as_deref()),
    ) {
        return Ok(Some(Arc::new(GitLabForge::new(
            &args.gitlab_url,
            project,
            token,
        ))));
    }

    let Some(token) = non_empty(args.github_token.as_deref()) else {
        return Ok(None);
    };
    let url = git.remote_url(DEFAULT_REMOTE).map_err(|e| {
        CliError::InvalidArgument(format!("cannot read '{}' remote: {}", DEFAULT_REMOTE, e))
    })?;
    let forge = GitHubForge::from_remote_url(&url, token)
        .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
    Ok(Some(Arc::new(forge)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use heal_core::{ErrorEntry, WorkflowState};

    fn summary(status: RunStatus, failed: usize) -> RunSummary {
        let mut summary = RunSummary::from_state(&WorkflowState::default());
        summary.status = status;
        summary.failed = failed;
        summary
    }

    fn run_args(mode: Option<&str>) -> RunArgs {
        RunArgs {
            repo: RepoArgs {
                path: ".".into(),
                branch: None,
                config: None,
            },
            sonar: SonarArgs {
                sonar_url: "http://localhost:9000".into(),
                sonar_token: None,
                project_key: None,
            },
            filter: FilterArgs::default(),
            llm: LlmArgs::default(),
            forge: ForgeArgs::default(),
            mode: mode.map(String::from),
            batch_size: Some(4),
            confidence_threshold: Some(0.5),
            fix_attempts: Some(2),
            fail_on_issue_errors: false,
            json: false,
        }
    }

    #[test]
    fn test_run_outcome_success() {
        assert!(run_outcome(&summary(RunStatus::Completed, 0), true).is_ok());
        assert!(run_outcome(&summary(RunStatus::EmptyBacklog, 0), true).is_ok());
        assert!(run_outcome(&summary(RunStatus::Cancelled, 0), false).is_ok());
    }

    #[test]
    fn test_run_outcome_aborted() {
        let mut aborted = summary(RunStatus::Aborted, 0);
        aborted.errors.push(ErrorEntry {
            issue_id: None,
            error: "tracker_auth_failed".into(),
            action: "aborted".into(),
            message: Some("invalid token".into()),
        });
        match run_outcome(&aborted, false) {
            Err(CliError::RunAborted(reason)) => {
                assert_eq!(reason, "tracker_auth_failed: invalid token")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_run_outcome_issue_failures() {
        let failed = summary(RunStatus::Completed, 2);
        assert!(run_outcome(&failed, false).is_ok());
        assert!(matches!(
            run_outcome(&failed, true),
            Err(CliError::IssueFailures(2))
        ));
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = HealerConfig::default();
        run_args(Some("batch")).apply_overrides(&mut config).unwrap();
        assert_eq!(config.publish.mode, PublishMode::Batch);
        assert_eq!(config.publish.batch_size, 4);
        assert_eq!(config.generation.confidence_threshold, 0.5);
        assert_eq!(config.generation.fix_attempts, 2);

        let mut config = HealerConfig::default();
        assert!(matches!(
            run_args(Some("sometimes")).apply_overrides(&mut config),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_llm_credential_name() {
        let mut settings = LlmSettings::default();
        assert_eq!(
            llm_credential_name(&settings),
            "OPENAI_API_KEY, ANTHROPIC_API_KEY or OLLAMA_URL"
        );
        settings.provider = Some("anthropic".into());
        assert_eq!(llm_credential_name(&settings), "ANTHROPIC_API_KEY");
    }

    #[test]
    fn test_git_identity_requires_both() {
        let mut args = ForgeArgs::default();
        args.git_user_name = Some("Heal Bot".into());
        assert!(git_identity(&args).is_none());
        args.git_user_email = Some("heal@example.com".into());
        let identity = git_identity(&args).unwrap();
        assert_eq!(identity.name, "Heal Bot");
        assert_eq!(identity.email, "heal@example.com");
    }

    #[test]
    fn test_select_forge_prefers_gitlab() {
        let dir = tempfile::TempDir::new().unwrap();
        let git = GitOps::new(dir.path());
        let args = ForgeArgs {
            gitlab_token: Some("glpat".into()),
            gitlab_project_id: Some("platform/billing".into()),
            gitlab_url: "https://gitlab.example.com".into(),
            github_token: Some("ghp".into()),
            ..ForgeArgs::default()
        };
        let forge = select_forge(&args, &git).unwrap().unwrap();
        assert_eq!(forge.name(), "GitLab");
    }

    #[test]
    fn test_select_forge_without_tokens() {
        let dir = tempfile::TempDir::new().unwrap();
        let git = GitOps::new(dir.path());
        assert!(select_forge(&ForgeArgs::default(), &git).unwrap().is_none());
    }
}
