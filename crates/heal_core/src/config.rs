//! Healer configuration.
//!
//! Loaded from `<repo>/.heal/config.yaml` when present. Every field has a
//! default, so an empty file (or no file) is a valid configuration once the
//! project key is supplied.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backlog::IssueFilter;
use crate::error::{CoreError, CoreResult};
use crate::retry::RetryPolicy;

/// Relative location of the config file inside the target repository.
pub const CONFIG_FILE: &str = ".heal/config.yaml";

/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 50;

/// How validated fixes are turned into review requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// One branch and merge request per fix
    #[default]
    PerIssue,
    /// One branch and merge request per group of fixes
    Batch,
    /// Leave validated fixes in the working tree
    Off,
}

impl PublishMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerIssue => "per_issue",
            Self::Batch => "batch",
            Self::Off => "off",
        }
    }
}

impl FromStr for PublishMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "per_issue" => Ok(Self::PerIssue),
            "batch" => Ok(Self::Batch),
            "off" | "none" => Ok(Self::Off),
            other => Err(CoreError::Config(format!("unknown publish mode '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Plans strictly below this confidence go to manual review
    pub confidence_threshold: f64,
    /// Attempts per inference call (timeouts and unparseable answers)
    pub retries: u32,
    pub timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Patch generations per issue; later attempts get parser feedback
    pub fix_attempts: u32,
    /// Lines of context on each side of the reported line
    pub context_lines: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            retries: 3,
            timeout_secs: 120,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            fix_attempts: 1,
            context_lines: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub enabled: bool,
    /// Treat structural concerns as hard failures
    pub logic_concern_is_failure: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            logic_concern_is_failure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub mode: PublishMode,
    pub batch_size: usize,
    /// Tracker prefix used in branch names and commit subjects
    pub tracker_prefix: String,
    pub base_branch: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            mode: PublishMode::PerIssue,
            batch_size: 10,
            tracker_prefix: "sonar".to_string(),
            base_branch: "main".to_string(),
        }
    }
}

/// Full healer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealerConfig {
    pub project_key: String,
    pub filter: IssueFilter,
    pub generation: GenerationConfig,
    pub validation: ValidationConfig,
    pub publish: PublishConfig,
    /// Reports, fix plans and backups; relative paths are resolved against
    /// the repository root
    pub state_dir: PathBuf,
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            project_key: String::new(),
            filter: IssueFilter::default(),
            generation: GenerationConfig::default(),
            validation: ValidationConfig::default(),
            publish: PublishConfig::default(),
            state_dir: PathBuf::from(".heal"),
        }
    }
}

impl HealerConfig {
    /// Load `<repo_root>/.heal/config.yaml`, falling back to defaults when
    /// the file does not exist.
    pub fn load(repo_root: &Path) -> CoreResult<Self> {
        let path = repo_root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> CoreResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(CoreError::from)
    }

    pub fn to_yaml(&self) -> CoreResult<String> {
        serde_yaml::to_string(self).map_err(CoreError::from)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> CoreResult<()> {
        let g = &self.generation;
        if !(0.0..=1.0).contains(&g.confidence_threshold) {
            return Err(CoreError::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                g.confidence_threshold
            )));
        }
        if g.retries == 0 {
            return Err(CoreError::Config("retries must be at least 1".into()));
        }
        if g.fix_attempts == 0 {
            return Err(CoreError::Config("fix_attempts must be at least 1".into()));
        }
        if g.timeout_secs == 0 {
            return Err(CoreError::Config("timeout_secs must be at least 1".into()));
        }
        if self.publish.batch_size == 0 || self.publish.batch_size > MAX_BATCH_SIZE {
            return Err(CoreError::Config(format!(
                "batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.publish.batch_size
            )));
        }
        if self.publish.base_branch.trim().is_empty() {
            return Err(CoreError::Config("base_branch must not be empty".into()));
        }
        if self.project_key.trim().is_empty() {
            return Err(CoreError::Config("project_key must not be empty".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.generation.retries,
            initial_backoff: Duration::from_millis(self.generation.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.generation.max_backoff_ms),
        }
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }

    /// State directory resolved against `repo_root`.
    pub fn state_path(&self, repo_root: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            repo_root.join(&self.state_dir)
        }
    }
}
