//! Version-control client over a local clone plus a forge API.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use heal_core::{CoreError, CoreResult, GitOps, VcsClient, VcsError};

use crate::forge::Forge;

pub const DEFAULT_REMOTE: &str = "origin";

/// Local git operations composed with a [`Forge`] for review requests.
///
/// Git commands are blocking and run on tokio's blocking pool.
pub struct RepositoryClient {
    git: GitOps,
    remote: String,
    base_branch: String,
    forge: Option<Arc<dyn Forge>>,
}

impl RepositoryClient {
    pub fn new(git: GitOps, base_branch: impl Into<String>) -> Self {
        Self {
            git,
            remote: DEFAULT_REMOTE.to_string(),
            base_branch: base_branch.into(),
            forge: None,
        }
    }

    pub fn with_forge(mut self, forge: Arc<dyn Forge>) -> Self {
        self.forge = Some(forge);
        self
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn git(&self) -> &GitOps {
        &self.git
    }

    async fn blocking<T, F>(&self, op: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(GitOps) -> CoreResult<T> + Send + 'static,
    {
        let git = self.git.clone();
        tokio::task::spawn_blocking(move || op(git))
            .await
            .map_err(|e| CoreError::Git(format!("git task failed: {}", e)))?
    }
}

fn command_error(err: CoreError) -> VcsError {
    VcsError::Command(err.to_string())
}

/// Classify a failed `git push` by its stderr.
fn push_error(err: CoreError) -> VcsError {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    if ["authentication failed", "permission denied", "403", "could not read username"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        VcsError::Auth(message)
    } else {
        VcsError::Transport(message)
    }
}

#[async_trait]
impl VcsClient for RepositoryClient {
    async fn ensure_ready(&self, base: &str) -> Result<(), VcsError> {
        if !GitOps::is_git_available() {
            return Err(VcsError::Unavailable("git executable not found".to_string()));
        }
        if !self.git.is_initialized() {
            return Err(VcsError::Unavailable(format!(
                "{} is not a git repository",
                self.git.repo_path().display()
            )));
        }

        let wanted = base.to_string();
        self.blocking(move |git| {
            let base = wanted;
            if !git.branch_exists(&base)? {
                return Err(CoreError::Git(format!(
                    "base branch '{}' does not exist",
                    base
                )));
            }
            let dirty = git.changed_files()?;
            if !dirty.is_empty() {
                return Err(CoreError::Git(format!(
                    "working tree has uncommitted changes: {}",
                    dirty.join(", ")
                )));
            }
            if git.current_branch().ok().as_deref() != Some(base.as_str()) {
                git.checkout(&base)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| VcsError::Unavailable(e.to_string()))?;

        debug!(base, "Working tree ready");
        Ok(())
    }

    async fn create_branch(&self, name: &str, base: &str) -> Result<(), VcsError> {
        let (name, base) = (name.to_string(), base.to_string());
        let exists = {
            let name = name.clone();
            self.blocking(move |git| git.branch_exists(&name))
                .await
                .map_err(command_error)?
        };
        if exists {
            return Err(VcsError::BranchExists(name));
        }
        self.blocking(move |git| git.create_branch(&name, &base))
            .await
            .map_err(command_error)
    }

    async fn commit(
        &self,
        branch: &str,
        message: &str,
        files: &[PathBuf],
    ) -> Result<String, VcsError> {
        let (branch, message, files) = (branch.to_string(), message.to_string(), files.to_vec());
        self.blocking(move |git| {
            if git.current_branch()? != branch {
                git.checkout(&branch)?;
            }
            git.commit_files(&message, &files).map(|c| c.hash)
        })
        .await
        .map_err(command_error)
    }

    async fn open_merge_request(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String, VcsError> {
        let Some(forge) = &self.forge else {
            return Err(VcsError::Unavailable(
                "no GitHub or GitLab credentials configured".to_string(),
            ));
        };

        let (remote, pushed) = (self.remote.clone(), branch.to_string());
        self.blocking(move |git| git.push(&remote, &pushed))
            .await
            .map_err(push_error)?;

        let url = forge
            .open_review(branch, &self.base_branch, title, body)
            .await
            .map_err(VcsError::from)?;
        info!(forge = forge.name(), branch, url = %url, "Review request opened");
        Ok(url)
    }

    async fn checkout(&self, branch: &str) -> Result<(), VcsError> {
        let branch = branch.to_string();
        self.blocking(move |git| git.checkout(&branch))
            .await
            .map_err(command_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_error_classification() {
        let auth = push_error(CoreError::Git(
            "git push failed: fatal: Authentication failed for 'https://github.com/acme/x.git/'"
                .into(),
        ));
        assert!(matches!(auth, VcsError::Auth(_)));

        let network = push_error(CoreError::Git(
            "git push failed: fatal: unable to access: Could not resolve host: github.com".into(),
        ));
        assert!(matches!(network, VcsError::Transport(_)));
    }
}
