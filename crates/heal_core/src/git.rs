//! Local git operations on the target repository.
//!
//! Thin wrapper over the `git` binary. Network-facing review requests live in
//! `heal_remote`; this module only touches the working tree, local refs and
//! `git push`.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};

/// Author identity applied to commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

/// Git commit information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCommit {
    pub hash: String,
    pub message: String,
}

/// Git operations manager for one repository.
#[derive(Debug, Clone)]
pub struct GitOps {
    repo_path: PathBuf,
    identity: Option<GitIdentity>,
}

impl GitOps {
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: GitIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Check if Git is available on the system.
    pub fn is_git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    pub fn is_initialized(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    fn output(&self, args: &[&str]) -> CoreResult<Output> {
        let mut cmd = Command::new("git");
        if let Some(id) = &self.identity {
            cmd.arg("-c")
                .arg(format!("user.name={}", id.name))
                .arg("-c")
                .arg(format!("user.email={}", id.email));
        }
        cmd.args(args)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| CoreError::Git(format!("Failed to run git {}: {}", args[0], e)))
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    fn run(&self, args: &[&str]) -> CoreResult<String> {
        let output = self.output(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::Git(format!(
                "git {} failed: {}",
                args[0],
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn current_branch(&self) -> CoreResult<String> {
        let branch = self.run(&["branch", "--show-current"])?;
        if branch.is_empty() {
            return Err(CoreError::Git("No branch found".to_string()));
        }
        Ok(branch)
    }

    pub fn branch_exists(&self, name: &str) -> CoreResult<bool> {
        let refname = format!("refs/heads/{}", name);
        let output = self.output(&["show-ref", "--verify", "--quiet", &refname])?;
        Ok(output.status.success())
    }

    pub fn checkout(&self, branch: &str) -> CoreResult<()> {
        self.run(&["checkout", branch])?;
        debug!(branch, "Checked out");
        Ok(())
    }

    /// Create `name` from `base` and switch to it. Uncommitted edits are
    /// carried over to the new branch.
    pub fn create_branch(&self, name: &str, base: &str) -> CoreResult<()> {
        self.run(&["checkout", "-b", name, base])?;
        info!(branch = name, base, "Created branch");
        Ok(())
    }

    /// Tracked paths with uncommitted changes. Untracked files are ignored.
    pub fn changed_files(&self) -> CoreResult<Vec<String>> {
        let output = self.output(&["status", "--porcelain", "--untracked-files=no"])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::Git(format!("git status failed: {}", stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| line.len() > 3)
            .map(|line| line[3..].to_string())
            .collect())
    }

    /// Stage and commit exactly `files`; other working-tree edits are left
    /// alone.
    pub fn commit_files(&self, message: &str, files: &[PathBuf]) -> CoreResult<GitCommit> {
        if files.is_empty() {
            return Err(CoreError::Git("Nothing to commit".to_string()));
        }
        let paths: Vec<String> = files.iter().map(|p| p.to_string_lossy().into_owned()).collect();

        let mut add = vec!["add", "--"];
        add.extend(paths.iter().map(String::as_str));
        self.run(&add)?;

        let mut commit = vec!["commit", "-m", message, "--"];
        commit.extend(paths.iter().map(String::as_str));
        let output = self.output(&commit)?;
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stdout.contains("nothing to commit") || stderr.contains("nothing to commit") {
                return Err(CoreError::Git("Nothing to commit".to_string()));
            }
            return Err(CoreError::Git(format!("git commit failed: {}", stderr.trim())));
        }

        let hash = self.run(&["rev-parse", "HEAD"])?;
        info!(hash = %hash, files = files.len(), "Committed");
        Ok(GitCommit {
            hash,
            message: message.to_string(),
        })
    }

    pub fn remote_url(&self, name: &str) -> CoreResult<String> {
        self.run(&["remote", "get-url", name])
            .map_err(|_| CoreError::Git(format!("No remote '{}' found", name)))
    }

    /// Push `branch` and set its upstream.
    pub fn push(&self, remote: &str, branch: &str) -> CoreResult<()> {
        info!("Pushing to {} {}", remote, branch);
        self.run(&["push", "--set-upstream", remote, branch])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> Option<(TempDir, GitOps)> {
        if !GitOps::is_git_available() {
            println!("Git not available, skipping test");
            return None;
        }
        let temp = TempDir::new().unwrap();
        let git = GitOps::new(temp.path()).with_identity(GitIdentity {
            name: "Heal Bot".into(),
            email: "heal@example.com".into(),
        });
        git.run(&["init"]).unwrap();
        git.run(&["checkout", "-b", "main"]).unwrap();
        std::fs::write(temp.path().join("A.java"), "class A {}\n").unwrap();
        git.commit_files("initial", &[PathBuf::from("A.java")]).unwrap();
        Some((temp, git))
    }

    #[test]
    fn test_branch_lifecycle() {
        let Some((temp, git)) = repo() else { return };

        assert_eq!(git.current_branch().unwrap(), "main");
        assert!(!git.branch_exists("fix/sonar-1").unwrap());

        std::fs::write(temp.path().join("A.java"), "final class A {}\n").unwrap();
        git.create_branch("fix/sonar-1", "main").unwrap();
        assert!(git.branch_exists("fix/sonar-1").unwrap());
        assert_eq!(git.changed_files().unwrap(), vec!["A.java"]);

        let commit = git
            .commit_files("fix: finalize A", &[PathBuf::from("A.java")])
            .unwrap();
        assert_eq!(commit.hash.len(), 40);
        assert!(git.changed_files().unwrap().is_empty());

        git.checkout("main").unwrap();
        assert_eq!(
            std::fs::read_to_string(temp.path().join("A.java")).unwrap(),
            "class A {}\n"
        );
    }

    #[test]
    fn test_commit_only_listed_files() {
        let Some((temp, git)) = repo() else { return };

        std::fs::write(temp.path().join("A.java"), "final class A {}\n").unwrap();
        std::fs::write(temp.path().join("B.java"), "class B {}\n").unwrap();
        std::fs::write(temp.path().join("C.java"), "class C {}\n").unwrap();
        git.commit_files("only B", &[PathBuf::from("B.java")]).unwrap();

        // C.java is untracked and not reported
        assert_eq!(git.changed_files().unwrap(), vec!["A.java"]);
    }

    #[test]
    fn test_nothing_to_commit() {
        let Some((_temp, git)) = repo() else { return };
        let err = git.commit_files("empty", &[PathBuf::from("A.java")]).unwrap_err();
        assert!(err.to_string().contains("Nothing to commit"));
    }

    #[test]
    fn test_missing_remote() {
        let Some((_temp, git)) = repo() else { return };
        assert!(git.remote_url("origin").is_err());
    }
}
