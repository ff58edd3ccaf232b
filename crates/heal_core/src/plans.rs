//! Fix plan store.
//!
//! Accepted plans are kept for later review under:
//! ```text
//! <state_dir>/fixplans/<project_key>.json   # JSON array, append order
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CoreResult;
use crate::issue::FixPlan;

#[derive(Debug, Clone)]
pub struct FixPlanStore {
    state_dir: PathBuf,
}

impl FixPlanStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    fn plans_dir(&self) -> PathBuf {
        self.state_dir.join("fixplans")
    }

    pub fn path_for(&self, project_key: &str) -> PathBuf {
        let file: String = project_key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.plans_dir().join(format!("{}.json", file))
    }

    /// Append `plan` to the project's plan list.
    pub fn append(&self, project_key: &str, plan: &FixPlan) -> CoreResult<()> {
        let mut plans = self.list(project_key)?;
        plans.push(plan.clone());

        fs::create_dir_all(self.plans_dir())?;
        let path = self.path_for(project_key);
        fs::write(&path, serde_json::to_string_pretty(&plans)?)?;
        debug!(issue_id = %plan.issue.id, path = %path.display(), "Stored fix plan");
        Ok(())
    }

    /// All stored plans for `project_key`, oldest first.
    pub fn list(&self, project_key: &str) -> CoreResult<Vec<FixPlan>> {
        let path = self.path_for(project_key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{Effort, Issue, IssueType, Severity};
    use tempfile::TempDir;

    fn plan(id: &str) -> FixPlan {
        let issue = Issue::new(id, Severity::Major, IssueType::Bug, "A.java", 3, "m");
        FixPlan::new(issue, "analysis", "solution", 0.9, Effort::Low, "").unwrap()
    }

    #[test]
    fn test_append_and_list() {
        let temp = TempDir::new().unwrap();
        let store = FixPlanStore::new(temp.path());
        assert!(store.list("my:project").unwrap().is_empty());

        store.append("my:project", &plan("I1")).unwrap();
        store.append("my:project", &plan("I2")).unwrap();

        let plans = store.list("my:project").unwrap();
        let ids: Vec<_> = plans.iter().map(|p| p.issue.id.as_str()).collect();
        assert_eq!(ids, vec!["I1", "I2"]);
        assert_eq!(
            store.path_for("my:project"),
            temp.path().join("fixplans/my_project.json")
        );
    }

    #[test]
    fn test_projects_are_separate() {
        let temp = TempDir::new().unwrap();
        let store = FixPlanStore::new(temp.path());
        store.append("a", &plan("I1")).unwrap();
        assert!(store.list("b").unwrap().is_empty());
    }
}
