//! Issue prioritization.
//!
//! Issues are filtered by severity and type and sorted by
//! `(severity rank desc, type rank desc, fetch order)`. The resulting
//! [`Backlog`] is immutable for the rest of the run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::issue::{Issue, IssueType, Severity};

/// Optional severity/type filters. Empty sets mean "no filtering".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFilter {
    #[serde(default)]
    pub severities: Vec<Severity>,
    #[serde(default)]
    pub types: Vec<IssueType>,
}

impl IssueFilter {
    pub fn new(severities: Vec<Severity>, types: Vec<IssueType>) -> Self {
        Self { severities, types }
    }

    pub fn matches(&self, issue: &Issue) -> bool {
        (self.severities.is_empty() || self.severities.contains(&issue.severity))
            && (self.types.is_empty() || self.types.contains(&issue.issue_type))
    }
}

/// The filtered result was empty. Reported, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no issues left after filtering {fetched} fetched issue(s)")]
pub struct EmptyBacklog {
    pub fetched: usize,
}

/// Ordered, immutable sequence of issues to process in a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backlog {
    issues: Vec<Issue>,
}

impl Backlog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Issue> {
        self.issues.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.id.as_str()).collect()
    }
}

/// Filter and order the fetched issues.
pub fn prioritize(issues: Vec<Issue>, filter: &IssueFilter) -> Result<Backlog, EmptyBacklog> {
    let fetched = issues.len();
    let mut selected: Vec<Issue> = issues.into_iter().filter(|i| filter.matches(i)).collect();

    // sort_by is stable, so equal keys keep fetch order.
    selected.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then_with(|| b.issue_type.rank().cmp(&a.issue_type.rank()))
    });

    if selected.is_empty() {
        return Err(EmptyBacklog { fetched });
    }

    Ok(Backlog { issues: selected })
}
