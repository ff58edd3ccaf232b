//! Issue model: findings, fix plans, code fixes and validation results.
//!
//! These are value objects. An [`Issue`] is never mutated once fetched, a
//! [`FixPlan`] is produced once per issue and replaced rather than edited, and
//! a [`CodeFix`] keeps the original file snapshot that rollback relies on.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Severity reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Blocker,
    Critical,
    Major,
    Minor,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Self::Blocker,
        Self::Critical,
        Self::Major,
        Self::Minor,
        Self::Info,
    ];

    /// Higher ranks are processed first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Blocker => 5,
            Self::Critical => 4,
            Self::Major => 3,
            Self::Minor => 2,
            Self::Info => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocker => "BLOCKER",
            Self::Critical => "CRITICAL",
            Self::Major => "MAJOR",
            Self::Minor => "MINOR",
            Self::Info => "INFO",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::Config(format!("unknown severity '{}'", s)))
    }
}

/// Kind of finding reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    Bug,
    Vulnerability,
    CodeSmell,
}

impl IssueType {
    pub const ALL: [IssueType; 3] = [Self::Bug, Self::Vulnerability, Self::CodeSmell];

    /// Higher ranks are processed first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Vulnerability => 3,
            Self::Bug => 2,
            Self::CodeSmell => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bug => "BUG",
            Self::Vulnerability => "VULNERABILITY",
            Self::CodeSmell => "CODE_SMELL",
        }
    }

    /// Lowercase label used in commit subjects and prose.
    pub fn label(self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Vulnerability => "vulnerability",
            Self::CodeSmell => "code smell",
        }
    }

    /// Slug used in batch branch names.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Vulnerability => "vulnerability",
            Self::CodeSmell => "code-smell",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| CoreError::Config(format!("unknown issue type '{}'", s)))
    }
}

/// A single static-analysis finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Tracker key, unique within a run
    pub id: String,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    /// Path relative to the repository root
    pub file: PathBuf,
    /// 1-based line, 0 when unknown
    pub line: u32,
    pub message: String,
    /// Tracker rule key, e.g. `java:S2095`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl Issue {
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        issue_type: IssueType,
        file: impl Into<PathBuf>,
        line: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            issue_type,
            file: file.into(),
            line,
            message: message.into(),
            rule: None,
        }
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Whether the tracker reported a concrete line.
    pub fn has_line(&self) -> bool {
        self.line > 0
    }

    /// Final path component, used in commit subjects.
    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.display().to_string())
    }

    /// Short, branch-safe form of the identifier.
    pub fn short_id(&self) -> String {
        let cleaned: String = self
            .id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let short: String = cleaned.chars().take(8).collect();
        if short.is_empty() {
            "issue".to_string()
        } else {
            short.to_lowercase()
        }
    }
}

/// Effort estimate attached to a fix plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    /// Lenient parse used for model output ("Low", "low", "LOW").
    /// Anything unrecognised is treated as medium effort.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Self::Low,
            "HIGH" => Self::High,
            _ => Self::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// Model-generated analysis and remediation proposal for one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixPlan {
    pub issue: Issue,
    pub analysis: String,
    pub solution: String,
    pub confidence: f64,
    pub effort: Effort,
    pub side_effects: String,
    pub created_at: DateTime<Utc>,
}

impl FixPlan {
    /// Build a plan, rejecting confidence scores outside `[0, 1]`.
    pub fn new(
        issue: Issue,
        analysis: impl Into<String>,
        solution: impl Into<String>,
        confidence: f64,
        effort: Effort,
        side_effects: impl Into<String>,
    ) -> CoreResult<Self> {
        if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
            return Err(CoreError::InvalidPlan {
                issue_id: issue.id.clone(),
                message: format!("confidence {} is outside [0, 1]", confidence),
            });
        }

        Ok(Self {
            issue,
            analysis: analysis.into(),
            solution: solution.into(),
            confidence,
            effort,
            side_effects: side_effects.into(),
            created_at: Utc::now(),
        })
    }

    /// Plans strictly below the threshold are routed to manual review.
    pub fn needs_review(&self, threshold: f64) -> bool {
        self.confidence < threshold
    }

    /// First line of the proposed solution, capped for commit messages.
    pub fn brief(&self) -> String {
        let line = self
            .solution
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("apply suggested fix");
        if line.chars().count() > 72 {
            let mut cut: String = line.chars().take(69).collect();
            cut.push_str("...");
            cut
        } else {
            line.to_string()
        }
    }
}

/// A concrete source edit satisfying a [`FixPlan`].
///
/// The original snapshot is captured at construction and has no setter; it is
/// the only basis for rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeFix {
    plan: FixPlan,
    path: PathBuf,
    original: String,
    replacement: String,
    attempt: u32,
}

impl CodeFix {
    pub fn new(
        plan: FixPlan,
        path: impl Into<PathBuf>,
        original: impl Into<String>,
        replacement: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self {
            plan,
            path: path.into(),
            original: original.into(),
            replacement: replacement.into(),
            attempt,
        }
    }

    pub fn plan(&self) -> &FixPlan {
        &self.plan
    }

    pub fn issue(&self) -> &Issue {
        &self.plan.issue
    }

    /// Repository-relative path of the edited file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the replacement differs from the snapshot at all.
    pub fn changes_content(&self) -> bool {
        self.original != self.replacement
    }
}

/// Outcome of validating an applied fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Pass,
    SyntaxFail,
    LogicConcern,
    Skipped,
}

impl ValidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::SyntaxFail => "syntax_fail",
            Self::LogicConcern => "logic_concern",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub diagnostics: Vec<String>,
    pub fix: CodeFix,
}

impl ValidationResult {
    pub fn new(status: ValidationStatus, diagnostics: Vec<String>, fix: CodeFix) -> Self {
        Self {
            status,
            diagnostics,
            fix,
        }
    }

    /// Only a passing result may be handed to the publisher.
    pub fn is_pass(&self) -> bool {
        self.status == ValidationStatus::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue() -> Issue {
        Issue::new(
            "AYx-12_ab:Cd99",
            Severity::Blocker,
            IssueType::Bug,
            "src/main/java/App.java",
            10,
            "Close this resource",
        )
    }

    #[test]
    fn test_ranks_order() {
        assert!(Severity::Blocker.rank() > Severity::Critical.rank());
        assert!(Severity::Minor.rank() > Severity::Info.rank());
        assert!(IssueType::Vulnerability.rank() > IssueType::Bug.rank());
        assert!(IssueType::Bug.rank() > IssueType::CodeSmell.rank());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("blocker".parse::<Severity>().unwrap(), Severity::Blocker);
        assert_eq!("code-smell".parse::<IssueType>().unwrap(), IssueType::CodeSmell);
        assert_eq!("CODE_SMELL".parse::<IssueType>().unwrap(), IssueType::CodeSmell);
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn test_issue_short_id_and_file_name() {
        let issue = issue();
        assert_eq!(issue.short_id(), "ayx12abc");
        assert_eq!(issue.file_name(), "App.java");
    }

    #[test]
    fn test_issue_serializes_type_field() {
        let json = serde_json::to_value(issue()).unwrap();
        assert_eq!(json["type"], "BUG");
        assert_eq!(json["severity"], "BLOCKER");
    }

    #[test]
    fn test_fix_plan_rejects_out_of_range_confidence() {
        assert!(FixPlan::new(issue(), "a", "s", 1.2, Effort::Low, "").is_err());
        assert!(FixPlan::new(issue(), "a", "s", -0.1, Effort::Low, "").is_err());
        assert!(FixPlan::new(issue(), "a", "s", 1.0, Effort::Low, "").is_ok());
    }

    #[test]
    fn test_needs_review_is_strictly_below_threshold() {
        let plan = FixPlan::new(issue(), "a", "s", 0.8, Effort::Low, "").unwrap();
        assert!(!plan.needs_review(0.8));
        assert!(plan.needs_review(0.81));
    }

    #[test]
    fn test_brief_uses_first_non_empty_line() {
        let plan = FixPlan::new(
            issue(),
            "a",
            "\n  Wrap the stream in try-with-resources\nmore detail",
            0.9,
            Effort::Low,
            "",
        )
        .unwrap();
        assert_eq!(plan.brief(), "Wrap the stream in try-with-resources");
    }

    #[test]
    fn test_effort_lenient_parse() {
        assert_eq!(Effort::parse_lenient("low"), Effort::Low);
        assert_eq!(Effort::parse_lenient("High"), Effort::High);
        assert_eq!(Effort::parse_lenient("whatever"), Effort::Medium);
    }
}
