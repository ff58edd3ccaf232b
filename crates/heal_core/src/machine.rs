//! Stage graph of the remediation workflow.
//!
//! The graph is a plain transition table over [`Stage`] and [`Signal`]. The
//! engine performs a stage, derives a signal from its outcome and asks
//! [`transition`] for the next stage; pairs missing from the table are
//! programming errors and are reported as such by the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Init,
    PrepareRepo,
    ConnectTracker,
    FetchIssues,
    AnalyzeIssue,
    CreateFixPlan,
    ApplyFix,
    ValidateFix,
    PublishFix,
    LogResult,
    Finalize,
    Error,
    End,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::PrepareRepo => "PREPARE_REPO",
            Self::ConnectTracker => "CONNECT_TRACKER",
            Self::FetchIssues => "FETCH_ISSUES",
            Self::AnalyzeIssue => "ANALYZE_ISSUE",
            Self::CreateFixPlan => "CREATE_FIX_PLAN",
            Self::ApplyFix => "APPLY_FIX",
            Self::ValidateFix => "VALIDATE_FIX",
            Self::PublishFix => "PUBLISH_FIX",
            Self::LogResult => "LOG_RESULT",
            Self::Finalize => "FINALIZE",
            Self::Error => "ERROR",
            Self::End => "END",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::End
    }

    /// Stages that run once per issue.
    pub fn is_per_issue(self) -> bool {
        matches!(
            self,
            Self::AnalyzeIssue
                | Self::CreateFixPlan
                | Self::ApplyFix
                | Self::ValidateFix
                | Self::PublishFix
                | Self::LogResult
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a stage, as seen by the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Stage succeeded; continue along the main path.
    Proceed,
    /// The current issue reached a terminal outcome; go record it.
    IssueDone,
    /// Validation rejected the fix and another patch attempt is allowed.
    RetryFix,
    /// LOG_RESULT: issues remain in the backlog.
    MoreIssues,
    /// LOG_RESULT: the cursor exhausted the backlog, or the run was cancelled.
    BacklogExhausted,
    /// FETCH_ISSUES: nothing left after filtering.
    EmptyBacklog,
    /// The run was cancelled before a backlog existed.
    Cancelled,
    /// Run-level failure.
    Fatal,
}

/// Next stage for `(stage, signal)`, or `None` when the pair is not part of
/// the graph.
pub fn transition(stage: Stage, signal: Signal) -> Option<Stage> {
    use Signal as G;
    use Stage as S;

    if signal == G::Fatal && stage != S::Error && stage != S::End {
        return Some(S::Error);
    }

    let next = match (stage, signal) {
        (S::Init, G::Proceed) => S::PrepareRepo,
        (S::PrepareRepo, G::Proceed) => S::ConnectTracker,
        (S::ConnectTracker, G::Proceed) => S::FetchIssues,
        (S::FetchIssues, G::Proceed) => S::AnalyzeIssue,
        (S::FetchIssues, G::EmptyBacklog) => S::Finalize,
        (S::Init | S::PrepareRepo | S::ConnectTracker | S::FetchIssues, G::Cancelled) => {
            S::Finalize
        }

        (S::AnalyzeIssue, G::Proceed) => S::CreateFixPlan,
        (S::AnalyzeIssue, G::IssueDone) => S::LogResult,
        (S::CreateFixPlan, G::Proceed) => S::ApplyFix,
        (S::CreateFixPlan, G::IssueDone) => S::LogResult,
        (S::ApplyFix, G::Proceed) => S::ValidateFix,
        (S::ApplyFix, G::IssueDone) => S::LogResult,
        (S::ValidateFix, G::Proceed) => S::PublishFix,
        (S::ValidateFix, G::RetryFix) => S::ApplyFix,
        (S::ValidateFix, G::IssueDone) => S::LogResult,
        (S::PublishFix, G::Proceed) => S::LogResult,
        (S::PublishFix, G::IssueDone) => S::LogResult,

        (S::LogResult, G::MoreIssues) => S::AnalyzeIssue,
        (S::LogResult, G::BacklogExhausted) => S::Finalize,

        (S::Finalize, G::Proceed) => S::End,
        (S::Error, G::Proceed) => S::End,
        _ => return None,
    };
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Stage; 13] = [
        Stage::Init,
        Stage::PrepareRepo,
        Stage::ConnectTracker,
        Stage::FetchIssues,
        Stage::AnalyzeIssue,
        Stage::CreateFixPlan,
        Stage::ApplyFix,
        Stage::ValidateFix,
        Stage::PublishFix,
        Stage::LogResult,
        Stage::Finalize,
        Stage::Error,
        Stage::End,
    ];

    fn walk(start: Stage, signals: &[Signal]) -> Vec<Stage> {
        let mut stage = start;
        let mut path = vec![stage];
        for signal in signals {
            stage = transition(stage, *signal).unwrap();
            path.push(stage);
        }
        path
    }

    #[test]
    fn test_happy_path_single_issue() {
        use Signal::*;
        let path = walk(
            Stage::Init,
            &[
                Proceed, Proceed, Proceed, Proceed, Proceed, Proceed, Proceed, Proceed, Proceed,
                BacklogExhausted, Proceed,
            ],
        );
        assert_eq!(
            path,
            vec![
                Stage::Init,
                Stage::PrepareRepo,
                Stage::ConnectTracker,
                Stage::FetchIssues,
                Stage::AnalyzeIssue,
                Stage::CreateFixPlan,
                Stage::ApplyFix,
                Stage::ValidateFix,
                Stage::PublishFix,
                Stage::LogResult,
                Stage::Finalize,
                Stage::End,
            ]
        );
    }

    #[test]
    fn test_loop_back_edge_only_from_log_result() {
        assert_eq!(
            transition(Stage::LogResult, Signal::MoreIssues),
            Some(Stage::AnalyzeIssue)
        );
        for stage in ALL.into_iter().filter(|s| *s != Stage::LogResult) {
            assert_ne!(transition(stage, Signal::MoreIssues), Some(Stage::AnalyzeIssue));
        }
    }

    #[test]
    fn test_issue_failures_route_to_log_result() {
        for stage in [
            Stage::AnalyzeIssue,
            Stage::CreateFixPlan,
            Stage::ApplyFix,
            Stage::ValidateFix,
            Stage::PublishFix,
        ] {
            assert_eq!(transition(stage, Signal::IssueDone), Some(Stage::LogResult));
        }
    }

    #[test]
    fn test_error_reachable_from_every_non_terminal_stage() {
        for stage in ALL {
            let next = transition(stage, Signal::Fatal);
            match stage {
                Stage::Error | Stage::End => assert_eq!(next, None),
                _ => assert_eq!(next, Some(Stage::Error)),
            }
        }
        assert_eq!(transition(Stage::Error, Signal::Proceed), Some(Stage::End));
    }

    #[test]
    fn test_end_is_terminal() {
        for signal in [Signal::Proceed, Signal::IssueDone, Signal::MoreIssues] {
            assert_eq!(transition(Stage::End, signal), None);
        }
        assert!(Stage::End.is_terminal());
    }

    #[test]
    fn test_retry_edge_and_empty_backlog() {
        assert_eq!(transition(Stage::ValidateFix, Signal::RetryFix), Some(Stage::ApplyFix));
        assert_eq!(transition(Stage::FetchIssues, Signal::EmptyBacklog), Some(Stage::Finalize));
        assert_eq!(transition(Stage::ApplyFix, Signal::RetryFix), None);
    }

    #[test]
    fn test_cancellation_before_backlog_finalizes() {
        for stage in [Stage::Init, Stage::PrepareRepo, Stage::ConnectTracker, Stage::FetchIssues] {
            assert_eq!(transition(stage, Signal::Cancelled), Some(Stage::Finalize));
        }
        assert_eq!(transition(Stage::ApplyFix, Signal::Cancelled), None);
    }
}
