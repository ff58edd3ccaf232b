//! Fix generation through the inference client.
//!
//! Two modes share one retry policy. Planning asks for a JSON fix plan;
//! patching asks for literal replacement source for the context window.
//! Prompts are deterministic for a given issue and context.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clients::{InferenceClient, InferenceError};
use crate::context::CodeContext;
use crate::issue::{CodeFix, Effort, FixPlan, Issue};
use crate::retry::{retry_transient, CancellationFlag, RetryError, RetryPolicy};

const PLANNING_SYSTEM: &str = "You are a senior software engineer who remediates static-analysis \
findings. You analyse one finding at a time and answer with a single JSON object and nothing else.";

const PATCHING_SYSTEM: &str = "You are a senior software engineer who writes minimal, correct \
source patches for static-analysis findings. You answer with one fenced code block containing \
the full replacement for the excerpt you were given, without line numbers and without commentary.";

/// A system/user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Generation gave up on an issue. Recoverable unless `fatal` is set.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("generation failed for {issue_id} after {attempts} attempt(s): {reason}")]
pub struct GenerationFailed {
    pub issue_id: String,
    pub attempts: u32,
    pub reason: String,
    /// The run was cancelled while retrying
    pub cancelled: bool,
    /// The inference provider can no longer be used in this run
    pub fatal: bool,
}

impl GenerationFailed {
    fn from_retry(issue_id: &str, err: RetryError<InferenceError>) -> Self {
        let attempts = err.attempts();
        let (reason, cancelled, fatal) = match err {
            RetryError::Exhausted { last, .. } => (last.to_string(), false, false),
            RetryError::Permanent { error, .. } => {
                let fatal = error.is_fatal();
                (error.to_string(), false, fatal)
            }
            RetryError::Cancelled { .. } => ("run cancelled".to_string(), true, false),
        };
        Self {
            issue_id: issue_id.to_string(),
            attempts,
            reason,
            cancelled,
            fatal,
        }
    }
}

/// Builds prompts, calls the inference client and parses its answers.
#[derive(Clone)]
pub struct FixGenerator {
    client: Arc<dyn InferenceClient>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl FixGenerator {
    pub fn new(client: Arc<dyn InferenceClient>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client,
            timeout,
            retry,
        }
    }

    /// Prompt for the planning mode.
    pub fn planning_prompt(issue: &Issue, ctx: &CodeContext) -> Prompt {
        let mut user = issue_section(issue);
        user.push_str(&context_section(ctx));
        user.push_str(
            "\nRespond with a JSON object of this shape:\n\
{\n  \"analysis\": \"what is wrong and why\",\n  \"solution\": \"one-line summary first, then the steps\",\n  \"confidence\": 0.0,\n  \"effort\": \"LOW|MEDIUM|HIGH\",\n  \"side_effects\": \"anything a reviewer should double-check\"\n}\n\
Confidence is a number between 0 and 1 describing how sure you are that the solution is \
correct and safe to apply without human review.\n",
        );
        Prompt {
            system: PLANNING_SYSTEM.to_string(),
            user,
        }
    }

    /// Prompt for the patching mode. `feedback` carries diagnostics from a
    /// rejected previous attempt.
    pub fn patching_prompt(plan: &FixPlan, ctx: &CodeContext, feedback: Option<&str>) -> Prompt {
        let mut user = issue_section(&plan.issue);
        user.push_str(&format!(
            "\n## Planned fix\nAnalysis: {}\nSolution: {}\n",
            plan.analysis.trim(),
            plan.solution.trim()
        ));
        user.push_str(&context_section(ctx));
        user.push_str(&format!(
            "\nRewrite lines {}-{} so the finding is resolved. Keep the surrounding code, \
indentation and method signatures intact. Return the complete replacement for exactly \
those lines in a single ```{} code block.\n",
            ctx.start_line,
            ctx.end_line,
            ctx.language.fence()
        ));
        if let Some(feedback) = feedback.filter(|f| !f.trim().is_empty()) {
            user.push_str("\n## Previous attempt was rejected\n");
            user.push_str(feedback.trim());
            user.push('\n');
        }
        Prompt {
            system: PATCHING_SYSTEM.to_string(),
            user,
        }
    }

    /// Planning mode: produce a [`FixPlan`] for `issue`.
    pub async fn plan(
        &self,
        issue: &Issue,
        ctx: &CodeContext,
        cancel: &CancellationFlag,
    ) -> Result<FixPlan, GenerationFailed> {
        let prompt = Self::planning_prompt(issue, ctx);

        let plan = retry_transient(&self.retry, cancel, "plan", |attempt| {
            let prompt = &prompt;
            async move {
                debug!(issue_id = %issue.id, attempt, "Requesting fix plan");
                let response = self
                    .client
                    .complete(&prompt.system, &prompt.user, self.timeout)
                    .await?;
                parse_plan(issue, &response)
            }
        })
        .await
        .map_err(|e| GenerationFailed::from_retry(&issue.id, e))?;

        info!(
            issue_id = %issue.id,
            confidence = plan.confidence,
            effort = plan.effort.as_str(),
            "Fix plan created"
        );
        Ok(plan)
    }

    /// Patching mode: produce a [`CodeFix`] replacing the context window of
    /// `original` (the full current file content).
    pub async fn patch(
        &self,
        plan: &FixPlan,
        ctx: &CodeContext,
        original: &str,
        attempt: u32,
        feedback: Option<&str>,
        cancel: &CancellationFlag,
    ) -> Result<CodeFix, GenerationFailed> {
        let prompt = Self::patching_prompt(plan, ctx, feedback);
        let issue_id = plan.issue.id.as_str();

        let region = retry_transient(&self.retry, cancel, "patch", |try_no| {
            let prompt = &prompt;
            async move {
                debug!(issue_id, attempt, try_no, "Requesting patch");
                let response = self
                    .client
                    .complete(&prompt.system, &prompt.user, self.timeout)
                    .await?;
                extract_code_block(&response)
            }
        })
        .await
        .map_err(|e| GenerationFailed::from_retry(issue_id, e))?;

        let replacement = splice_window(original, ctx, &region);
        if replacement == original {
            warn!(issue_id, "Patch does not change the file");
        }

        Ok(CodeFix::new(
            plan.clone(),
            ctx.path.clone(),
            original,
            replacement,
            attempt,
        ))
    }
}

fn issue_section(issue: &Issue) -> String {
    let line = if issue.has_line() {
        issue.line.to_string()
    } else {
        "unknown".to_string()
    };
    format!(
        "## Finding\n- Id: {}\n- Rule: {}\n- Severity: {}\n- Type: {}\n- File: {}\n- Line: {}\n- Message: {}\n",
        issue.id,
        issue.rule.as_deref().unwrap_or("n/a"),
        issue.severity,
        issue.issue_type,
        issue.file.display(),
        line,
        issue.message
    )
}

fn context_section(ctx: &CodeContext) -> String {
    let mut out = String::new();
    if !ctx.declarations.is_empty() {
        out.push_str("\n## Declarations in file\n");
        for decl in &ctx.declarations {
            out.push_str(decl);
            out.push('\n');
        }
    }
    if let Some(sig) = &ctx.enclosing_signature {
        out.push_str(&format!("\n## Enclosing function\n{}\n", sig));
    }
    out.push_str(&format!(
        "\n## Code (lines {}-{})\n```{}\n{}\n```\n",
        ctx.start_line,
        ctx.end_line,
        ctx.language.fence(),
        ctx.numbered()
    ));
    if !ctx.target_line.is_empty() {
        out.push_str(&format!("\n## Reported line\n{}\n", ctx.target_line.trim()));
    }
    out
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SideEffects {
    Text(String),
    List(Vec<String>),
}

impl SideEffects {
    fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::List(items) => items.join("; "),
        }
    }
}

#[derive(Deserialize)]
struct RawPlan {
    analysis: String,
    solution: String,
    confidence: f64,
    #[serde(default)]
    effort: Option<String>,
    #[serde(default)]
    side_effects: Option<SideEffects>,
}

/// Parse a planning response. The JSON object may be wrapped in prose or a
/// code fence.
pub fn parse_plan(issue: &Issue, response: &str) -> Result<FixPlan, InferenceError> {
    let start = response.find('{');
    let end = response.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &response[s..=e],
        _ => return Err(InferenceError::Parse("no JSON object in response".to_string())),
    };

    let raw: RawPlan =
        serde_json::from_str(json).map_err(|e| InferenceError::Parse(e.to_string()))?;

    FixPlan::new(
        issue.clone(),
        raw.analysis,
        raw.solution,
        raw.confidence,
        raw.effort
            .as_deref()
            .map(Effort::parse_lenient)
            .unwrap_or(Effort::Medium),
        raw.side_effects.map(SideEffects::into_text).unwrap_or_default(),
    )
    .map_err(|e| InferenceError::Parse(e.to_string()))
}

/// Pull replacement source out of a patching response: the first fenced
/// block if there is one, otherwise the whole response.
pub fn extract_code_block(response: &str) -> Result<String, InferenceError> {
    let body = match response.find("```") {
        Some(open) => {
            let after_fence = &response[open + 3..];
            // Skip the language tag line.
            let content_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(after_fence.len());
            let content = &after_fence[content_start..];
            match content.find("```") {
                Some(close) => &content[..close],
                None => return Err(InferenceError::Parse("unterminated code block".to_string())),
            }
        }
        None => response,
    };

    let code = body.trim_matches(|c| c == '\n' || c == '\r').trim_end();
    if code.trim().is_empty() {
        return Err(InferenceError::Parse("empty patch".to_string()));
    }
    Ok(code.to_string())
}

/// Replace the context window of `original` with `region`.
pub fn splice_window(original: &str, ctx: &CodeContext, region: &str) -> String {
    let lines: Vec<&str> = original.lines().collect();
    let (start, end) = if ctx.lines.is_empty() {
        (0, 0)
    } else {
        let start = (ctx.start_line - 1).min(lines.len());
        (start, ctx.end_line.clamp(start, lines.len()))
    };

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 4);
    out.extend_from_slice(&lines[..start]);
    out.extend(region.lines());
    out.extend_from_slice(&lines[end..]);

    let eol = line_ending(original);
    let mut joined = out.join(eol);
    if original.ends_with('\n') || original.is_empty() {
        joined.push_str(eol);
    }
    joined
}

/// Line ending of the first line, `"\n"` when there is none.
fn line_ending(text: &str) -> &'static str {
    match text.find('\n') {
        Some(i) if text[..i].ends_with('\r') => "\r\n",
        _ => "\n",
    }
}
