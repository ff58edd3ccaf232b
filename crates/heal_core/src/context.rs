//! Code context extraction around a reported line.
//!
//! Context is derived fresh for every fix attempt: a previous fix in the same
//! run may have rewritten the file.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::issue::Issue;

/// Source language, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Python,
    JavaScript,
    TypeScript,
    Unknown,
}

impl Language {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("java") => Self::Java,
            Some("py") => Self::Python,
            Some("js") | Some("jsx") | Some("mjs") | Some("cjs") => Self::JavaScript,
            Some("ts") | Some("tsx") => Self::TypeScript,
            _ => Self::Unknown,
        }
    }

    /// Fence tag for prompts and review bodies.
    pub fn fence(self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Unknown => "",
        }
    }
}

/// Whether `path` stays under the directory it is joined to: relative, with
/// no `..` components.
pub fn is_repo_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn ensure_repo_relative(path: &Path) -> CoreResult<()> {
    if is_repo_relative(path) {
        Ok(())
    } else {
        Err(CoreError::PathOutsideRepo(path.to_path_buf()))
    }
}

/// File window around a reported line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeContext {
    /// Repository-relative path
    pub path: PathBuf,
    pub language: Language,
    /// First line of the window, 1-based
    pub start_line: usize,
    /// Last line of the window, 1-based and inclusive
    pub end_line: usize,
    pub lines: Vec<String>,
    /// Exact text of the reported line, empty when the line is unknown
    pub target_line: String,
    /// Import/package declarations found in the file
    pub declarations: Vec<String>,
    /// Signature line of the function or method enclosing the target line
    pub enclosing_signature: Option<String>,
    /// Total number of lines in the file
    pub total_lines: usize,
}

impl CodeContext {
    /// The window as plain text.
    pub fn window_text(&self) -> String {
        self.lines.join("\n")
    }

    /// The window with line numbers, for prompts.
    pub fn numbered(&self) -> String {
        self.lines
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:>5}: {}", self.start_line + i, line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Reads file regions for issues.
#[derive(Debug, Clone)]
pub struct ContextExtractor {
    repo_root: PathBuf,
    surrounding_lines: usize,
}

impl ContextExtractor {
    pub fn new(repo_root: impl Into<PathBuf>, surrounding_lines: usize) -> Self {
        Self {
            repo_root: repo_root.into(),
            surrounding_lines,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Read the file and build the window for `issue`.
    pub async fn extract(&self, issue: &Issue) -> CoreResult<CodeContext> {
        ensure_repo_relative(&issue.file)?;
        let full_path = self.repo_root.join(&issue.file);
        let content = match tokio::fs::read_to_string(&full_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::SourceNotFound(issue.file.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let ctx = self.build(issue, &content)?;
        debug!(
            issue_id = %issue.id,
            start = ctx.start_line,
            end = ctx.end_line,
            "Extracted code context"
        );
        Ok(ctx)
    }

    /// Build the window from already-loaded content.
    pub fn build(&self, issue: &Issue, content: &str) -> CoreResult<CodeContext> {
        ensure_repo_relative(&issue.file)?;
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        let language = Language::from_path(&issue.file);
        let line = issue.line as usize;

        if line > total {
            return Err(CoreError::LineOutOfRange {
                path: issue.file.clone(),
                line: issue.line,
                total,
            });
        }

        let (start, end, target_line) = if line == 0 {
            // Unknown line: take the head of the file.
            let end = total.min(self.surrounding_lines * 2 + 1).max(total.min(1));
            (1, end, String::new())
        } else {
            let start = line.saturating_sub(self.surrounding_lines).max(1);
            let end = (line + self.surrounding_lines).min(total);
            (start, end, lines[line - 1].to_string())
        };

        let window: Vec<String> = if total == 0 {
            Vec::new()
        } else {
            lines[start - 1..end].iter().map(|l| l.to_string()).collect()
        };

        let enclosing_signature = if line == 0 {
            None
        } else {
            find_enclosing_signature(&lines[..line], language)
        };

        Ok(CodeContext {
            path: issue.file.clone(),
            language,
            start_line: start,
            end_line: end,
            lines: window,
            target_line,
            declarations: extract_declarations(content, language),
            enclosing_signature,
            total_lines: total,
        })
    }
}

type CachedRegex = OnceLock<Option<Regex>>;

fn import_regex(language: Language) -> Option<&'static Regex> {
    static JAVA: CachedRegex = OnceLock::new();
    static PYTHON: CachedRegex = OnceLock::new();
    static SCRIPT: CachedRegex = OnceLock::new();
    static ANY: CachedRegex = OnceLock::new();

    let cell = match language {
        Language::Java => JAVA.get_or_init(|| {
            Regex::new(r"^\s*(?:package|import)\s+(?:static\s+)?[\w.*]+\s*;").ok()
        }),
        Language::Python => PYTHON.get_or_init(|| {
            Regex::new(r"^(?:import\s+[\w., ]+|from\s+[\w.]+\s+import\s+.+)$").ok()
        }),
        Language::JavaScript | Language::TypeScript => SCRIPT.get_or_init(|| {
            Regex::new(r#"^\s*(?:import\s.+|(?:const|let|var)\s+.+=\s*require\(.+\);?)$"#).ok()
        }),
        Language::Unknown => ANY.get_or_init(|| {
            Regex::new(r"^\s*(?:import|include|use|using|from|require)\b.*$").ok()
        }),
    };
    cell.as_ref()
}

/// Collect import/package declarations in file order.
pub fn extract_declarations(content: &str, language: Language) -> Vec<String> {
    let Some(re) = import_regex(language) else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|l| re.is_match(l))
        .map(|l| l.trim().to_string())
        .collect()
}

fn signature_regex(language: Language) -> Option<&'static Regex> {
    static JAVA: CachedRegex = OnceLock::new();
    static PYTHON: CachedRegex = OnceLock::new();
    static SCRIPT: CachedRegex = OnceLock::new();

    let cell = match language {
        Language::Java | Language::Unknown => JAVA.get_or_init(|| {
            Regex::new(
                r"^\s*(?:(?:public|protected|private|static|final|abstract|synchronized|native)\s+)*[\w<>\[\],.? ]+\s+\w+\s*\([^;]*$",
            )
            .ok()
        }),
        Language::Python => PYTHON.get_or_init(|| Regex::new(r"^\s*(?:async\s+)?def\s+\w+\s*\(").ok()),
        Language::JavaScript | Language::TypeScript => SCRIPT.get_or_init(|| {
            Regex::new(
                r"^\s*(?:export\s+)?(?:async\s+)?(?:function\s*\*?\s*\w+\s*\(|(?:public|private|protected|static|\s)*\w+\s*\([^)]*\)\s*(?::\s*[\w<>\[\]| ]+)?\s*\{)",
            )
            .ok()
        }),
    };
    cell.as_ref()
}

const CONTROL_KEYWORDS: &[&str] = &["if", "for", "while", "switch", "catch", "return", "new", "else"];

/// Scan upwards from the target line for the nearest signature line.
fn find_enclosing_signature(lines_up_to_target: &[&str], language: Language) -> Option<String> {
    let re = signature_regex(language)?;
    lines_up_to_target.iter().rev().find_map(|line| {
        let trimmed = line.trim();
        let first_word = trimmed.split(|c: char| !c.is_alphanumeric()).next().unwrap_or("");
        if CONTROL_KEYWORDS.contains(&first_word) {
            return None;
        }
        re.is_match(line).then(|| trimmed.to_string())
    })
}
