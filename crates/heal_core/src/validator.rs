//! Post-apply validation: a syntax gate plus best-effort structural checks.
//!
//! Syntax is checked with tree-sitter for Java, Python, JavaScript and
//! TypeScript. Other files get a delimiter-balance check. Structural checks
//! only ever produce [`ValidationStatus::LogicConcern`].

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

use crate::context::{extract_declarations, CodeContext, Language};
use crate::issue::{CodeFix, ValidationResult, ValidationStatus};

const MAX_DIAGNOSTICS: usize = 10;

const JAVA_BUILTINS: &[&str] = &[
    "String", "Object", "Integer", "Long", "Double", "Float", "Boolean", "Character", "Byte",
    "Short", "Number", "Void", "Math", "System", "Thread", "StringBuilder", "StringBuffer",
    "Iterable", "Comparable", "CharSequence", "Runnable", "AutoCloseable", "Class", "Enum",
    "Record", "Throwable", "Exception", "Error", "RuntimeException", "IllegalArgumentException",
    "IllegalStateException", "NullPointerException", "UnsupportedOperationException",
    "IndexOutOfBoundsException", "ArithmeticException", "ClassCastException",
    "InterruptedException", "SecurityException", "CloneNotSupportedException", "Override",
    "Deprecated", "SuppressWarnings", "FunctionalInterface", "SafeVarargs",
];

const PYTHON_BUILTINS: &[&str] = &[
    "True", "False", "None", "Exception", "BaseException", "ValueError", "TypeError", "KeyError",
    "IndexError", "RuntimeError", "OSError", "IOError", "AttributeError", "NotImplementedError",
    "StopIteration", "FileNotFoundError", "PermissionError", "ImportError", "ZeroDivisionError",
];

const SCRIPT_BUILTINS: &[&str] = &[
    "Object", "Array", "String", "Number", "Boolean", "Promise", "Error", "TypeError",
    "RangeError", "Map", "Set", "WeakMap", "WeakSet", "JSON", "Math", "Date", "RegExp", "Symbol",
    "Infinity", "NaN", "BigInt", "Record", "Partial", "Readonly", "Pick", "Omit", "Required",
    "ReturnType", "Uint8Array", "Buffer",
];

const NO_BUILTINS: &[&str] = &[];

/// Runs syntax and structural checks on applied fixes.
#[derive(Debug, Clone)]
pub struct Validator {
    repo_root: PathBuf,
    enabled: bool,
    logic_concern_is_failure: bool,
}

impl Validator {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            enabled: true,
            logic_concern_is_failure: false,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_logic_concern_as_failure(mut self, hard: bool) -> Self {
        self.logic_concern_is_failure = hard;
        self
    }

    /// Whether `result` must be rolled back and recorded as failed.
    pub fn is_hard_failure(&self, result: &ValidationResult) -> bool {
        match result.status {
            ValidationStatus::SyntaxFail => true,
            ValidationStatus::LogicConcern => self.logic_concern_is_failure,
            ValidationStatus::Pass | ValidationStatus::Skipped => false,
        }
    }

    /// Validate the applied `fix` against the file currently on disk.
    pub fn validate(&self, fix: CodeFix, ctx: &CodeContext) -> ValidationResult {
        if !self.enabled {
            return ValidationResult::new(
                ValidationStatus::Skipped,
                vec!["validation disabled".to_string()],
                fix,
            );
        }

        let path = self.repo_root.join(fix.path());
        let updated = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                return ValidationResult::new(
                    ValidationStatus::SyntaxFail,
                    vec![format!("cannot read {}: {}", fix.path().display(), e)],
                    fix,
                );
            }
        };

        let language = Language::from_path(fix.path());
        let new_errors = syntax_diagnostics(&updated, language, fix.path());
        if !new_errors.is_empty() {
            let old_errors = syntax_diagnostics(fix.original(), language, fix.path());
            if old_errors.is_empty() || new_errors.len() > old_errors.len() {
                debug!(path = %fix.path().display(), count = new_errors.len(), "Syntax check failed");
                return ValidationResult::new(ValidationStatus::SyntaxFail, new_errors, fix);
            }
            warn!(path = %fix.path().display(), "File had syntax errors before the fix");
        }

        let mut concerns = Vec::new();
        if !new_errors.is_empty() {
            concerns.push("syntax check inconclusive: file already had parse errors".to_string());
        }
        if !fix.changes_content() {
            concerns.push("patch leaves the file unchanged".to_string());
        }
        concerns.extend(structural_concerns(fix.original(), &updated, ctx, language));

        let status = if concerns.is_empty() {
            ValidationStatus::Pass
        } else {
            ValidationStatus::LogicConcern
        };
        ValidationResult::new(status, concerns, fix)
    }
}

/// Parse diagnostics for `content`, empty when it parses cleanly.
pub fn syntax_diagnostics(content: &str, language: Language, path: &Path) -> Vec<String> {
    match parser_for(language, path) {
        Some(mut parser) => match parser.parse(content, None) {
            Some(tree) => {
                let root = tree.root_node();
                if !root.has_error() {
                    return Vec::new();
                }
                let mut out = Vec::new();
                collect_errors(root, content.as_bytes(), &mut out);
                if out.is_empty() {
                    out.push("syntax error".to_string());
                }
                out
            }
            None => vec!["parser gave up".to_string()],
        },
        None => delimiter_diagnostics(content),
    }
}

fn parser_for(language: Language, path: &Path) -> Option<Parser> {
    let grammar: tree_sitter::Language = match language {
        Language::Java => tree_sitter_java::LANGUAGE.into(),
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::TypeScript => {
            let tsx = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("tsx"))
                .unwrap_or(false);
            if tsx {
                tree_sitter_typescript::LANGUAGE_TSX.into()
            } else {
                tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
            }
        }
        Language::Unknown => return None,
    };
    let mut parser = Parser::new();
    parser.set_language(&grammar).ok()?;
    Some(parser)
}

fn collect_errors(node: Node, src: &[u8], out: &mut Vec<String>) {
    if out.len() >= MAX_DIAGNOSTICS {
        return;
    }
    let pos = node.start_position();
    if node.is_missing() {
        out.push(format!(
            "line {}:{}: missing `{}`",
            pos.row + 1,
            pos.column + 1,
            node.kind()
        ));
        return;
    }
    if node.is_error() {
        let snippet: String = node
            .utf8_text(src)
            .unwrap_or("")
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .chars()
            .take(40)
            .collect();
        out.push(format!(
            "line {}:{}: unexpected `{}`",
            pos.row + 1,
            pos.column + 1,
            snippet
        ));
        return;
    }
    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_errors(child, src, out);
    }
}

/// Bracket balance for languages without a grammar. String and character
/// literals are skipped.
fn delimiter_diagnostics(content: &str) -> Vec<String> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut out = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let mut quote: Option<char> = None;
        let mut escaped = false;
        for c in line.chars() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' | '`' => quote = Some(c),
                '(' | '[' | '{' => stack.push((c, idx + 1)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.last() {
                        Some((open, _)) if *open == expected => {
                            stack.pop();
                        }
                        _ => out.push(format!("line {}: unmatched `{}`", idx + 1, c)),
                    }
                }
                _ => {}
            }
        }
    }
    for (open, line) in stack {
        out.push(format!("line {}: unclosed `{}`", line, open));
    }
    out.truncate(MAX_DIAGNOSTICS);
    out
}

fn type_identifier_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][A-Za-z0-9_]*\b").ok()).as_ref()
}

fn string_literal_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).ok())
        .as_ref()
}

/// Simple name introduced by an import line, e.g. `List` for
/// `import java.util.List;`.
fn imported_names(decl: &str) -> Vec<String> {
    let body = decl.trim().trim_end_matches(';');
    if body.starts_with("package ") {
        return Vec::new();
    }
    if let Some((_, names)) = body.split_once(" import ") {
        // from x import a, b as c
        return names
            .split(',')
            .filter_map(|n| n.split_whitespace().last())
            .map(|n| n.trim_matches(|c| c == '(' || c == ')').to_string())
            .collect();
    }
    if let Some(brace) = body.find('{') {
        // import { a, b as c } from 'x'
        let end = body.rfind('}').unwrap_or(body.len());
        return body[brace + 1..end]
            .split(',')
            .filter_map(|n| n.split_whitespace().last())
            .map(str::to_string)
            .collect();
    }
    body.split(|c: char| c.is_whitespace() || c == '.' || c == '=')
        .filter(|s| !s.is_empty() && *s != "*")
        .filter(|s| !matches!(*s, "import" | "static" | "const" | "let" | "var" | "from" | "as"))
        .last()
        .map(|s| vec![s.trim_matches(|c| c == '"' || c == '\'').to_string()])
        .unwrap_or_default()
}

fn is_comment(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("//") || t.starts_with('#') || t.starts_with('*') || t.starts_with("/*")
}

fn structural_concerns(
    original: &str,
    updated: &str,
    ctx: &CodeContext,
    language: Language,
) -> Vec<String> {
    let mut concerns = Vec::new();

    if let Some(sig) = &ctx.enclosing_signature {
        let was_present = original.lines().any(|l| l.trim() == sig);
        let still_present = updated.lines().any(|l| l.trim() == sig);
        if was_present && !still_present {
            concerns.push(format!("enclosing signature changed: `{}`", sig));
        }
    }

    let old_decls = extract_declarations(original, language);
    let new_decls = extract_declarations(updated, language);
    let body_words: HashSet<&str> = updated
        .lines()
        .filter(|l| !new_decls.iter().any(|d| d == l.trim()))
        .flat_map(|l| l.split(|c: char| !(c.is_alphanumeric() || c == '_')))
        .filter(|w| !w.is_empty())
        .collect();
    for removed in old_decls.iter().filter(|d| !new_decls.contains(d)) {
        for name in imported_names(removed) {
            if body_words.contains(name.as_str()) {
                concerns.push(format!("import `{}` removed but `{}` is still used", removed, name));
            }
        }
    }

    let (Some(type_re), Some(string_re)) = (type_identifier_regex(), string_literal_regex()) else {
        return concerns;
    };
    let known: HashSet<String> = new_decls
        .iter()
        .flat_map(|d| imported_names(d))
        .chain(
            match language {
                Language::Java => JAVA_BUILTINS,
                Language::Python => PYTHON_BUILTINS,
                Language::JavaScript | Language::TypeScript => SCRIPT_BUILTINS,
                Language::Unknown => NO_BUILTINS,
            }
            .iter()
            .map(|s| s.to_string()),
        )
        .collect();
    let original_lines: HashSet<&str> = original.lines().map(str::trim).collect();

    let mut unresolved: Vec<String> = Vec::new();
    for line in updated.lines() {
        if original_lines.contains(line.trim()) || is_comment(line) {
            continue;
        }
        let stripped = string_re.replace_all(line, "\"\"");
        for m in type_re.find_iter(&stripped) {
            let name = m.as_str();
            let constant = name.len() > 1 && name.chars().all(|c| !c.is_ascii_lowercase());
            if constant
                || known.contains(name)
                || contains_word(original, name)
                || declares(updated, name)
                || unresolved.iter().any(|u| u == name)
            {
                continue;
            }
            unresolved.push(name.to_string());
        }
    }
    for name in unresolved {
        concerns.push(format!("possibly unresolved symbol `{}`", name));
    }

    concerns
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|w| w == word)
}

fn declares(content: &str, name: &str) -> bool {
    content.lines().any(|l| {
        let mut words = l.split(|c: char| !(c.is_alphanumeric() || c == '_')).filter(|w| !w.is_empty());
        let mut prev = "";
        words.any(|w| {
            let hit = w == name
                && matches!(prev, "class" | "interface" | "enum" | "record" | "type" | "def");
            prev = w;
            hit
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextExtractor;
    use crate::issue::{Effort, FixPlan, Issue, IssueType, Severity};
    use tempfile::TempDir;

    const ORIGINAL: &str = "package demo;\n\
\n\
import java.io.FileInputStream;\n\
import java.io.IOException;\n\
\n\
public class Reader {\n\
    public int firstByte(String path) throws IOException {\n\
        FileInputStream in = new FileInputStream(path);\n\
        return in.read();\n\
    }\n\
}\n";

    fn issue() -> Issue {
        Issue::new("I1", Severity::Blocker, IssueType::Bug, "Reader.java", 8, "Use try-with-resources")
    }

    fn run(updated: &str) -> (ValidationResult, Validator) {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Reader.java"), updated).unwrap();

        let ctx = ContextExtractor::new(temp.path(), 2).build(&issue(), ORIGINAL).unwrap();
        let plan = FixPlan::new(issue(), "a", "s", 0.9, Effort::Low, "").unwrap();
        let fix = CodeFix::new(plan, "Reader.java", ORIGINAL, updated, 1);

        let validator = Validator::new(temp.path());
        (validator.validate(fix, &ctx), validator)
    }

    #[test]
    fn test_valid_fix_passes() {
        let updated = ORIGINAL.replace(
            "        FileInputStream in = new FileInputStream(path);\n        return in.read();\n",
            "        try (FileInputStream in = new FileInputStream(path)) {\n            return in.read();\n        }\n",
        );
        let (result, _) = run(&updated);
        assert_eq!(result.status, ValidationStatus::Pass, "{:?}", result.diagnostics);
        assert!(result.is_pass());
    }

    #[test]
    fn test_syntax_error_is_hard_failure() {
        let updated = ORIGINAL.replace("return in.read();", "return in.read(;");
        let (result, validator) = run(&updated);
        assert_eq!(result.status, ValidationStatus::SyntaxFail);
        assert!(!result.diagnostics.is_empty());
        assert!(result.diagnostics[0].starts_with("line "));
        assert!(validator.is_hard_failure(&result));
    }

    #[test]
    fn test_changed_signature_is_logic_concern() {
        let updated = ORIGINAL.replace(
            "public int firstByte(String path) throws IOException {",
            "public int firstByte(String path) {",
        );
        let (result, validator) = run(&updated);
        assert_eq!(result.status, ValidationStatus::LogicConcern);
        assert!(result.diagnostics[0].contains("enclosing signature changed"));
        assert!(!validator.is_hard_failure(&result));
        assert!(validator
            .clone()
            .with_logic_concern_as_failure(true)
            .is_hard_failure(&result));
    }

    #[test]
    fn test_unresolved_symbol_is_logic_concern() {
        let updated = ORIGINAL.replace(
            "        FileInputStream in = new FileInputStream(path);\n        return in.read();\n",
            "        return Files.newInputStream(Paths.get(path)).read();\n",
        );
        let (result, _) = run(&updated);
        assert_eq!(result.status, ValidationStatus::LogicConcern);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d == "possibly unresolved symbol `Files`"));
    }

    #[test]
    fn test_added_import_resolves_symbol() {
        let updated = ORIGINAL
            .replace(
                "import java.io.IOException;\n",
                "import java.io.IOException;\nimport java.nio.file.Files;\nimport java.nio.file.Paths;\n",
            )
            .replace(
                "        FileInputStream in = new FileInputStream(path);\n        return in.read();\n",
                "        return Files.newInputStream(Paths.get(path)).read();\n",
            );
        let (result, _) = run(&updated);
        assert_eq!(result.status, ValidationStatus::Pass, "{:?}", result.diagnostics);
    }

    #[test]
    fn test_removed_import_still_used() {
        let updated = ORIGINAL.replace("import java.io.FileInputStream;\n", "");
        let (result, _) = run(&updated);
        assert_eq!(result.status, ValidationStatus::LogicConcern);
        assert!(result.diagnostics[0].contains("FileInputStream"));
    }

    #[test]
    fn test_unchanged_patch_is_concern() {
        let (result, _) = run(ORIGINAL);
        assert_eq!(result.status, ValidationStatus::LogicConcern);
        assert_eq!(result.diagnostics, vec!["patch leaves the file unchanged"]);
    }

    #[test]
    fn test_disabled_validation_is_skipped() {
        let temp = TempDir::new().unwrap();
        let ctx = ContextExtractor::new(temp.path(), 2).build(&issue(), ORIGINAL).unwrap();
        let plan = FixPlan::new(issue(), "a", "s", 0.9, Effort::Low, "").unwrap();
        let fix = CodeFix::new(plan, "Reader.java", ORIGINAL, "x", 1);

        let result = Validator::new(temp.path()).with_enabled(false).validate(fix, &ctx);
        assert_eq!(result.status, ValidationStatus::Skipped);
    }

    #[test]
    fn test_python_syntax() {
        let path = Path::new("a.py");
        assert!(syntax_diagnostics("def f(x):\n    return x\n", Language::Python, path).is_empty());
        assert!(!syntax_diagnostics("def f(x:\n    return x\n", Language::Python, path).is_empty());
    }

    #[test]
    fn test_delimiter_fallback() {
        assert!(delimiter_diagnostics("fn main() { let s = \"}\"; }").is_empty());
        let diags = delimiter_diagnostics("a = [1, 2\nb = 3)");
        assert_eq!(diags, vec!["line 2: unmatched `)`", "line 1: unclosed `[`"]);
    }

    #[test]
    fn test_imported_names() {
        assert_eq!(imported_names("import java.util.List;"), vec!["List"]);
        assert_eq!(imported_names("from typing import List, Dict as D"), vec!["List", "D"]);
        assert_eq!(imported_names("import { a, b as c } from 'x';"), vec!["a", "c"]);
        assert!(imported_names("package demo;").is_empty());
    }
}
