//! Backup-then-overwrite mutation of working-tree files.
//!
//! Every mutation goes through [`FixApplicator::apply`]: the original
//! snapshot is written to the backup arena first, then the target is replaced
//! atomically through a temporary file in the same directory. Backups stay in
//! the arena until the engine releases them after validation.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::is_repo_relative;
use crate::issue::CodeFix;

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Target file not found: {0}")]
    Missing(PathBuf),

    #[error("Path {0} is outside the repository")]
    OutsideRepo(PathBuf),

    #[error("File {0} changed since its snapshot was taken")]
    Stale(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Rollback of {path} failed: {source}")]
    RollbackFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ApplyError {
    /// Short label recorded in the run summary.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Missing(_) | Self::Io { .. } => "io_error",
            Self::Stale(_) => "stale_snapshot",
            Self::OutsideRepo(_) => "path_outside_repo",
            Self::RollbackFailed { .. } => "rollback_failed",
        }
    }
}

/// Result of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedFix {
    /// Absolute path of the updated file
    pub path: PathBuf,
    /// Byte range of the new content that differs from the snapshot
    pub byte_range: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackResult {
    /// The snapshot was written back.
    Restored,
    /// The file already matched the snapshot; nothing was written.
    AlreadyClean,
}

/// Pending backups keyed by repository-relative path.
#[derive(Debug)]
pub struct BackupArena {
    dir: PathBuf,
    entries: HashMap<PathBuf, PathBuf>,
}

impl BackupArena {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: HashMap::new(),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write `snapshot` to the arena. Completes before any mutation of `path`.
    fn acquire(&mut self, path: &Path, snapshot: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let name = format!(
            "{}.bak",
            path.to_string_lossy().replace(['/', '\\', ':'], "__")
        );
        let backup = self.dir.join(name);
        write_atomic(&backup, snapshot)?;
        self.entries.insert(path.to_path_buf(), backup);
        Ok(())
    }

    fn release(&mut self, path: &Path) {
        if let Some(backup) = self.entries.remove(path) {
            if let Err(e) = fs::remove_file(&backup) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %backup.display(), "Failed to remove backup: {}", e);
                }
            }
        }
    }
}

/// Applies code fixes to files under a repository root.
#[derive(Debug)]
pub struct FixApplicator {
    repo_root: PathBuf,
    backups: BackupArena,
}

impl FixApplicator {
    pub fn new(repo_root: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            backups: BackupArena::new(backup_dir),
        }
    }

    pub fn backups(&self) -> &BackupArena {
        &self.backups
    }

    fn target(&self, relative: &Path) -> PathBuf {
        self.repo_root.join(relative)
    }

    fn checked_target(&self, relative: &Path) -> Result<PathBuf, ApplyError> {
        if !is_repo_relative(relative) {
            return Err(ApplyError::OutsideRepo(relative.to_path_buf()));
        }
        Ok(self.target(relative))
    }

    /// Back up the snapshot, then atomically replace the file with the fix.
    ///
    /// The file must still hold the snapshot. If the replacement cannot be
    /// completed the snapshot is written back before returning.
    pub fn apply(&mut self, fix: &CodeFix) -> Result<AppliedFix, ApplyError> {
        let relative = fix.path();
        let target = self.checked_target(relative)?;

        let current = match fs::read_to_string(&target) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ApplyError::Missing(relative.to_path_buf()));
            }
            Err(source) => {
                return Err(ApplyError::Io {
                    path: relative.to_path_buf(),
                    source,
                })
            }
        };
        if current != fix.original() {
            return Err(ApplyError::Stale(relative.to_path_buf()));
        }

        self.backups
            .acquire(relative, fix.original())
            .map_err(|source| ApplyError::Io {
                path: relative.to_path_buf(),
                source,
            })?;

        if let Err(source) = write_atomic(&target, fix.replacement()) {
            warn!(path = %relative.display(), "Write failed, restoring snapshot: {}", source);
            self.restore_snapshot(relative, fix.original())?;
            return Err(ApplyError::Io {
                path: relative.to_path_buf(),
                source,
            });
        }

        let byte_range = changed_range(fix.original(), fix.replacement());
        info!(
            path = %relative.display(),
            start = byte_range.start,
            end = byte_range.end,
            "Applied fix"
        );
        Ok(AppliedFix {
            path: target,
            byte_range,
        })
    }

    /// Restore the fix's snapshot. Idempotent: a file that already matches the
    /// snapshot is left untouched.
    pub fn rollback(
        &mut self,
        fix: &CodeFix,
    ) -> Result<RollbackResult, ApplyError> {
        let relative = fix.path();
        let target = self.checked_target(relative)?;

        let result = match fs::read_to_string(&target) {
            Ok(current) if current == fix.original() => RollbackResult::AlreadyClean,
            _ => {
                self.restore_snapshot(relative, fix.original())?;
                RollbackResult::Restored
            }
        };

        self.backups.release(relative);
        debug!(path = %relative.display(), ?result, "Rollback finished");
        Ok(result)
    }

    /// Drop the backup for `path` once validation has accepted the fix.
    pub fn release(&mut self, path: &Path) {
        self.backups.release(path);
    }

    /// Write every pending backup back to its file. Used when a run stops
    /// while fixes are still unvalidated.
    pub fn restore_all(&mut self) -> Vec<ApplyError> {
        let pending: Vec<(PathBuf, PathBuf)> = self
            .backups
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut failures = Vec::new();
        for (relative, backup) in pending {
            let restored = fs::read_to_string(&backup)
                .and_then(|snapshot| write_atomic(&self.target(&relative), &snapshot));
            match restored {
                Ok(()) => {
                    info!(path = %relative.display(), "Restored pending backup");
                    self.backups.release(&relative);
                }
                Err(source) => failures.push(ApplyError::RollbackFailed {
                    path: relative,
                    source,
                }),
            }
        }
        failures
    }

    fn restore_snapshot(&self, relative: &Path, snapshot: &str) -> Result<(), ApplyError> {
        write_atomic(&self.target(relative), snapshot).map_err(|source| {
            ApplyError::RollbackFailed {
                path: relative.to_path_buf(),
                source,
            }
        })
    }
}

/// Replace `path` with `content` via a temporary file in the same directory,
/// so readers see either the old or the new content.
fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    if let Ok(meta) = fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Byte range in `new` that differs from `old`, from the common prefix and
/// suffix.
pub fn changed_range(old: &str, new: &str) -> Range<usize> {
    let (old_b, new_b) = (old.as_bytes(), new.as_bytes());
    let prefix = old_b
        .iter()
        .zip(new_b)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old_b.len().min(new_b.len()) - prefix;
    let suffix = old_b
        .iter()
        .rev()
        .zip(new_b.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    prefix..new_b.len() - suffix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{CodeFix, Effort, FixPlan, Issue, IssueType, Severity};
    use tempfile::TempDir;

    const ORIGINAL: &str = "class A {\n    int x = 1;\n}\n";
    const FIXED: &str = "class A {\n    final int x = 1;\n}\n";

    fn fix(original: &str, replacement: &str) -> CodeFix {
        let issue = Issue::new("I1", Severity::Major, IssueType::CodeSmell, "src/A.java", 2, "m");
        let plan = FixPlan::new(issue, "a", "s", 0.9, Effort::Low, "").unwrap();
        CodeFix::new(plan, "src/A.java", original, replacement, 1)
    }

    fn setup() -> (TempDir, FixApplicator) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/A.java"), ORIGINAL).unwrap();
        let applicator = FixApplicator::new(temp.path(), temp.path().join(".heal/backups"));
        (temp, applicator)
    }

    fn read(temp: &TempDir) -> String {
        fs::read_to_string(temp.path().join("src/A.java")).unwrap()
    }

    #[test]
    fn test_apply_writes_backup_then_replacement() {
        let (temp, mut applicator) = setup();
        let applied = applicator.apply(&fix(ORIGINAL, FIXED)).unwrap();

        assert_eq!(read(&temp), FIXED);
        assert_eq!(applied.path, temp.path().join("src/A.java"));
        assert_eq!(&FIXED[applied.byte_range.clone()], "final ");
        assert!(applicator.backups().contains(Path::new("src/A.java")));

        let backup = fs::read_to_string(temp.path().join(".heal/backups/src__A.java.bak")).unwrap();
        assert_eq!(backup, ORIGINAL);
    }

    #[test]
    fn test_apply_missing_file() {
        let (temp, mut applicator) = setup();
        fs::remove_file(temp.path().join("src/A.java")).unwrap();

        let err = applicator.apply(&fix(ORIGINAL, FIXED)).unwrap_err();
        assert!(matches!(err, ApplyError::Missing(_)));
        assert_eq!(err.label(), "io_error");
        assert!(applicator.backups().is_empty());
    }

    #[test]
    fn test_apply_refuses_stale_snapshot() {
        let (temp, mut applicator) = setup();
        let err = applicator.apply(&fix("something else", FIXED)).unwrap_err();

        assert!(matches!(err, ApplyError::Stale(_)));
        assert_eq!(read(&temp), ORIGINAL);
    }

    #[test]
    fn test_rollback_restores_and_is_idempotent() {
        let (temp, mut applicator) = setup();
        let fix = fix(ORIGINAL, FIXED);
        applicator.apply(&fix).unwrap();

        assert_eq!(applicator.rollback(&fix).unwrap(), RollbackResult::Restored);
        assert_eq!(read(&temp), ORIGINAL);
        assert!(applicator.backups().is_empty());

        assert_eq!(applicator.rollback(&fix).unwrap(), RollbackResult::AlreadyClean);
        assert_eq!(read(&temp), ORIGINAL);
    }

    #[test]
    fn test_rollback_on_untouched_file_is_noop() {
        let (temp, mut applicator) = setup();
        let before = fs::metadata(temp.path().join("src/A.java")).unwrap().modified().unwrap();

        assert_eq!(
            applicator.rollback(&fix(ORIGINAL, FIXED)).unwrap(),
            RollbackResult::AlreadyClean
        );
        let after = fs::metadata(temp.path().join("src/A.java")).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_release_drops_backup() {
        let (temp, mut applicator) = setup();
        applicator.apply(&fix(ORIGINAL, FIXED)).unwrap();
        applicator.release(Path::new("src/A.java"));

        assert!(applicator.backups().is_empty());
        assert!(!temp.path().join(".heal/backups/src__A.java.bak").exists());
        assert_eq!(read(&temp), FIXED);
    }

    #[test]
    fn test_restore_all_reverts_pending() {
        let (temp, mut applicator) = setup();
        applicator.apply(&fix(ORIGINAL, FIXED)).unwrap();

        assert!(applicator.restore_all().is_empty());
        assert_eq!(read(&temp), ORIGINAL);
        assert!(applicator.backups().is_empty());
    }

    #[test]
    fn test_apply_refuses_paths_outside_repo() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        fs::create_dir_all(&repo).unwrap();
        fs::write(temp.path().join("Outside.java"), ORIGINAL).unwrap();
        let mut applicator = FixApplicator::new(&repo, repo.join(".heal/backups"));

        let issue = Issue::new("I9", Severity::Major, IssueType::Bug, "../Outside.java", 2, "m");
        let plan = FixPlan::new(issue, "a", "s", 0.9, Effort::Low, "").unwrap();
        let escaping = CodeFix::new(plan, "../Outside.java", ORIGINAL, FIXED, 1);

        let err = applicator.apply(&escaping).unwrap_err();
        assert!(matches!(err, ApplyError::OutsideRepo(_)));
        assert_eq!(err.label(), "path_outside_repo");
        assert!(matches!(
            applicator.rollback(&escaping),
            Err(ApplyError::OutsideRepo(_))
        ));
        assert_eq!(
            fs::read_to_string(temp.path().join("Outside.java")).unwrap(),
            ORIGINAL
        );
        assert!(applicator.backups().is_empty());
    }

    #[test]
    fn test_changed_range() {
        assert_eq!(changed_range("abc", "abc"), 3..3);
        assert_eq!(changed_range("abc", "aXc"), 1..2);
        assert_eq!(changed_range("aa", "aaa"), 2..3);
        assert_eq!(changed_range("", "new"), 0..3);
    }
}
