//! Backup copies of installed files, for rollback.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use super::error::{TaskError, TaskResult};
use crate::fetch::sanitize_filename;

const TASK: &str = "backup";

/// Directory of backup copies taken before files are replaced.
///
/// Each backup gets a unique name, so two tasks touching files with the same
/// name never share a copy.
#[derive(Debug)]
pub struct BackupStore {
    dir: PathBuf,
    next: AtomicUsize,
}

impl BackupStore {
    /// Open (creating if needed) a backup store at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> TaskResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| TaskError::io(TASK, &dir, e))?;
        Ok(Self {
            dir,
            next: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `original` into the store.
    ///
    /// Returns `None` when there is no file to back up.
    pub fn save(&self, original: &Path) -> TaskResult<Option<PathBuf>> {
        if !original.is_file() {
            return Ok(None);
        }
        let name = original
            .file_name()
            .map(|n| sanitize_filename(&n.to_string_lossy()))
            .unwrap_or_default();
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        let copy = self.dir.join(format!("{:04}-{}", index, name));

        fs::copy(original, &copy).map_err(|e| TaskError::io(TASK, &copy, e))?;
        debug!(original = %original.display(), backup = %copy.display(), "Backed up file");
        Ok(Some(copy))
    }

    /// Put a backup copy back at `original`.
    pub fn restore(copy: &Path, original: &Path) -> TaskResult<()> {
        if fs::rename(copy, original).is_err() {
            fs::copy(copy, original).map_err(|e| TaskError::io(TASK, original, e))?;
            let _ = fs::remove_file(copy);
        }
        debug!(original = %original.display(), "Restored file from backup");
        Ok(())
    }

    /// Remove every backup copy. Called once a run no longer needs rollback.
    pub fn clear(&self) -> TaskResult<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).map_err(|e| TaskError::io(TASK, &self.dir, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_restore() {
        let temp = TempDir::new().unwrap();
        let store = BackupStore::new(temp.path().join("backup")).unwrap();
        let original = temp.path().join("app.bin");
        fs::write(&original, b"v1").unwrap();

        let copy = store.save(&original).unwrap().unwrap();
        fs::write(&original, b"v2").unwrap();
        BackupStore::restore(&copy, &original).unwrap();

        assert_eq!(fs::read(&original).unwrap(), b"v1");
    }

    #[test]
    fn test_missing_original_has_no_backup() {
        let temp = TempDir::new().unwrap();
        let store = BackupStore::new(temp.path().join("backup")).unwrap();
        assert!(store.save(&temp.path().join("absent")).unwrap().is_none());
    }

    #[test]
    fn test_same_name_gets_distinct_copies() {
        let temp = TempDir::new().unwrap();
        let store = BackupStore::new(temp.path().join("backup")).unwrap();
        fs::create_dir_all(temp.path().join("a")).unwrap();
        fs::create_dir_all(temp.path().join("b")).unwrap();
        fs::write(temp.path().join("a/lib.so"), b"a").unwrap();
        fs::write(temp.path().join("b/lib.so"), b"b").unwrap();

        let first = store.save(&temp.path().join("a/lib.so")).unwrap().unwrap();
        let second = store.save(&temp.path().join("b/lib.so")).unwrap().unwrap();
        assert_ne!(first, second);
        assert_eq!(fs::read(second).unwrap(), b"b");
    }

    #[test]
    fn test_clear_removes_directory() {
        let temp = TempDir::new().unwrap();
        let store = BackupStore::new(temp.path().join("backup")).unwrap();
        fs::write(temp.path().join("f"), b"x").unwrap();
        store.save(&temp.path().join("f")).unwrap();

        store.clear().unwrap();
        assert!(!store.dir().exists());
    }
}
