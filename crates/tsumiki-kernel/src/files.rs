//! Temp files owned by a session.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Files a session materialized (images, renderer inputs). Removed on
/// [`cleanup`](TempFiles::cleanup) or drop.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Vec<PathBuf>,
}

impl TempFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty file ending in `suffix` (e.g. `.png`) and track it.
    pub fn alloc(&mut self, suffix: &str) -> std::io::Result<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix("tsumiki-")
            .suffix(suffix)
            .tempfile()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        self.paths.push(path.clone());
        Ok(path)
    }

    /// Track a file created elsewhere.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Delete every tracked file. Failures are logged and skipped.
    pub fn cleanup(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
            }
        }
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_removes_files_and_is_idempotent() {
        let mut files = TempFiles::new();
        let a = files.alloc(".png").unwrap();
        let b = files.alloc(".svg").unwrap();
        assert!(a.exists() && b.exists());
        assert!(a.to_string_lossy().ends_with(".png"));
        assert!(files.contains(&b));

        std::fs::remove_file(&b).unwrap();
        files.cleanup();
        assert!(!a.exists());
        assert!(files.paths().is_empty());
        files.cleanup();
    }

    #[test]
    fn test_drop_cleans_up() {
        let path = {
            let mut files = TempFiles::new();
            files.alloc(".png").unwrap()
        };
        assert!(!path.exists());
    }
}
