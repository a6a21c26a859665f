//! Batch Processing Module
//!
//! File collection by extension and per-run result bookkeeping.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Container extensions decoded through libheif.
pub const HEIF_EXTENSIONS: &[&str] = &["heic", "heif"];

/// Collect regular files under `dir` whose extension is in `extensions`.
///
/// Non-recursive mode only looks at direct children. A missing or unreadable
/// `dir` yields an empty list; unreadable entries are skipped. Order follows
/// the directory listing and is not sorted.
pub fn collect_files(dir: &Path, extensions: &[&str], recursive: bool) -> Vec<PathBuf> {
    let walker = if recursive {
        WalkDir::new(dir).follow_links(true)
    } else {
        WalkDir::new(dir).follow_links(true).max_depth(1)
    };

    walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.depth() > 0 && e.file_type().is_file())
        .filter(|e| crate::common_utils::has_extension(e.path(), extensions))
        .map(|e| e.into_path())
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Submitted but dropped before starting because a stop was requested.
    pub abandoned: usize,
    pub errors: Vec<(PathBuf, String)>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn success(&mut self) {
        self.succeeded += 1;
    }

    pub fn fail(&mut self, path: PathBuf, error: String) {
        self.failed += 1;
        self.errors.push((path, error));
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn abandon(&mut self) {
        self.abandoned += 1;
    }

    /// Files accounted as done: converted, failed or already present.
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Share of processed files that did not fail, in percent.
    pub fn success_rate(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            100.0
        } else {
            ((self.succeeded + self.skipped) as f64 / processed as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_collect_files_non_recursive_only_direct_children() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("a.heic"));
        touch(&root.join("b.HEIF"));
        touch(&root.join("c.jpg"));
        touch(&root.join("sub/d.heic"));
        fs::create_dir_all(root.join("dir.heic")).unwrap();

        let mut found = collect_files(root, HEIF_EXTENSIONS, false);
        found.sort();
        assert_eq!(found, vec![root.join("a.heic"), root.join("b.HEIF")]);
    }

    #[test]
    fn test_collect_files_recursive_any_depth() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        touch(&root.join("a.heic"));
        touch(&root.join("x/b.heif"));
        touch(&root.join("x/y/z/c.HEIC"));
        touch(&root.join("x/y/notes.txt"));

        let found = collect_files(root, HEIF_EXTENSIONS, true);
        assert_eq!(found.len(), 3);
        assert!(found.contains(&root.join("x/y/z/c.HEIC")));
    }

    #[test]
    fn test_collect_files_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        assert!(collect_files(&missing, HEIF_EXTENSIONS, false).is_empty());
        assert!(collect_files(&missing, HEIF_EXTENSIONS, true).is_empty());
    }

    #[test]
    fn test_batch_result_counts() {
        let mut result = BatchResult::with_total(5);
        result.success();
        result.success();
        result.skip();
        result.fail(PathBuf::from("bad.heic"), "decode failed".to_string());
        result.abandon();

        assert_eq!(result.total, 5);
        assert_eq!(result.processed(), 4);
        assert_eq!(result.abandoned, 1);
        assert_eq!(result.errors.len(), 1);
        assert!((result.success_rate() - 75.0).abs() < 0.001);
    }

    #[test]
    fn test_success_rate_empty() {
        assert!((BatchResult::new().success_rate() - 100.0).abs() < 0.001);
    }
}
