//! Common Utilities Module
//!
//! Small path helpers used across the tools:
//! - extension checks (case-insensitive)
//! - relative path computation

use std::path::{Path, PathBuf};

// ═══════════════════════════════════════════════════════════════
// Extension helpers
// ═══════════════════════════════════════════════════════════════

/// Lowercased extension of `path`, or an empty string when there is none.
///
/// # Examples
/// ```
/// use std::path::Path;
/// use shared_utils::common_utils::get_extension_lowercase;
///
/// assert_eq!(get_extension_lowercase(Path::new("IMG_0001.HEIC")), "heic");
/// assert_eq!(get_extension_lowercase(Path::new("noext")), "");
/// ```
pub fn get_extension_lowercase(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// True when the extension of `path` is one of `extensions` (given without the dot).
///
/// # Examples
/// ```
/// use std::path::Path;
/// use shared_utils::common_utils::has_extension;
///
/// assert!(has_extension(Path::new("photo.HeIf"), &["heic", "heif"]));
/// assert!(!has_extension(Path::new("photo.jpg"), &["heic", "heif"]));
/// ```
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    let ext = get_extension_lowercase(path);
    !ext.is_empty() && extensions.contains(&ext.as_str())
}

/// Base file name of `path` as a lossy string; empty when the path has none.
pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ═══════════════════════════════════════════════════════════════
// Path helpers
// ═══════════════════════════════════════════════════════════════

/// Path of `path` relative to `base`, or `None` when `path` is not below `base`.
///
/// Unlike a plain `strip_prefix` fallback this never returns the input unchanged,
/// so callers cannot accidentally join an absolute path onto an output root.
pub fn relative_path_under(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(Path::to_path_buf)
}
