//! Finds HEIC/HEIF files under an input root.

use shared_utils::{collect_files, HEIF_EXTENSIONS};
use std::path::{Path, PathBuf};

/// Files under `root` with a `.heic`/`.heif` extension (any case).
///
/// Non-recursive mode lists direct children only. A root that cannot be
/// listed yields an empty list. The order is whatever the filesystem returns.
pub fn discover(root: &Path, recursive: bool) -> Vec<PathBuf> {
    let files = collect_files(root, HEIF_EXTENSIONS, recursive);
    tracing::debug!(
        root = %root.display(),
        recursive,
        found = files.len(),
        "Discovery finished"
    );
    files
}
