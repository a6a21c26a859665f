//! Output locations: the indexed per-run directory and per-file destinations.

use crate::errors::PathError;
use shared_utils::relative_path_under;
use std::io;
use std::path::{Path, PathBuf};

/// Destination of `input` inside `output_dir`, without touching the filesystem.
///
/// The path relative to `input_root` is kept and the extension becomes `.png`.
pub fn destination_for(
    input: &Path,
    input_root: &Path,
    output_dir: &Path,
) -> Result<PathBuf, PathError> {
    let rel = relative_path_under(input, input_root).ok_or_else(|| PathError::OutsideRoot {
        path: input.to_path_buf(),
        root: input_root.to_path_buf(),
    })?;
    Ok(output_dir.join(rel).with_extension("png"))
}

/// Like [`destination_for`], and also creates the missing parent directories.
pub fn resolve(input: &Path, input_root: &Path, output_dir: &Path) -> Result<PathBuf, PathError> {
    let dest = destination_for(input, input_root, output_dir)?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|source| PathError::CreateDir {
            dir: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(dest)
}

/// Create and return `base/{prefix}{N}` for the smallest free `N >= 1`.
///
/// `base` is created if needed. Each candidate is claimed with `create_dir`,
/// which fails if the directory already exists, so a name taken between the
/// probe and the create is skipped. This narrows but does not close the race
/// between two runs sharing a base; it is not a lock.
pub fn allocate(base: &Path, prefix: &str) -> io::Result<PathBuf> {
    std::fs::create_dir_all(base)?;

    for index in 1u64.. {
        let candidate = base.join(format!("{}{}", prefix, index));
        if candidate.exists() {
            continue;
        }
        match std::fs::create_dir(&candidate) {
            Ok(()) => {
                tracing::info!(dir = %candidate.display(), "Allocated output directory");
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::other("output directory index space exhausted"))
}
