//! Error types
//!
//! - [`SetupError`]: fatal to a run, reported once through `on_error`.
//! - [`ConversionError`]: one file failed; the batch carries on.
//! - [`PathError`], [`CodecError`], [`TransformError`]: building blocks of the above.

use crate::request::ResizeMode;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("compression level must be between 0 and 9, got {0}")]
    CompressLevel(u8),

    #[error("{mode} mode needs a target width or height")]
    MissingTarget { mode: ResizeMode },

    #[error("{mode} mode needs both a target width and height")]
    MissingDimensions { mode: ResizeMode },

    #[error("target {axis} must be at least 1 pixel")]
    ZeroDimension { axis: &'static str },
}

#[derive(Error, Debug)]
pub enum PathError {
    #[error("{} is not inside {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("cannot create directory {}: {source}", dir.display())]
    CreateDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("input root does not exist or is not a directory: {}", .0.display())]
    InputRootMissing(PathBuf),

    #[error("output base must not be empty")]
    EmptyOutputBase,

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("cannot allocate an output directory under {}: {source}", base.display())]
    OutputAllocation {
        base: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("resume directory does not exist or is not a directory: {}", .0.display())]
    ResumeDirMissing(PathBuf),

    #[error("nothing to convert: no HEIC/HEIF images found in {}", .0.display())]
    NothingToConvert(PathBuf),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Path(#[from] PathError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("{mode} resize needs target geometry that was not supplied")]
    MissingTarget { mode: ResizeMode },

    #[error("target size {width}x{height} is empty")]
    EmptyTarget { width: u32, height: u32 },
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("cannot read source: {0}")]
    Read(#[source] std::io::Error),

    #[error("HEIF decode failed: {0}")]
    Heif(String),

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("unsupported pixel layout: {0}")]
    UnsupportedLayout(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("PNG encode failed: {0}")]
    Png(#[from] png::EncodingError),

    #[error("cannot write output: {0}")]
    Write(#[source] std::io::Error),

    #[error("conversion panicked: {0}")]
    Panic(String),
}

/// A single file failed to convert.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}: {message}", input.display())]
pub struct ConversionError {
    pub input: PathBuf,
    pub message: String,
}

impl ConversionError {
    pub fn new(input: &Path, cause: impl std::fmt::Display) -> Self {
        Self {
            input: input.to_path_buf(),
            message: cause.to_string(),
        }
    }
}

impl From<(&Path, CodecError)> for ConversionError {
    fn from((input, err): (&Path, CodecError)) -> Self {
        Self::new(input, err)
    }
}
