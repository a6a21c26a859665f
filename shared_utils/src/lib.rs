//! Shared Utilities for the heic_png tools
//!
//! This crate provides common functionality used by the conversion front ends:
//! - Logging setup (tracing, rotating file + stderr)
//! - Worker pool sizing
//! - File collection by extension and batch result bookkeeping
//! - Progress bar and summary report

pub mod batch;
pub mod common_utils;
pub mod logging;
pub mod progress;
pub mod report;
pub mod thread_manager;

pub use batch::{collect_files, BatchResult, HEIF_EXTENSIONS};
pub use common_utils::{file_name_lossy, has_extension, relative_path_under};
pub use progress::{format_bytes, format_duration, BatchProgressBar};
pub use report::print_summary_report;
pub use thread_manager::{io_pool_width, resolve_pool_width};
