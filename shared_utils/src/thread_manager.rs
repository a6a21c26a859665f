//! Worker pool sizing
//!
//! Image conversion is a mix of decode/encode CPU work and filesystem I/O, so
//! the pool is allowed to run a few more workers than there are cores:
//! `min(32, cores + 4)`.
//!
//! The width can be overridden per run, or process-wide with `HEIC_PNG_WORKERS`.

use std::sync::OnceLock;

/// Environment variable that overrides the default pool width.
pub const POOL_WIDTH_ENV: &str = "HEIC_PNG_WORKERS";

/// Upper bound for the default width.
pub const MAX_POOL_WIDTH: usize = 32;

/// Extra workers beyond the core count, to cover time spent blocked on I/O.
const IO_HEADROOM: usize = 4;

static DEFAULT_WIDTH: OnceLock<usize> = OnceLock::new();

/// `min(32, cores + 4)` for the given core count.
pub fn pool_width_for_cores(cores: usize) -> usize {
    (cores.max(1) + IO_HEADROOM).min(MAX_POOL_WIDTH)
}

/// Default width for this machine (cached).
pub fn io_pool_width() -> usize {
    *DEFAULT_WIDTH.get_or_init(|| pool_width_for_cores(num_cpus::get()))
}

/// Width for one run: explicit override, then `HEIC_PNG_WORKERS`, then the default.
///
/// Never returns zero.
pub fn resolve_pool_width(requested: Option<usize>) -> usize {
    if let Some(n) = requested {
        return n.max(1);
    }

    match std::env::var(POOL_WIDTH_ENV) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::warn!(
                    var = POOL_WIDTH_ENV,
                    value = %raw,
                    "Ignoring invalid worker count override"
                );
                io_pool_width()
            }
        },
        Err(_) => io_pool_width(),
    }
}
