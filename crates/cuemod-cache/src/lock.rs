//! Per-key advisory file locking.
//!
//! Serialises cache builds for one (path, version) key across processes.
//! Acquisition polls with exponential backoff; the interval is bounded by a
//! ceiling and the whole wait by a timeout.

use std::fs::OpenOptions;
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::{CacheError, CancelToken, Result};

/// Backoff starts here and doubles per attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// The backoff interval never exceeds this ceiling.
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Run `f` while holding an exclusive advisory lock on `path`.
///
/// If a competing process holds the lock, blocks with exponential backoff
/// up to `timeout`, then fails with [`CacheError::LockTimeout`]; a
/// cancellation observed while waiting fails with [`CacheError::Cancelled`]
/// instead. The caller re-checks for a materialised artifact after
/// acquisition rather than redoing work a competitor already finished.
pub(crate) fn with_file_lock<T>(
    path: &Path,
    timeout: Duration,
    cancel: &CancelToken,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;

    let start = Instant::now();
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        match file.try_lock_exclusive() {
            Ok(()) => break,
            Err(_) if start.elapsed() < timeout => {
                debug!(lock = %path.display(), ?backoff, "waiting for cache lock");
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(_) => {
                return Err(CacheError::LockTimeout {
                    path: path.to_path_buf(),
                })
            }
        }
    }

    let result = f();
    let _ = fs2::FileExt::unlock(&file);
    result
}
