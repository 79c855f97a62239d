//! Cancellation of long-running operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token checked at every suspension point.
///
/// Every long operation in the registry, cache, selection, and loading
/// stack accepts one. Once set, in-flight work stops at its next check
/// and fails with its crate's `Cancelled` error, which callers receive
/// verbatim.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
