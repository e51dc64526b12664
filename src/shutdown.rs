//! Cooperative cancellation.
//! A `CancelToken` is a shared one-way "stop" flag. Signal handlers and the
//! session call `cancel()`; grouping, packing, the rename chunk loop and every
//! pool worker poll `is_cancelled()` before starting new work.
//!
//! Notes:
//! - Relaxed atomics are sufficient for a one-way flag.
//! - `cancel()` is safe to call from a signal handler thread.
//! - Each session operation re-arms the token on exit, never on entry, so a
//!   Ctrl-C that lands before the operation starts still stops it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation (idempotent).
    #[inline]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Clear a previous request.
    #[inline]
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }

    /// Guard that re-arms the token when the current operation ends, so a
    /// request made before or during it is honoured and then consumed.
    pub fn rearm_on_exit(&self) -> RearmOnExit<'_> {
        RearmOnExit(self)
    }
}

#[must_use = "the token is re-armed when the guard drops"]
pub struct RearmOnExit<'a>(&'a CancelToken);

impl Drop for RearmOnExit<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}
