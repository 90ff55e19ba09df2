//! Diagnostic logging switch.
//!
//! Lifecycle events (connect, disconnect, reconnect attempts, bind conflicts)
//! are always emitted through `tracing`. Chatty diagnostics, such as skipped
//! reconnect triggers or duplicate `start()` calls, only go out when verbose
//! logging is enabled. Disabled by default.
//!
//! ```ignore
//! ws_keeper::logging::set_verbose(true);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Enables or disables verbose diagnostic traces process-wide.
pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

/// Returns `true` if verbose diagnostic traces are enabled.
#[inline]
#[must_use]
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Emits a `tracing::debug!` event only when verbose logging is enabled.
macro_rules! verbose {
    ($($arg:tt)*) => {
        if $crate::logging::is_verbose() {
            ::tracing::debug!($($arg)*);
        }
    };
}

pub(crate) use verbose;
