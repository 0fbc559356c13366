//! Signal handling: one owner, translated into cooperative shutdown.
//!
//! Per §9's "global installed-once signal handlers" redesign note: exactly
//! one component ([`crate::scheduler::Scheduler`]) installs the OS signal
//! handler, and every other component only ever observes the resulting
//! [`ShutdownRequested`] event flowing through the ordinary event queue. No
//! other module touches `signal_hook` directly.

pub mod kind;

pub use kind::SignalKind;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A flag flipped exactly once, the first time SIGINT or SIGTERM arrives.
///
/// Cloning shares the same underlying flag; this is the handle passed to the
/// scheduler's event loop so it can poll for shutdown between work items
/// without blocking inside the signal handler itself.
#[derive(Clone, Default)]
pub struct ShutdownRequested(Arc<AtomicBool>);

impl ShutdownRequested {
    /// Creates a new, not-yet-requested flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether shutdown has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Marks shutdown as requested.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Installs SIGINT/SIGTERM handlers that flip a [`ShutdownRequested`] flag.
///
/// # Errors
///
/// Returns an error if the underlying OS signal registration fails (e.g. the
/// handler slot for that signal is already taken by another registration in
/// the same process).
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn install() -> std::io::Result<ShutdownRequested> {
    let flag = ShutdownRequested::new();
    let registered = flag.clone();
    // SIGINT and SIGTERM share one flag: the scheduler treats both as "stop
    // cooperatively", it never distinguishes which one arrived.
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        let r = registered.clone();
        // SAFETY-free: signal_hook's `register` only allows async-signal-safe
        // closures that set an atomic, which is exactly what we do here.
        unsafe {
            signal_hook::low_level::register(sig, move || r.set())?;
        }
    }
    Ok(flag)
}

/// Non-Unix fallback: shutdown is only ever requested by in-process callers
/// (there is no SIGINT/SIGTERM to subscribe to on these targets).
#[cfg(not(unix))]
pub fn install() -> std::io::Result<ShutdownRequested> {
    Ok(ShutdownRequested::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset() {
        let flag = ShutdownRequested::new();
        assert!(!flag.is_set());
    }

    #[test]
    fn set_is_visible_through_clones() {
        let flag = ShutdownRequested::new();
        let clone = flag.clone();
        clone.set();
        assert!(flag.is_set());
    }
}
