//! Structured-logging shim.
//!
//! When the `tracing-integration` feature is enabled these macros forward to
//! the `tracing` crate, including its `key = value` structured-field syntax.
//! When the feature is disabled they fall back to a minimal stderr writer
//! that only understands the trailing message literal (structured fields are
//! dropped) — the same two-tier shape the teacher codebase uses for its own
//! optional `tracing` dependency, just without field capture in the
//! degraded path.

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
pub use fallback::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
pub mod fallback {
    /// Strips a leading run of `ident = expr,` structured fields, keeping
    /// only the final message literal, then prints it with a level prefix.
    #[macro_export]
    macro_rules! __log_fallback {
        ($level:literal, $msg:literal $(, $($rest:tt)*)?) => {
            eprintln!(concat!("[{}] ", $msg), $level);
        };
        ($level:literal, $($field:ident = $value:expr),+ , $msg:literal $(, $($rest:tt)*)?) => {
            eprintln!(concat!("[{}] ", $msg), $level);
        };
    }

    /// `trace!` fallback (message-only; structured fields are dropped).
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => { $crate::__log_fallback!("TRACE", $($arg)*) };
    }
    /// `debug!` fallback (message-only; structured fields are dropped).
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => { $crate::__log_fallback!("DEBUG", $($arg)*) };
    }
    /// `info!` fallback (message-only; structured fields are dropped).
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => { $crate::__log_fallback!("INFO", $($arg)*) };
    }
    /// `warn!` fallback (message-only; structured fields are dropped).
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => { $crate::__log_fallback!("WARN", $($arg)*) };
    }
    /// `error!` fallback (message-only; structured fields are dropped).
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => { $crate::__log_fallback!("ERROR", $($arg)*) };
    }

    pub use crate::{__log_fallback, debug, error, info, trace, warn};
}
