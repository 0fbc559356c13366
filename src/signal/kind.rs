//! Signal kind enumeration for the signals this orchestrator reacts to.
//!
//! `Interrupt`/`Terminate` drive cooperative shutdown of the scheduler.
//! `Child` is named for completeness of the POSIX signal set this process
//! cares about, though [`crate::compiler`] and [`crate::postprocess`] reap
//! their children with a blocking `wait()` on a dedicated thread rather than
//! a SIGCHLD handler.

/// Unix signals the orchestrator cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SignalKind {
    /// SIGINT — Interrupt from keyboard (Ctrl+C).
    Interrupt,
    /// SIGTERM — Termination signal.
    Terminate,
    /// SIGCHLD — Child stopped or terminated.
    Child,
}

impl SignalKind {
    /// Returns the signal number on Unix platforms.
    #[cfg(unix)]
    #[must_use]
    pub const fn as_raw_value(self) -> i32 {
        match self {
            Self::Interrupt => 2,  // SIGINT
            Self::Terminate => 15, // SIGTERM
            Self::Child => 17,     // SIGCHLD
        }
    }

    /// Returns the name of the signal.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Child => "SIGCHLD",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_posix_conventions() {
        assert_eq!(SignalKind::Interrupt.name(), "SIGINT");
        assert_eq!(SignalKind::Terminate.name(), "SIGTERM");
        assert_eq!(SignalKind::Child.name(), "SIGCHLD");
    }

    #[test]
    fn display_uses_name() {
        assert_eq!(SignalKind::Interrupt.to_string(), "SIGINT");
    }

    #[cfg(unix)]
    #[test]
    fn raw_values_match_posix() {
        assert_eq!(SignalKind::Interrupt.as_raw_value(), 2);
        assert_eq!(SignalKind::Terminate.as_raw_value(), 15);
        assert_eq!(SignalKind::Child.as_raw_value(), 17);
    }
}
