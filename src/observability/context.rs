//! Diagnostic context carried through log lines and timeline entries.
//!
//! A [`DiagnosticContext`] attaches correlation fields — which target, which
//! socket, which build round — to a log line or a [`super::timeline`] entry,
//! the same way the rest of this codebase threads a context value through
//! rather than relying on ambient thread-local state for anything other than
//! developer convenience.

use std::collections::BTreeMap;
use std::fmt;

/// A diagnostic context: correlation identifiers plus free-form fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticContext {
    target: Option<String>,
    socket_id: Option<u64>,
    build_round: Option<u64>,
    custom: BTreeMap<String, String>,
}

impl DiagnosticContext {
    /// Creates an empty diagnostic context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a target name.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attaches a WebSocket session id.
    #[must_use]
    pub const fn with_socket_id(mut self, id: u64) -> Self {
        self.socket_id = Some(id);
        self
    }

    /// Attaches a build round counter.
    #[must_use]
    pub const fn with_build_round(mut self, round: u64) -> Self {
        self.build_round = Some(round);
        self
    }

    /// Attaches an arbitrary key/value field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// Returns the target name, if set.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Returns the socket id, if set.
    #[must_use]
    pub const fn socket_id(&self) -> Option<u64> {
        self.socket_id
    }

    /// Returns the build round, if set.
    #[must_use]
    pub const fn build_round(&self) -> Option<u64> {
        self.build_round
    }
}

impl fmt::Display for DiagnosticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        let mut sep = |f: &mut fmt::Formatter<'_>, wrote: &mut bool| -> fmt::Result {
            if *wrote {
                write!(f, " ")?;
            }
            *wrote = true;
            Ok(())
        };
        if let Some(target) = &self.target {
            sep(f, &mut wrote)?;
            write!(f, "target={target}")?;
        }
        if let Some(id) = self.socket_id {
            sep(f, &mut wrote)?;
            write!(f, "socket={id}")?;
        }
        if let Some(round) = self.build_round {
            sep(f, &mut wrote)?;
            write!(f, "round={round}")?;
        }
        for (k, v) in &self.custom {
            sep(f, &mut wrote)?;
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_set_fields_only() {
        let ctx = DiagnosticContext::new().with_target("Main");
        assert_eq!(ctx.to_string(), "target=Main");
    }

    #[test]
    fn display_combines_fields_in_order() {
        let ctx = DiagnosticContext::new()
            .with_target("Main")
            .with_socket_id(7)
            .with_build_round(3);
        assert_eq!(ctx.to_string(), "target=Main socket=7 round=3");
    }

    #[test]
    fn custom_fields_are_sorted_by_key() {
        let ctx = DiagnosticContext::new()
            .with_field("z", "1")
            .with_field("a", "2");
        assert_eq!(ctx.to_string(), "a=2 z=1");
    }

    #[test]
    fn accessors_round_trip() {
        let ctx = DiagnosticContext::new()
            .with_target("Main")
            .with_socket_id(42);
        assert_eq!(ctx.target(), Some("Main"));
        assert_eq!(ctx.socket_id(), Some(42));
        assert_eq!(ctx.build_round(), None);
    }
}
