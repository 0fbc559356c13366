//! The single typed event queue into the Scheduler (§9 "Per-component
//! ad-hoc event emitters" design note): every upstream source converts its
//! native events into one variant of [`Event`] before it reaches the
//! scheduler.

use std::path::PathBuf;

use crate::persisted_state::{BrowserUiPosition, CompilationMode};
use crate::watcher::ChangeKind;

/// Every kind of input the scheduler's event loop reacts to.
#[derive(Debug, Clone)]
pub enum Event {
    /// A (debounced, coalesced) filesystem change.
    FileChanged {
        /// What kind of change happened.
        kind: ChangeKind,
        /// The affected path.
        path: PathBuf,
    },
    /// The configuration file changed and was reloaded.
    ConfigReloaded,
    /// The compiler project file changed; reinstall dependencies everywhere.
    ProjectFileChanged,
    /// A browser session connected for `target`.
    SessionConnected {
        /// The target the session is for.
        target: String,
        /// The socket id assigned to the session.
        socket_id: u64,
    },
    /// A browser session disconnected.
    SessionDisconnected {
        /// The target the session was for.
        target: String,
        /// The socket id that disconnected.
        socket_id: u64,
    },
    /// The browser requested a different compilation mode.
    ChangedCompilationMode {
        /// The target the request concerns.
        target: String,
        /// The requested mode.
        mode: CompilationMode,
    },
    /// The browser moved its floating UI.
    ChangedBrowserUiPosition {
        /// The target the request concerns.
        target: String,
        /// The new position.
        position: BrowserUiPosition,
    },
    /// The browser toggled the error overlay.
    ChangedOpenErrorOverlay {
        /// The target the request concerns.
        target: String,
        /// Whether the overlay should be open.
        open: bool,
    },
    /// The browser's tab gained focus.
    FocusedTab {
        /// The target the focused tab belongs to.
        target: String,
    },
    /// Cooperative shutdown was requested (SIGINT/SIGTERM).
    ShutdownRequested,
}

impl Event {
    /// The target this event concerns, if any (some events are global).
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::SessionConnected { target, .. }
            | Self::SessionDisconnected { target, .. }
            | Self::ChangedCompilationMode { target, .. }
            | Self::ChangedBrowserUiPosition { target, .. }
            | Self::ChangedOpenErrorOverlay { target, .. }
            | Self::FocusedTab { target } => Some(target),
            Self::FileChanged { .. }
            | Self::ConfigReloaded
            | Self::ProjectFileChanged
            | Self::ShutdownRequested => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_scoped_events_expose_their_target() {
        let event = Event::FocusedTab { target: "Main".to_string() };
        assert_eq!(event.target(), Some("Main"));
    }

    #[test]
    fn global_events_have_no_target() {
        assert_eq!(Event::ConfigReloaded.target(), None);
        assert_eq!(Event::ShutdownRequested.target(), None);
    }
}
