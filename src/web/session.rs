//! A single connected browser tab (§3 WebSocketSession).

use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use crate::web::protocol::ServerMessage;

/// Monotonically increasing identifiers handed out by [`SessionRegistry`].
pub type SocketId = u64;

/// One browser tab's connection to the hub.
///
/// Each session owns the writer half of its socket via `outbox`: the
/// connection's write loop drains this channel and pushes frames, so any
/// other thread can queue a message for this tab without touching the
/// socket directly.
pub struct WebSocketSession {
    /// Identifies this session among all currently connected ones.
    pub id: SocketId,
    /// The target this session's compiled page belongs to.
    pub target_name: String,
    /// The elm-watch client version the browser reported at connect time.
    pub elm_watch_version: String,
    /// The timestamp the browser's currently running code was compiled at.
    pub elm_compiled_timestamp: u64,
    /// When this session connected, for idle diagnostics.
    pub connected_at: Instant,
    /// Queue of messages waiting to be written to this tab's socket.
    pub outbox: Sender<ServerMessage>,
}

impl WebSocketSession {
    /// Queues `message` for delivery; silently drops it if the connection's
    /// write loop has already exited (the receiver was dropped).
    pub fn send(&self, message: ServerMessage) {
        let _ = self.outbox.send(message);
    }

    /// How long this session has been connected.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn send_after_receiver_dropped_does_not_panic() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let session = WebSocketSession {
            id: 1,
            target_name: "Main".to_string(),
            elm_watch_version: "1.0.0".to_string(),
            elm_compiled_timestamp: 0,
            connected_at: Instant::now(),
            outbox: tx,
        };
        session.send(ServerMessage::SuccessfullyCompiledButRecordFieldsChanged);
    }

    #[test]
    fn send_delivers_to_outbox() {
        let (tx, rx) = mpsc::channel();
        let session = WebSocketSession {
            id: 7,
            target_name: "Main".to_string(),
            elm_watch_version: "1.0.0".to_string(),
            elm_compiled_timestamp: 0,
            connected_at: Instant::now(),
            outbox: tx,
        };
        session.send(ServerMessage::TargetDisabled);
        assert!(matches!(rx.recv().unwrap(), ServerMessage::TargetDisabled));
    }
}
