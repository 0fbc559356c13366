//! WebSocketHub: the HTTP+WebSocket server browsers connect to (§4.8).

pub mod frame;
pub mod hub;
pub mod protocol;
pub mod session;

pub use hub::{Hub, PortOrigin, TargetRoster};
pub use protocol::{ClientMessage, ServerMessage, Status};
pub use session::{SocketId, WebSocketSession};
