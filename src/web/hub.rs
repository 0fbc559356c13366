//! The HTTP+WebSocket server browsers connect to (§4.8).
//!
//! One thread accepts connections; each connection gets its own thread pair
//! (reader + writer) for the lifetime of the socket. All scheduling-relevant
//! traffic is converted to [`Event`](crate::scheduler::event::Event) and
//! handed to the scheduler over `events_tx` — the hub itself never touches
//! `TargetState`.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use base64::Engine as _;
use sha1::{Digest, Sha1};

use crate::error::{Error, ErrorKind, Result};
use crate::scheduler::event::Event;
use crate::tracing_compat::{info, warn};
use crate::web::frame::{self, Opcode};
use crate::web::protocol::{parse_connect_url, ClientMessage, ConnectError, ServerMessage, Status};
use crate::web::session::{SocketId, WebSocketSession};

/// This build's own version string, compared against the browser's
/// advertised `elmWatchVersion` at connect time.
pub const ELM_WATCH_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_EDITOR_TIMEOUT: Duration = Duration::from_secs(5);

/// Static identity of a project's targets, as known at hub construction
/// time: every declared target, and which of those are currently enabled
/// (matched by the CLI's target-name filter, or all of them when no filter
/// was given).
#[derive(Debug, Clone)]
pub struct TargetRoster {
    /// All declared target names, in declaration order.
    pub all: Vec<String>,
    /// The subset currently eligible to build.
    pub enabled: HashSet<String>,
}

impl TargetRoster {
    fn disabled(&self) -> Vec<String> {
        self.all.iter().filter(|t| !self.enabled.contains(*t)).cloned().collect()
    }
}

/// How the hub bound its listening socket (§4.8 port-selection policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOrigin {
    /// Reused the port recorded in persisted state.
    Persisted,
    /// Used the port named in `elm-watch.json`.
    FromConfig,
    /// Asked the OS for an arbitrary free port.
    Arbitrary,
}

/// Binds a listening socket following the port-selection policy:
/// persisted port, then configured port, then an OS-assigned one, each
/// tier mapping its own bind failure to a distinct, named error.
///
/// # Errors
///
/// Returns `PortConflictForPersistedPort`, `PortConflictForPortFromConfig`,
/// or `PortConflictForNoPort` depending on which tier was attempted.
pub fn bind_listener(
    persisted_port: Option<u16>,
    configured_port: Option<u16>,
) -> Result<(TcpListener, u16, PortOrigin)> {
    if let Some(port) = persisted_port {
        return bind_exact(port)
            .map(|listener| (listener, port, PortOrigin::Persisted))
            .map_err(|e| {
                Error::new(ErrorKind::PortConflictForPersistedPort)
                    .with_context(format!("port {port} from persisted state: {e}"))
            });
    }
    if let Some(port) = configured_port {
        return bind_exact(port)
            .map(|listener| (listener, port, PortOrigin::FromConfig))
            .map_err(|e| {
                Error::new(ErrorKind::PortConflictForPortFromConfig)
                    .with_context(format!("port {port} from configuration: {e}"))
            });
    }
    let listener = bind_exact(0).map_err(|e| {
        Error::new(ErrorKind::PortConflictForNoPort)
            .with_context(format!("could not obtain a port from the OS: {e}"))
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::new(ErrorKind::PortConflictForNoPort).with_context(e.to_string()))?
        .port();
    Ok((listener, port, PortOrigin::Arbitrary))
}

fn bind_exact(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(("127.0.0.1", port))
}

type Sessions = Arc<Mutex<HashMap<SocketId, Arc<WebSocketSession>>>>;

/// The running WebSocketHub: owns the listening socket and every connected
/// session.
pub struct Hub {
    listener: TcpListener,
    port: u16,
    roster: TargetRoster,
    events_tx: Sender<Event>,
    sessions: Sessions,
    next_socket_id: AtomicU64,
}

impl Hub {
    /// Binds per the port-selection policy and constructs a hub ready to
    /// [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Propagates [`bind_listener`]'s errors.
    pub fn new(
        persisted_port: Option<u16>,
        configured_port: Option<u16>,
        roster: TargetRoster,
        events_tx: Sender<Event>,
    ) -> Result<Self> {
        let (listener, port, origin) = bind_listener(persisted_port, configured_port)?;
        info!(port = port, origin = ?origin, "websocket hub listening");
        Ok(Self { listener, port, roster, events_tx, sessions: Arc::default(), next_socket_id: AtomicU64::new(1) })
    }

    /// The bound port, to be persisted by the caller.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Sends `message` to every session currently attached to `target`.
    pub fn broadcast(&self, target: &str, message: &ServerMessage) {
        let sessions = self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for session in sessions.values().filter(|s| s.target_name == target) {
            session.send(message.clone());
        }
    }

    /// Accepts connections until the listener is closed (by dropping the
    /// hub from another thread) or an unrecoverable accept error occurs.
    ///
    /// Each connection is handled on its own spawned thread; this call
    /// does not return until the listener itself errors out.
    pub fn run(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let roster = self.roster.clone();
                    let events_tx = self.events_tx.clone();
                    let sessions = Arc::clone(&self.sessions);
                    let socket_id = self.next_socket_id.fetch_add(1, Ordering::Relaxed);
                    thread::spawn(move || {
                        handle_connection(stream, socket_id, &roster, &events_tx, &sessions);
                    });
                }
                Err(e) => {
                    warn!(error = %e, "websocket hub accept loop stopped");
                    break;
                }
            }
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    socket_id: SocketId,
    roster: &TargetRoster,
    events_tx: &Sender<Event>,
    sessions: &Sessions,
) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(clone) => clone,
        Err(_) => return,
    });

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() || request_line.is_empty() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else { return };
    let headers = read_headers(&mut reader);

    if method != "GET" {
        let _ = write_http_response(&mut stream, 405, "text/plain", b"Method Not Allowed");
        return;
    }

    if !is_websocket_upgrade(&headers) {
        serve_self_certify_page(&mut stream, path, &headers);
        return;
    }

    let Some(key) = header_value(&headers, "sec-websocket-key") else {
        let _ = write_http_response(&mut stream, 400, "text/plain", b"missing Sec-WebSocket-Key");
        return;
    };
    if header_value(&headers, "sec-websocket-version") != Some("13") {
        let _ = write_http_response(&mut stream, 400, "text/plain", b"unsupported websocket version");
        return;
    }

    if complete_handshake(&mut stream, key).is_err() {
        return;
    }

    let rejection = parse_connect_url(path)
        .map_err(ServerMessage::from)
        .and_then(|params| {
            if params.elm_watch_version != ELM_WATCH_VERSION {
                return Err(ServerMessage::VersionMismatch {
                    server_version: ELM_WATCH_VERSION.to_string(),
                    client_version: params.elm_watch_version,
                });
            }
            if !roster.all.contains(&params.target_name) {
                return Err(ServerMessage::TargetNotFound {
                    enabled: roster.enabled.iter().cloned().collect(),
                    disabled: roster.disabled(),
                });
            }
            if !roster.enabled.contains(&params.target_name) {
                return Err(ServerMessage::TargetDisabled);
            }
            Ok(params)
        });

    let params = match rejection {
        Ok(params) => params,
        Err(message) => {
            let _ = push_and_close(&mut stream, &message);
            return;
        }
    };

    let (outbox_tx, outbox_rx) = mpsc::channel();
    let session = Arc::new(WebSocketSession {
        id: socket_id,
        target_name: params.target_name.clone(),
        elm_watch_version: params.elm_watch_version.clone(),
        elm_compiled_timestamp: params.elm_compiled_timestamp,
        connected_at: std::time::Instant::now(),
        outbox: outbox_tx,
    });
    sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(socket_id, Arc::clone(&session));
    let _ = events_tx.send(Event::SessionConnected { target: params.target_name.clone(), socket_id });

    let mut writer_stream = match stream.try_clone() {
        Ok(clone) => clone,
        Err(_) => {
            sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&socket_id);
            return;
        }
    };
    let writer = thread::spawn(move || {
        for message in outbox_rx {
            let Ok(json) = serde_json::to_vec(&message) else { continue };
            if frame::write_text(&mut writer_stream, &json).is_err() {
                break;
            }
        }
    });

    read_loop(&mut stream, &session, events_tx);

    sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&socket_id);
    let _ = events_tx.send(Event::SessionDisconnected { target: params.target_name, socket_id });
    drop(session);
    let _ = writer.join();
}

fn read_loop(stream: &mut TcpStream, session: &WebSocketSession, events_tx: &Sender<Event>) {
    loop {
        let frame = match frame::read_frame(stream) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        match frame.opcode {
            Opcode::Close => {
                let _ = frame::write_close(stream);
                return;
            }
            Opcode::Ping => {
                if frame::write_pong(stream, &frame.payload).is_err() {
                    return;
                }
            }
            Opcode::Pong => {}
            Opcode::Text => {
                dispatch_client_message(&frame.payload, session, events_tx);
            }
        }
    }
}

fn dispatch_client_message(payload: &[u8], session: &WebSocketSession, events_tx: &Sender<Event>) {
    let target = session.target_name.clone();
    match serde_json::from_slice::<ClientMessage>(payload) {
        Ok(ClientMessage::ChangedCompilationMode { compilation_mode }) => {
            let _ = events_tx.send(Event::ChangedCompilationMode { target, mode: compilation_mode });
        }
        Ok(ClientMessage::ChangedBrowserUiPosition { browser_ui_position }) => {
            let _ = events_tx.send(Event::ChangedBrowserUiPosition { target, position: browser_ui_position });
        }
        Ok(ClientMessage::ChangedOpenErrorOverlay { open_error_overlay }) => {
            let _ = events_tx.send(Event::ChangedOpenErrorOverlay { target, open: open_error_overlay });
        }
        Ok(ClientMessage::FocusedTab) => {
            let _ = events_tx.send(Event::FocusedTab { target });
        }
        Ok(ClientMessage::PressedOpenEditor { file, line, column }) => {
            if let Err(error) = run_open_editor(&file, line, column) {
                session.send(ServerMessage::OpenEditorFailed { error });
            }
        }
        Err(_) => {
            session.send(ServerMessage::ClientErrorUnrecognisedTag {
                message: format!("unrecognised message; allowed tags: {}", ClientMessage::ALLOWED_TAGS.join(", ")),
            });
        }
    }
}

/// Runs the configured editor-open command (`ELM_WATCH_OPEN_EDITOR`) with
/// `file`/`line`/`column` exposed as environment variables, killing it if it
/// outlives the configured timeout.
fn run_open_editor(file: &str, line: u32, column: u32) -> std::result::Result<(), String> {
    let Ok(command) = std::env::var("ELM_WATCH_OPEN_EDITOR") else {
        return Err("ELM_WATCH_OPEN_EDITOR is not set".to_string());
    };
    let timeout = std::env::var("__ELM_WATCH_OPEN_EDITOR_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map_or(DEFAULT_EDITOR_TIMEOUT, Duration::from_millis);

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .env("file", file)
        .env("line", line.to_string())
        .env("column", column.to_string())
        .spawn()
        .map_err(|e| format!("failed to spawn editor command: {e}"))?;

    let deadline = std::time::Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return if status.success() {
                    Ok(())
                } else {
                    Err(format!("editor command exited with {status}"))
                };
            }
            Ok(None) => {
                if std::time::Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err("editor command timed out".to_string());
                }
                thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(format!("failed to wait on editor command: {e}")),
        }
    }
}

fn push_and_close(stream: &mut TcpStream, message: &ServerMessage) -> std::io::Result<()> {
    let json = serde_json::to_vec(message).unwrap_or_default();
    frame::write_text(stream, &json)?;
    frame::write_close(stream)
}

impl From<ConnectError> for ServerMessage {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::UrlMismatch => ServerMessage::UrlMismatch { path: String::new() },
            ConnectError::ParamsDecode(message) => ServerMessage::ParamsDecodeError { message },
        }
    }
}

fn complete_handshake(stream: &mut TcpStream, client_key: &str) -> std::io::Result<()> {
    let accept = websocket_accept_key(client_key.trim());
    write!(
        stream,
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )?;
    stream.flush()
}

fn websocket_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

fn is_websocket_upgrade(headers: &[(String, String)]) -> bool {
    let upgrade = header_value(headers, "upgrade").unwrap_or_default();
    let connection = header_value(headers, "connection").unwrap_or_default();
    upgrade.eq_ignore_ascii_case("websocket")
        && connection.split(',').any(|part| part.trim().eq_ignore_ascii_case("upgrade"))
}

fn read_headers(reader: &mut BufReader<TcpStream>) -> Vec<(String, String)> {
    let mut headers = Vec::with_capacity(16);
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if trimmed.is_empty() {
                    break;
                }
                if let Some((key, value)) = trimmed.split_once(':') {
                    headers.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
                }
            }
        }
    }
    headers
}

fn header_value<'a>(headers: &'a [(String, String)], key: &str) -> Option<&'a str> {
    headers.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// Serves the self-certify HTML page: never exposes arbitrary file
/// content, but the body echoes back `referer`, `host`, and the requested
/// path so a user can confirm they reached the right dev server before
/// trusting its TLS certificate.
fn serve_self_certify_page(stream: &mut TcpStream, path: &str, headers: &[(String, String)]) {
    let host = header_value(headers, "host").unwrap_or("unknown host");
    let referer = header_value(headers, "referer").unwrap_or("(no referer)");
    let body = format!(
        "<!doctype html>\n\
         <html><head><meta charset=\"utf-8\"><title>elm-watch</title></head>\n\
         <body style=\"font-family: sans-serif\">\n\
         <h1>elm-watch dev server</h1>\n\
         <p>You have reached the elm-watch WebSocket server for <code>{host}</code>.</p>\n\
         <p>Requested path: <code>{path}</code></p>\n\
         <p>Referer: <code>{referer}</code></p>\n\
         <p>If your browser warns about this page's certificate, and you expected to see this \
         page, it is safe to proceed.</p>\n\
         </body></html>\n"
    );
    let _ = write_http_response(stream, 200, "text/html; charset=utf-8", body.as_bytes());
}

fn write_http_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Unknown",
    };
    write!(
        stream,
        "HTTP/1.1 {status} {status_text}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        body.len(),
    )?;
    stream.write_all(body)?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_listener_with_no_preferences_asks_os_for_a_port() {
        let (_listener, port, origin) = bind_listener(None, None).unwrap();
        assert!(port > 0);
        assert_eq!(origin, PortOrigin::Arbitrary);
    }

    #[test]
    fn bind_listener_uses_configured_port_when_no_persisted_one() {
        let probe = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let free_port = probe.local_addr().unwrap().port();
        drop(probe);
        let (_listener, port, origin) = bind_listener(None, Some(free_port)).unwrap();
        assert_eq!(port, free_port);
        assert_eq!(origin, PortOrigin::FromConfig);
    }

    #[test]
    fn bind_listener_reports_persisted_conflict() {
        let held = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let busy_port = held.local_addr().unwrap().port();
        let err = bind_listener(Some(busy_port), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PortConflictForPersistedPort);
    }

    #[test]
    fn target_roster_computes_disabled_set() {
        let roster = TargetRoster {
            all: vec!["Main".to_string(), "Admin".to_string()],
            enabled: HashSet::from(["Main".to_string()]),
        };
        assert_eq!(roster.disabled(), vec!["Admin".to_string()]);
    }

    #[test]
    fn connect_error_maps_to_server_message() {
        let message: ServerMessage = ConnectError::UrlMismatch.into();
        assert!(matches!(message, ServerMessage::UrlMismatch { .. }));
    }
}
