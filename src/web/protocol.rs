//! The WebSocket wire protocol (§4.8): every accepted tag in both
//! directions, plus the `/?...` query-parameter parsing used during upgrade.

use serde::{Deserialize, Serialize};

use crate::compiler::report::CompilerReport;
use crate::persisted_state::{BrowserUiPosition, CompilationMode};

/// Server → client status payload (§4.8).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "tag")]
pub enum Status {
    /// A build started for this target.
    Busy,
    /// The target was already up to date; nothing to do.
    AlreadyUpToDate,
    /// The compiler reported problems.
    CompileError {
        /// The decoded compiler diagnostic, if it parsed as JSON.
        diagnostic: Option<CompilerReport>,
    },
    /// A client-side error happened rendering the previous message.
    ClientError {
        /// Human-readable description.
        message: String,
    },
    /// The browser should perform a full page reload.
    Reload,
}

/// Every message the hub sends to a connected browser (§4.8).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "tag")]
pub enum ServerMessage {
    /// A status transition for the connected target.
    StatusChanged {
        /// The new status.
        status: Status,
    },
    /// A full compile finished; the artifact is attached for the browser's
    /// hot-patch runtime to apply.
    SuccessfullyCompiled {
        /// The compiled (and hot-runtime-injected) JavaScript.
        code: String,
        /// The timestamp the browser should record as "currently running".
        #[serde(rename = "elmCompiledTimestamp")]
        elm_compiled_timestamp: u64,
        /// The compilation mode used.
        #[serde(rename = "compilationMode")]
        compilation_mode: CompilationMode,
        /// The UI position to restore.
        #[serde(rename = "browserUiPosition")]
        browser_ui_position: BrowserUiPosition,
    },
    /// Hot-patching would corrupt internal record representations; the
    /// browser must perform a full reload instead.
    SuccessfullyCompiledButRecordFieldsChanged,
    /// The configured editor-open command failed.
    OpenEditorFailed {
        /// Human-readable description of the failure.
        error: String,
    },
    /// The connecting URL's path didn't start with `/?`.
    UrlMismatch {
        /// The rejected path, for diagnostics.
        path: String,
    },
    /// The URL's query parameters failed to decode.
    ParamsDecodeError {
        /// Human-readable description of the failure.
        message: String,
    },
    /// The browser's elm-watch version doesn't match the server's.
    VersionMismatch {
        /// The version the server is running.
        #[serde(rename = "serverVersion")]
        server_version: String,
        /// The version the browser advertised.
        #[serde(rename = "clientVersion")]
        client_version: String,
    },
    /// The connecting browser named a target that doesn't exist.
    TargetNotFound {
        /// Targets currently enabled.
        enabled: Vec<String>,
        /// Targets known but disabled (not matched by the CLI's target filter).
        disabled: Vec<String>,
    },
    /// The connecting browser named a target that exists but is disabled.
    TargetDisabled,
    /// Catch-all for a client message using a tag the server doesn't
    /// recognise.
    ClientErrorUnrecognisedTag {
        /// Human-readable description listing the allowed tags.
        message: String,
    },
}

/// Every message a connected browser may send to the hub (§4.8: "exact
/// accepted tags and no others").
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "tag")]
pub enum ClientMessage {
    /// Request a different compilation mode, persisted and triggering a
    /// recompile.
    ChangedCompilationMode {
        /// The requested mode.
        #[serde(rename = "compilationMode")]
        compilation_mode: CompilationMode,
    },
    /// The floating UI moved to a new corner; persisted only.
    ChangedBrowserUiPosition {
        /// The new position.
        #[serde(rename = "browserUiPosition")]
        browser_ui_position: BrowserUiPosition,
    },
    /// The error overlay was opened or closed; persisted only.
    ChangedOpenErrorOverlay {
        /// Whether the overlay should be open.
        #[serde(rename = "openErrorOverlay")]
        open_error_overlay: bool,
    },
    /// This tab gained focus; raises scheduling priority for its target.
    FocusedTab,
    /// Run the configured editor-open command.
    PressedOpenEditor {
        /// The file to open.
        file: String,
        /// 1-based line number.
        line: u32,
        /// 1-based column number.
        column: u32,
    },
}

impl ClientMessage {
    /// The exact set of tags this hub accepts, for building the
    /// `ClientErrorUnrecognisedTag` message.
    pub const ALLOWED_TAGS: &'static [&'static str] = &[
        "ChangedCompilationMode",
        "ChangedBrowserUiPosition",
        "ChangedOpenErrorOverlay",
        "FocusedTab",
        "PressedOpenEditor",
    ];
}

/// The decoded `/?elmWatchVersion=...&targetName=...&elmCompiledTimestamp=...`
/// query parameters presented at WebSocket upgrade time (§4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// The browser's elm-watch client version.
    pub elm_watch_version: String,
    /// The target the browser's compiled page belongs to.
    pub target_name: String,
    /// The timestamp recorded when the browser's current code was compiled.
    pub elm_compiled_timestamp: u64,
}

/// Parses the connecting URL's path and query string.
///
/// # Errors
///
/// Returns `Err("url-mismatch")` if `path` doesn't start with `/?`, or
/// `Err("params-decode-error: <reason>")` if the query string is missing a
/// required key or a value fails to parse.
pub fn parse_connect_url(path: &str) -> Result<ConnectParams, ConnectError> {
    let query = path.strip_prefix("/?").ok_or(ConnectError::UrlMismatch)?;

    let mut elm_watch_version = None;
    let mut target_name = None;
    let mut elm_compiled_timestamp = None;

    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ConnectError::ParamsDecode(format!("malformed pair: {pair:?}")))?;
        let value = percent_decode(value);
        match key {
            "elmWatchVersion" => elm_watch_version = Some(value),
            "targetName" => target_name = Some(value),
            "elmCompiledTimestamp" => {
                elm_compiled_timestamp = Some(value.parse::<u64>().map_err(|e| {
                    ConnectError::ParamsDecode(format!("elmCompiledTimestamp: {e}"))
                })?);
            }
            _ => {}
        }
    }

    Ok(ConnectParams {
        elm_watch_version: elm_watch_version
            .ok_or_else(|| ConnectError::ParamsDecode("missing elmWatchVersion".to_string()))?,
        target_name: target_name
            .ok_or_else(|| ConnectError::ParamsDecode("missing targetName".to_string()))?,
        elm_compiled_timestamp: elm_compiled_timestamp
            .ok_or_else(|| ConnectError::ParamsDecode("missing elmCompiledTimestamp".to_string()))?,
    })
}

/// Why a connecting URL was rejected (§4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The path didn't start with `/?`.
    UrlMismatch,
    /// The query string failed to decode.
    ParamsDecode(String),
}

/// A minimal percent-decoder covering the characters elm-watch's own client
/// actually encodes (target names may contain spaces).
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    out.push(value);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_connect_url() {
        let params =
            parse_connect_url("/?elmWatchVersion=1.2.3&targetName=Main&elmCompiledTimestamp=42")
                .unwrap();
        assert_eq!(params.elm_watch_version, "1.2.3");
        assert_eq!(params.target_name, "Main");
        assert_eq!(params.elm_compiled_timestamp, 42);
    }

    #[test]
    fn rejects_path_without_query_prefix() {
        let err = parse_connect_url("/favicon.ico").unwrap_err();
        assert_eq!(err, ConnectError::UrlMismatch);
    }

    #[test]
    fn rejects_missing_required_key() {
        let err = parse_connect_url("/?elmWatchVersion=1.0.0&targetName=Main").unwrap_err();
        assert!(matches!(err, ConnectError::ParamsDecode(_)));
    }

    #[test]
    fn rejects_non_numeric_timestamp() {
        let err = parse_connect_url(
            "/?elmWatchVersion=1.0.0&targetName=Main&elmCompiledTimestamp=nope",
        )
        .unwrap_err();
        assert!(matches!(err, ConnectError::ParamsDecode(_)));
    }

    #[test]
    fn decodes_percent_encoded_target_name() {
        let params = parse_connect_url(
            "/?elmWatchVersion=1.0.0&targetName=My%20Target&elmCompiledTimestamp=1",
        )
        .unwrap();
        assert_eq!(params.target_name, "My Target");
    }

    #[test]
    fn client_message_rejects_unknown_tag() {
        let json = r#"{"tag":"DoSomethingWeird"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn client_message_decodes_focused_tab() {
        let json = r#"{"tag":"FocusedTab"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg, ClientMessage::FocusedTab);
    }

    #[test]
    fn client_message_decodes_pressed_open_editor() {
        let json = r#"{"tag":"PressedOpenEditor","file":"src/Main.elm","line":3,"column":5}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::PressedOpenEditor { file: "src/Main.elm".to_string(), line: 3, column: 5 }
        );
    }
}
