//! HotRuntime Injector: rewrites a compiled artifact so the browser can be
//! driven live over the WebSocket connection (§4.9).
//!
//! Injection is a byte-level string replacement at a known suffix pattern
//! the compiler always emits at the end of a successful build: the module's
//! own top-level "kick things off" expression. The injector replaces that
//! expression with one that (1) registers the module on a well-known global
//! so the appended runtime can reach it, then (2) appends the runtime
//! itself, parameterised by the target's identity and the server's URL.

use crate::error::{Error, ErrorKind, Result};

/// The suffix every compiled artifact this injector can patch ends with.
///
/// Real compiler output ends its IIFE with `_Platform_export(...)`; we look
/// for the closing parenthesis plus semicolon immediately following that
/// call so the rewrite doesn't have to parse JavaScript.
const EXPORT_SUFFIX: &str = "}(this));";

/// Global object the compiled module registers itself on, keyed by target.
const GLOBAL_REGISTRY: &str = "window.__elmWatchCompiledModules";

/// Builds the client-runtime snippet appended after the rewritten export.
///
/// The runtime opens a WebSocket to `server_url`, reconnects with backoff on
/// drop, and reloads the page on a `Reload` server message; everything else
/// is handed to the browser UI hooks the compiled module's proxy exposes.
fn client_runtime(target_name: &str, server_url: &str, compiled_timestamp: u64) -> String {
    format!(
        r"
(function() {{
  var targetName = {target_name:?};
  var serverUrl = {server_url:?};
  var compiledTimestamp = {compiled_timestamp};
  var backoffMs = 1000;
  function connect() {{
    var ws = new WebSocket(
      serverUrl + '/?elm-watch-version=1&target-name=' + encodeURIComponent(targetName) +
        '&elm-compiled-timestamp=' + compiledTimestamp
    );
    ws.onopen = function() {{ backoffMs = 1000; }};
    ws.onmessage = function(event) {{
      var message = JSON.parse(event.data);
      if (message.tag === 'Reload') {{
        window.location.reload();
        return;
      }}
      var target = window.__elmWatchCompiledModules && window.__elmWatchCompiledModules[targetName];
      if (target && typeof target.__elmWatchOnServerMessage === 'function') {{
        target.__elmWatchOnServerMessage(message);
      }}
    }};
    ws.onclose = function() {{
      setTimeout(connect, backoffMs);
      backoffMs = Math.min(backoffMs * 2, 30000);
    }};
  }}
  connect();
}})();
"
    )
}

/// Rewrites `artifact` to register itself on [`GLOBAL_REGISTRY`] under
/// `target_name` and appends the live-reload client runtime pointed at
/// `server_url`.
///
/// # Errors
///
/// Returns [`ErrorKind::TroubleWritingOutput`] if `artifact` does not end
/// with the expected export suffix, since that means it isn't a shape this
/// injector knows how to patch (§4.9).
pub fn inject(
    artifact: &str,
    target_name: &str,
    server_url: &str,
    compiled_timestamp: u64,
) -> Result<String> {
    let Some(prefix) = artifact.strip_suffix(EXPORT_SUFFIX) else {
        return Err(Error::new(ErrorKind::TroubleWritingOutput)
            .with_context("compiled artifact does not end with the expected export suffix"));
    };

    let mut patched = String::with_capacity(artifact.len() + 512);
    patched.push_str(prefix);
    patched.push_str(EXPORT_SUFFIX);
    patched.push('\n');
    patched.push_str(&format!(
        "{GLOBAL_REGISTRY} = {GLOBAL_REGISTRY} || {{}}; {GLOBAL_REGISTRY}[{target_name:?}] = this.Elm;\n"
    ));
    patched.push_str(&client_runtime(target_name, server_url, compiled_timestamp));
    Ok(patched)
}

/// A coarse structural signature of the record field shapes present in a
/// compiled artifact, used to decide whether hot-patching it into an
/// already-running page is safe or whether the browser must fall back to a
/// full reload (§4.8 `SuccessfullyCompiledButRecordFieldsChanged`).
///
/// Hot-patching keeps existing `Model`/`Msg` values alive across the swap;
/// if the record shapes those values were built from changed, the old
/// values are no longer compatible with the new code's field accesses.
/// Without an embedded JavaScript engine (see [`crate::postprocess`]) this
/// can't be a real type diff, so it extracts object-literal property names
/// with a conservative scan: any identifier immediately followed by `:` at
/// brace depth greater than zero. Two artifacts producing the same sorted,
/// deduplicated field-name set are treated as interchangeable.
#[must_use]
pub fn record_field_signature(code: &str) -> String {
    let bytes = code.as_bytes();
    let len = bytes.len();
    let mut depth: i32 = 0;
    let mut fields: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < len {
        match bytes[i] {
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                i += 1;
            }
            b if depth > 0 && (b.is_ascii_alphabetic() || b == b'_' || b == b'$') => {
                let start = i;
                i += 1;
                while i < len && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$') {
                    i += 1;
                }
                let mut j = i;
                while j < len && bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                if j < len && bytes[j] == b':' && bytes.get(j + 1) != Some(&b':') {
                    fields.push(&code[start..i]);
                }
            }
            _ => i += 1,
        }
    }
    fields.sort_unstable();
    fields.dedup();
    fields.join(",")
}
