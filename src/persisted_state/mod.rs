//! Persisted cross-restart state: the last-used WebSocket port and
//! per-target UI preferences (§3, §4.2).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

/// A target's persisted UI preferences. All fields are optional: a target
/// that has never been touched by the browser has an empty record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPreferences {
    /// Last compilation mode the browser requested, if any.
    #[serde(rename = "compilationMode", skip_serializing_if = "Option::is_none")]
    pub compilation_mode: Option<CompilationMode>,
    /// Last browser-UI corner the overlay was docked to, if any.
    #[serde(rename = "browserUiPosition", skip_serializing_if = "Option::is_none")]
    pub browser_ui_position: Option<BrowserUiPosition>,
    /// Whether the error overlay was left open.
    #[serde(rename = "openErrorOverlay", skip_serializing_if = "Option::is_none")]
    pub open_error_overlay: Option<bool>,
}

/// Compilation modes a browser session may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilationMode {
    /// Verbose runtime checks, unminified.
    Debug,
    /// Plain development build.
    Standard,
    /// Dead-code elimination and minification.
    Optimize,
}

/// Corners the floating browser UI may be docked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrowserUiPosition {
    /// Top-left corner.
    TopLeft,
    /// Top-right corner.
    TopRight,
    /// Bottom-left corner.
    BottomLeft,
    /// Bottom-right corner.
    BottomRight,
}

/// The full on-disk shape of `elm-stuff/elm-watch/stuff.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// The WebSocket port last bound successfully.
    pub port: u16,
    /// Per-target preferences, keyed by target name.
    #[serde(default)]
    pub targets: BTreeMap<String, TargetPreferences>,
}

/// Outcome of reading the persisted-state file.
pub enum ReadOutcome {
    /// The file did not exist; treat as empty state.
    Missing,
    /// The file parsed successfully.
    Parsed(PersistedState),
    /// The file existed but failed to parse; the diagnostic is for logging
    /// only. Callers should proceed as if it had been [`ReadOutcome::Missing`]
    /// and let the next successful write replace it.
    Invalid(String),
}

/// Reads and parses the persisted-state file at `path`.
///
/// Never returns an `Err`: a missing or corrupt file is not fatal to watch
/// mode, so every failure mode is folded into [`ReadOutcome`] instead.
#[must_use]
pub fn read(path: &Path) -> ReadOutcome {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ReadOutcome::Missing,
        Err(e) => return ReadOutcome::Invalid(e.to_string()),
    };
    match serde_json::from_slice::<PersistedState>(&bytes) {
        Ok(state) => ReadOutcome::Parsed(state),
        Err(e) => ReadOutcome::Invalid(e.to_string()),
    }
}

/// Writes `state` to `path` atomically (temp file in the same directory,
/// then rename).
///
/// # Errors
///
/// Returns the underlying I/O error on failure. Per §4.2 this is a warning
/// to the caller, never a reason to stop watch mode — callers should log and
/// continue rather than propagate this as a fatal [`crate::error::Error`].
pub fn write(path: &Path, state: &PersistedState) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let json = serde_json::to_vec_pretty(state)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    tmp.write_all(&json)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stuff.json");
        assert!(matches!(read(&path), ReadOutcome::Missing));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elm-stuff/elm-watch/stuff.json");

        let mut state = PersistedState {
            port: 8000,
            targets: BTreeMap::new(),
        };
        state.targets.insert(
            "Main".to_string(),
            TargetPreferences {
                compilation_mode: Some(CompilationMode::Optimize),
                browser_ui_position: Some(BrowserUiPosition::BottomRight),
                open_error_overlay: Some(true),
            },
        );

        write(&path, &state).unwrap();
        match read(&path) {
            ReadOutcome::Parsed(parsed) => assert_eq!(parsed, state),
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn invalid_json_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stuff.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(read(&path), ReadOutcome::Invalid(_)));
    }

    #[test]
    fn unknown_object_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stuff.json");
        std::fs::write(
            &path,
            br#"{"port":9000,"targets":{},"futureField":"ignored"}"#,
        )
        .unwrap();
        match read(&path) {
            ReadOutcome::Parsed(state) => assert_eq!(state.port, 9000),
            other => panic!("expected Parsed, got {other:?}"),
        }
    }

    #[test]
    fn unknown_enum_variant_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stuff.json");
        std::fs::write(
            &path,
            br#"{"port":9000,"targets":{"Main":{"compilationMode":"turbo"}}}"#,
        )
        .unwrap();
        assert!(matches!(read(&path), ReadOutcome::Invalid(_)));
    }

    #[test]
    fn absent_file_is_equivalent_to_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stuff.json");
        let missing = read(&path);
        assert!(matches!(missing, ReadOutcome::Missing));
        // Equivalent: treating Missing as default() produces empty state.
        assert_eq!(PersistedState::default().targets.len(), 0);
    }
}

impl std::fmt::Debug for ReadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "Missing"),
            Self::Parsed(s) => write!(f, "Parsed({s:?})"),
            Self::Invalid(msg) => write!(f, "Invalid({msg})"),
        }
    }
}
