//! Loading and schema-validating `elm-watch.json` (§3, §6).
//!
//! This module only handles the on-disk JSON shape; turning a parsed
//! [`RawConfig`] into a validated [`crate::project::Project`] (path
//! existence, name rules, uniqueness) lives in [`crate::project`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};

/// The exact on-disk shape of one target entry in `elm-watch.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTargetConfig {
    /// Module entry paths, relative to the configuration file.
    pub inputs: Vec<PathBuf>,
    /// Output path, relative to the configuration file.
    pub output: PathBuf,
    /// Optional postprocess command argv.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postprocess: Option<Vec<String>>,
}

/// The exact on-disk shape of `elm-watch.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConfig {
    /// Fixed WebSocket port, if the user pinned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Targets keyed by their declared name.
    #[serde(default)]
    pub targets: BTreeMap<String, RawTargetConfig>,
}

/// The canonical configuration file name, searched for in ancestor
/// directories starting at the current working directory.
pub const FILE_NAME: &str = "elm-watch.json";

/// Reads and parses `path` as a configuration file.
///
/// # Errors
///
/// Returns [`ErrorKind::ConfigNotFound`] if `path` does not exist, or
/// [`ErrorKind::InvalidConfig`] if it exists but is not valid JSON matching
/// [`RawConfig`]'s shape.
pub fn load(path: &Path) -> Result<RawConfig> {
    let bytes = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::new(ErrorKind::ConfigNotFound).with_path(path)
        } else {
            Error::new(ErrorKind::InvalidConfig)
                .with_path(path)
                .with_context(e.to_string())
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::new(ErrorKind::InvalidConfig)
            .with_path(path)
            .with_context(format!("{e} (line {}, column {})", e.line(), e.column()))
    })
}

/// Walks upward from `start` looking for [`FILE_NAME`], returning the first
/// ancestor directory (inclusive of `start`) that contains one.
#[must_use]
pub fn find_nearest(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join(FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_is_config_not_found() {
        let err = load(Path::new("/no/such/elm-watch.json")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigNotFound);
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        std::fs::write(&path, b"{ not json").unwrap();
        let err = load(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn load_parses_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        std::fs::write(
            &path,
            br#"{"targets":{"Main":{"inputs":["src/Main.elm"],"output":"build/main.js"}}}"#,
        )
        .unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.targets.len(), 1);
        assert!(config.port.is_none());
    }

    #[test]
    fn find_nearest_walks_up_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(FILE_NAME), b"{}").unwrap();

        let found = find_nearest(&nested).unwrap();
        assert_eq!(found, dir.path().join(FILE_NAME));
    }

    #[test]
    fn find_nearest_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_nearest(dir.path()).is_none());
    }
}
