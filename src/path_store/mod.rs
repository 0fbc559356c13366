//! Path canonicalisation, duplicate-input detection, and common-root
//! computation (§4.1).

use crate::error::{Error, ErrorKind, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// An absolute, symlink-resolved path.
///
/// A thin newtype rather than a bare `PathBuf` so call sites can't
/// accidentally mix canonical and non-canonical paths — the same
/// type-safe-identifier convention the rest of this codebase uses for its
/// other domain identifiers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AbsolutePath(PathBuf);

impl AbsolutePath {
    /// Returns the underlying path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Consumes this value, returning the underlying `PathBuf`.
    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl std::fmt::Display for AbsolutePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A group of input entries that canonicalise to the same file.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    /// The shared canonical path.
    pub canonical: AbsolutePath,
    /// The original (pre-canonicalisation) entries that collided.
    pub originals: Vec<PathBuf>,
    /// True if at least one entry was reached through a symlink, i.e. its
    /// original form differs from the canonical form.
    pub via_symlink: bool,
}

/// Canonicalises paths, finds duplicate inputs, and computes common roots.
#[derive(Debug, Default)]
pub struct PathStore;

impl PathStore {
    /// Creates a new path store. Stateless today; a distinct type so the
    /// rest of the orchestrator depends on an owner rather than free
    /// functions, matching how other single-purpose components here are
    /// modeled (e.g. [`crate::hot_runtime::Injector`]).
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Resolves `path` to its ultimate, symlink-free absolute form.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InputsFailedToResolve`] wrapping the OS error,
    /// including symlink-cycle detection surfaced as `ELOOP` by the
    /// underlying platform (reported here rather than re-implemented, since
    /// `std::fs::canonicalize` already detects cycles and returns `ELOOP`).
    pub fn canonicalise(&self, path: &Path) -> Result<AbsolutePath> {
        std::fs::canonicalize(path).map(AbsolutePath).map_err(|e| {
            Error::new(ErrorKind::InputsFailedToResolve)
                .with_path(path)
                .with_context(e.to_string())
        })
    }

    /// Groups `entries` (raw, possibly-relative, possibly-duplicate paths)
    /// by their canonical form.
    ///
    /// Entries that fail to canonicalise are skipped; the caller is expected
    /// to have already validated existence via [`Self::canonicalise`] at the
    /// call site that needs `InputsNotFound`/`InputsFailedToResolve`.
    #[must_use]
    pub fn duplicate_inputs(&self, entries: &[PathBuf]) -> Vec<DuplicateGroup> {
        let mut by_canonical: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for entry in entries {
            if let Ok(canonical) = std::fs::canonicalize(entry) {
                by_canonical.entry(canonical).or_default().push(entry.clone());
            }
        }
        by_canonical
            .into_iter()
            .filter(|(_, originals)| originals.len() > 1)
            .map(|(canonical, originals)| {
                let via_symlink = originals.iter().any(|o| o != &canonical);
                DuplicateGroup {
                    canonical: AbsolutePath(canonical),
                    originals,
                    via_symlink,
                }
            })
            .collect()
    }

    /// Computes the deepest ancestor directory shared by every path in
    /// `paths`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NoCommonRoot`] if `paths` is empty or if the
    /// paths do not share a root component (distinct Windows drives; on Unix
    /// every absolute path shares `/`, so this only fires on an empty list).
    pub fn common_root(&self, paths: &[AbsolutePath]) -> Result<AbsolutePath> {
        let mut iter = paths.iter();
        let first = iter
            .next()
            .ok_or_else(|| Error::new(ErrorKind::NoCommonRoot).with_context("no paths given"))?;

        let mut common: Vec<std::path::Component> = first.as_path().components().collect();
        for path in iter {
            let components: Vec<_> = path.as_path().components().collect();
            if components.first() != common.first() {
                return Err(
                    Error::new(ErrorKind::NoCommonRoot).with_context("paths span distinct roots")
                );
            }
            let shared = common
                .iter()
                .zip(components.iter())
                .take_while(|(a, b)| a == b)
                .count();
            common.truncate(shared);
        }

        if common.is_empty() {
            return Err(Error::new(ErrorKind::NoCommonRoot).with_context("no shared ancestor"));
        }

        let mut root = PathBuf::new();
        for component in common {
            root.push(component.as_os_str());
        }
        Ok(AbsolutePath(root))
    }
}

/// Helpers for other modules' tests that need an [`AbsolutePath`] value
/// without touching the filesystem. Not part of the public contract.
#[cfg(test)]
pub mod test_support {
    use super::AbsolutePath;
    use std::path::PathBuf;

    /// Wraps `path` as an [`AbsolutePath`] without resolving it. Only valid
    /// in tests that compare `Path`/`Display` output, never ones that rely
    /// on the value actually being canonical.
    #[must_use]
    pub fn absolute_path_unchecked(path: PathBuf) -> AbsolutePath {
        AbsolutePath(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn canonicalise_resolves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Main.elm");
        fs::write(&file, "module Main exposing (..)").unwrap();

        let store = PathStore::new();
        let resolved = store.canonicalise(&file).unwrap();
        assert!(resolved.as_path().ends_with("Main.elm"));
    }

    #[test]
    fn canonicalise_fails_on_missing_file() {
        let store = PathStore::new();
        let err = store.canonicalise(Path::new("/does/not/exist.elm")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputsFailedToResolve);
    }

    #[test]
    fn duplicate_inputs_groups_symlinked_entries() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("Main.elm");
        fs::write(&real, "module Main exposing (..)").unwrap();

        #[cfg(unix)]
        {
            let link = dir.path().join("Main2.elm");
            std::os::unix::fs::symlink(&real, &link).unwrap();

            let store = PathStore::new();
            let groups = store.duplicate_inputs(&[real.clone(), link.clone()]);
            assert_eq!(groups.len(), 1);
            assert!(groups[0].via_symlink);
            assert_eq!(groups[0].originals.len(), 2);
        }
    }

    #[test]
    fn duplicate_inputs_empty_when_all_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("A.elm");
        let b = dir.path().join("B.elm");
        fs::write(&a, "module A exposing (..)").unwrap();
        fs::write(&b, "module B exposing (..)").unwrap();

        let store = PathStore::new();
        let groups = store.duplicate_inputs(&[a, b]);
        assert!(groups.is_empty());
    }

    #[test]
    fn common_root_of_single_path_is_itself() {
        let store = PathStore::new();
        let path = AbsolutePath(PathBuf::from("/a/b/c"));
        let root = store.common_root(std::slice::from_ref(&path)).unwrap();
        assert_eq!(root.as_path(), Path::new("/a/b/c"));
    }

    #[test]
    fn common_root_of_siblings() {
        let store = PathStore::new();
        let paths = vec![
            AbsolutePath(PathBuf::from("/a/b/c/Main.elm")),
            AbsolutePath(PathBuf::from("/a/b/d/Other.elm")),
        ];
        let root = store.common_root(&paths).unwrap();
        assert_eq!(root.as_path(), Path::new("/a/b"));
    }

    #[test]
    fn common_root_fails_on_empty_list() {
        let store = PathStore::new();
        let err = store.common_root(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoCommonRoot);
    }
}
