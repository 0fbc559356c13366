//! FileWatcher: OS-notification subscription, debouncing, and event
//! normalisation under the project root (§4.3).

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::error::{Error, ErrorKind};
use crate::path_store::AbsolutePath;

/// The kind of filesystem change normalised from the OS watcher's event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A new file appeared.
    Added,
    /// An existing file's contents or metadata changed.
    Changed,
    /// A file was deleted or moved away.
    Removed,
}

/// A single normalised filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// What kind of change happened.
    pub kind: ChangeKind,
    /// The canonical path affected.
    pub path: PathBuf,
}

/// Default debounce window (§4.3: "configurable window (default small, ~10 ms)").
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(10);

/// Owns the OS watch subscription and the debounce buffer.
///
/// `_inner` is retained only to keep the OS subscription alive: dropping a
/// `notify` watcher tears down its underlying inotify/FSEvents/ReadDirectoryW
/// handle.
pub struct FileWatcher {
    _inner: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    project_root: PathBuf,
    debounce: Duration,
}

impl FileWatcher {
    /// Subscribes to filesystem events under `project_root`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WatcherError`] if the OS-level subscription
    /// cannot be established at all (this is distinct from per-event errors
    /// surfaced later by [`Self::recv`]).
    pub fn new(project_root: &Path, debounce: Duration) -> crate::error::Result<Self> {
        let (tx, rx): (Sender<notify::Result<Event>>, _) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| {
            Error::new(ErrorKind::WatcherError)
                .with_path(project_root)
                .with_context(e.to_string())
        })?;
        watcher
            .watch(project_root, RecursiveMode::Recursive)
            .map_err(|e| {
                Error::new(ErrorKind::WatcherError)
                    .with_path(project_root)
                    .with_context(e.to_string())
            })?;

        Ok(Self {
            _inner: watcher,
            rx,
            project_root: project_root.to_path_buf(),
            debounce,
        })
    }

    /// Blocks until either a debounced batch of events is ready or
    /// `timeout` elapses, returning `Ok(None)` on plain timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WatcherError`] if the underlying watcher reports
    /// a fatal condition (e.g. `ELOOP`, the subscription channel closing).
    /// Per §4.3 this is terminal: the caller should exit the watch-mode loop
    /// with non-zero status.
    pub fn recv(&self, timeout: Duration) -> crate::error::Result<Option<Vec<WatchEvent>>> {
        let deadline = Instant::now() + timeout;
        let first = match self.rx.recv_timeout(timeout) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::new(ErrorKind::WatcherError)
                    .with_context("watcher event channel disconnected"))
            }
        };

        let mut collected = self.normalise_one(first)?;

        // Drain the debounce window: fold in every event arriving before
        // `self.debounce` elapses, coalescing repeats on the same path.
        let debounce_deadline = Instant::now() + self.debounce;
        loop {
            let now = Instant::now();
            if now >= debounce_deadline || now >= deadline {
                break;
            }
            match self.rx.recv_timeout(debounce_deadline.saturating_duration_since(now)) {
                Ok(res) => collected.extend(self.normalise_one(res)?),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::new(ErrorKind::WatcherError)
                        .with_context("watcher event channel disconnected"))
                }
            }
        }

        Ok(Some(coalesce(collected)))
    }

    fn normalise_one(
        &self,
        res: notify::Result<Event>,
    ) -> crate::error::Result<Vec<WatchEvent>> {
        let event = res.map_err(|e| {
            Error::new(ErrorKind::WatcherError)
                .with_path(&self.project_root)
                .with_context(e.to_string())
        })?;

        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Added,
            EventKind::Remove(_) => ChangeKind::Removed,
            EventKind::Modify(_) => ChangeKind::Changed,
            _ => return Ok(Vec::new()),
        };

        Ok(event
            .paths
            .into_iter()
            .filter(|p| p.starts_with(&self.project_root))
            .map(|path| WatchEvent { kind, path })
            .collect())
    }
}

/// Collapses repeated events on the same path within one debounce batch,
/// keeping the most recent kind (an Added immediately followed by a Changed
/// within the same window is reported once, as Changed).
fn coalesce(events: Vec<WatchEvent>) -> Vec<WatchEvent> {
    let mut by_path: HashMap<PathBuf, ChangeKind> = HashMap::new();
    let mut order: Vec<PathBuf> = Vec::new();
    for event in events {
        if !by_path.contains_key(&event.path) {
            order.push(event.path.clone());
        }
        by_path.insert(event.path, event.kind);
    }
    order
        .into_iter()
        .map(|path| {
            let kind = by_path[&path];
            WatchEvent { kind, path }
        })
        .collect()
}

/// Classification of a watch event against the set of known significant
/// paths, used by the scheduler to decide what a change means (§4.3 policy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Significance {
    /// The path is the active configuration file: reload configuration.
    ConfigFile,
    /// The path is the compiler project file: reinstall dependencies for
    /// every target.
    ProjectFile,
    /// The path is depended on by at least one target.
    Imported,
    /// The path isn't depended on by anything the orchestrator tracks.
    NotImported,
}

/// Classifies `event` against the known config file, project file, and the
/// set of all targets' dependency sets.
#[must_use]
pub fn classify(
    event: &WatchEvent,
    config_file: &AbsolutePath,
    project_file: Option<&AbsolutePath>,
    is_imported: impl Fn(&Path) -> bool,
) -> Significance {
    if event.path == config_file.as_path() {
        Significance::ConfigFile
    } else if project_file.is_some_and(|p| event.path == p.as_path()) {
        Significance::ProjectFile
    } else if is_imported(&event.path) {
        Significance::Imported
    } else {
        Significance::NotImported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesce_keeps_latest_kind_per_path() {
        let events = vec![
            WatchEvent { kind: ChangeKind::Added, path: PathBuf::from("/a/Main.elm") },
            WatchEvent { kind: ChangeKind::Changed, path: PathBuf::from("/a/Main.elm") },
        ];
        let result = coalesce(events);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].kind, ChangeKind::Changed);
    }

    #[test]
    fn coalesce_preserves_first_seen_order() {
        let events = vec![
            WatchEvent { kind: ChangeKind::Changed, path: PathBuf::from("/a/A.elm") },
            WatchEvent { kind: ChangeKind::Changed, path: PathBuf::from("/a/B.elm") },
            WatchEvent { kind: ChangeKind::Changed, path: PathBuf::from("/a/A.elm") },
        ];
        let result = coalesce(events);
        let paths: Vec<_> = result.iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/a/A.elm"), PathBuf::from("/a/B.elm")]);
    }

    #[test]
    fn classify_detects_config_file() {
        let config = unchecked_path("/proj/elm-watch.json");
        let event = WatchEvent { kind: ChangeKind::Changed, path: PathBuf::from("/proj/elm-watch.json") };
        let sig = classify(&event, &config, None, |_| false);
        assert_eq!(sig, Significance::ConfigFile);
    }

    #[test]
    fn classify_detects_not_imported() {
        let config = unchecked_path("/proj/elm-watch.json");
        let event = WatchEvent { kind: ChangeKind::Changed, path: PathBuf::from("/proj/README.md") };
        let sig = classify(&event, &config, None, |_| false);
        assert_eq!(sig, Significance::NotImported);
    }

    #[test]
    fn classify_detects_imported() {
        let config = unchecked_path("/proj/elm-watch.json");
        let event = WatchEvent { kind: ChangeKind::Changed, path: PathBuf::from("/proj/src/Main.elm") };
        let sig = classify(&event, &config, None, |_| true);
        assert_eq!(sig, Significance::Imported);
    }

    fn unchecked_path(s: &str) -> AbsolutePath {
        crate::path_store::test_support::absolute_path_unchecked(PathBuf::from(s))
    }
}
