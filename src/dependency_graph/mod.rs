//! DependencyGraph: per-target closed set of source files, rebuilt by
//! scanning import declarations (§3 DependencySet, §4.4).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};

/// The transitive set of source files a target depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet(BTreeSet<PathBuf>);

impl DependencySet {
    /// Returns whether `path` is a member of this set.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.0.contains(path)
    }

    /// Iterates the set's members.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.0.iter().map(PathBuf::as_path)
    }

    /// Number of files in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Reads an import line of the shape `import Dotted.Module.Name` and
/// returns the dotted module name, if the line is an import declaration.
///
/// Recognises only lines starting with the literal `import` followed by
/// whitespace, matching §4.4's "a line starting with `import` followed by a
/// dotted module name" rule; `as`/`exposing` clauses on the same line are
/// ignored since only the module name is needed for resolution.
fn parse_import_line(line: &str) -> Option<String> {
    let rest = line.strip_prefix("import")?;
    let rest = rest.strip_prefix(char::is_whitespace)?;
    let module_name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '.' || *c == '_')
        .collect();
    if module_name.is_empty() {
        None
    } else {
        Some(module_name)
    }
}

/// Resolves a dotted module name (e.g. `Foo.Bar`) to a candidate relative
/// path (e.g. `Foo/Bar.elm`) under a source directory.
fn module_name_to_relative_path(module_name: &str, source_extension: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for segment in module_name.split('.') {
        path.push(segment);
    }
    path.set_extension(source_extension);
    path
}

/// Scans `file` for import declarations, returning the dotted module names
/// it imports.
///
/// # Errors
///
/// Returns [`ErrorKind::TroubleReadingFile`] if `file` cannot be opened or
/// read (including the case where `file` names a directory: the OS error is
/// forwarded unchanged per §4.4's "directory-as-path" edge case).
fn scan_imports(file: &Path) -> Result<Vec<String>> {
    let handle = std::fs::File::open(file).map_err(|e| {
        Error::new(ErrorKind::TroubleReadingFile)
            .with_path(file)
            .with_context(e.to_string())
    })?;
    let reader = BufReader::new(handle);
    let mut imports = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| {
            Error::new(ErrorKind::TroubleReadingFile)
                .with_path(file)
                .with_context(e.to_string())
        })?;
        if let Some(module) = parse_import_line(&line) {
            imports.push(module);
        }
    }
    Ok(imports)
}

/// Resolves a module name against the declared source directories, failing
/// with [`ErrorKind::AmbiguousImport`] when the name matches more than one
/// candidate (§4.4).
fn resolve_module(
    module_name: &str,
    source_directories: &[PathBuf],
    source_extension: &str,
) -> Result<Option<PathBuf>> {
    let relative = module_name_to_relative_path(module_name, source_extension);
    let mut matches: Vec<PathBuf> = source_directories
        .iter()
        .map(|dir| dir.join(&relative))
        .filter(|candidate| candidate.is_file())
        .collect();
    matches.dedup();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        _ => Err(Error::new(ErrorKind::AmbiguousImport)
            .with_context(format!("{module_name} resolves to multiple files"))),
    }
}

/// Owns every target's [`DependencySet`], rebuilding them on demand.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    sets: HashMap<String, DependencySet>,
    /// Targets whose last rebuild attempt failed; their previous
    /// [`DependencySet`] (if any) remains usable per §4.4: "marks the graph
    /// stale but keeps compiled code usable".
    stale: HashSet<String>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the dependency set for `target`, starting from `inputs` and
    /// transitively following import declarations resolved against
    /// `source_directories`.
    ///
    /// # Errors
    ///
    /// Propagates [`ErrorKind::TroubleReadingFile`] (or an ambiguous-import
    /// condition surfaced as [`ErrorKind::UnexpectedElmOutput`]) from the
    /// first file that fails to scan or resolve. On error the target is
    /// marked stale; its previous set, if any, is left untouched.
    pub fn rebuild(
        &mut self,
        target: &str,
        inputs: &[PathBuf],
        source_directories: &[PathBuf],
        source_extension: &str,
    ) -> Result<()> {
        let mut visited: BTreeSet<PathBuf> = BTreeSet::new();
        let mut queue: Vec<PathBuf> = inputs.to_vec();

        while let Some(file) = queue.pop() {
            let canonical = file.canonicalize().unwrap_or(file.clone());
            if !visited.insert(canonical) {
                continue;
            }

            let imports = match scan_imports(&file) {
                Ok(imports) => imports,
                Err(e) => {
                    self.stale.insert(target.to_string());
                    return Err(e);
                }
            };

            for module_name in imports {
                match resolve_module(&module_name, source_directories, source_extension) {
                    Ok(Some(resolved)) => queue.push(resolved),
                    Ok(None) => {} // package module or not yet created; not a local dependency
                    Err(e) => {
                        self.stale.insert(target.to_string());
                        return Err(e);
                    }
                }
            }
        }

        self.stale.remove(target);
        self.sets.insert(target.to_string(), DependencySet(visited));
        Ok(())
    }

    /// Returns whether `target`'s last rebuild attempt failed.
    #[must_use]
    pub fn is_stale(&self, target: &str) -> bool {
        self.stale.contains(target)
    }

    /// The set of targets whose [`DependencySet`] contains `path`.
    #[must_use]
    pub fn affected_by(&self, path: &Path) -> BTreeSet<String> {
        self.sets
            .iter()
            .filter(|(_, set)| set.contains(path))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The dependency set recorded for `target`, if it has been built.
    #[must_use]
    pub fn get(&self, target: &str) -> Option<&DependencySet> {
        self.sets.get(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parse_import_line_extracts_dotted_name() {
        assert_eq!(
            parse_import_line("import Foo.Bar exposing (baz)"),
            Some("Foo.Bar".to_string())
        );
    }

    #[test]
    fn parse_import_line_ignores_non_import() {
        assert_eq!(parse_import_line("module Main exposing (..)"), None);
    }

    #[test]
    fn parse_import_line_ignores_importless_prefix() {
        assert_eq!(parse_import_line("importance of testing"), None);
    }

    #[test]
    fn module_name_to_relative_path_nests_segments() {
        let path = module_name_to_relative_path("Foo.Bar.Baz", "elm");
        assert_eq!(path, PathBuf::from("Foo/Bar/Baz.elm"));
    }

    #[test]
    fn rebuild_follows_transitive_imports() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("Main.elm"), "module Main exposing (..)\nimport Helper\n").unwrap();
        fs::write(src.join("Helper.elm"), "module Helper exposing (..)\n").unwrap();

        let mut graph = DependencyGraph::new();
        graph
            .rebuild("Main", &[src.join("Main.elm")], &[src.clone()], "elm")
            .unwrap();

        let set = graph.get("Main").unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&src.join("Main.elm").canonicalize().unwrap()));
        assert!(set.contains(&src.join("Helper.elm").canonicalize().unwrap()));
    }

    #[test]
    fn rebuild_reports_ambiguous_import() {
        let dir = tempfile::tempdir().unwrap();
        let src_a = dir.path().join("a");
        let src_b = dir.path().join("b");
        fs::create_dir_all(&src_a).unwrap();
        fs::create_dir_all(&src_b).unwrap();
        fs::write(src_a.join("Main.elm"), "module Main exposing (..)\nimport Shared\n").unwrap();
        fs::write(src_a.join("Shared.elm"), "module Shared exposing (..)\n").unwrap();
        fs::write(src_b.join("Shared.elm"), "module Shared exposing (..)\n").unwrap();

        let mut graph = DependencyGraph::new();
        let err = graph
            .rebuild("Main", &[src_a.join("Main.elm")], &[src_a.clone(), src_b.clone()], "elm")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousImport);
        assert!(graph.is_stale("Main"));
    }

    #[test]
    fn affected_by_finds_targets_containing_path() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("Main.elm"), "module Main exposing (..)\n").unwrap();

        let mut graph = DependencyGraph::new();
        graph.rebuild("Main", &[src.join("Main.elm")], &[src.clone()], "elm").unwrap();

        let affected = graph.affected_by(&src.join("Main.elm").canonicalize().unwrap());
        assert!(affected.contains("Main"));
    }

    #[test]
    fn unresolved_import_is_silently_treated_as_package_module() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("Main.elm"), "module Main exposing (..)\nimport Json.Decode\n").unwrap();

        let mut graph = DependencyGraph::new();
        graph.rebuild("Main", &[src.join("Main.elm")], &[src.clone()], "elm").unwrap();
        assert_eq!(graph.get("Main").unwrap().len(), 1);
    }
}
