//! Validated project data model: [`Target`] and [`Project`] (§3), built
//! from a [`crate::config::RawConfig`] plus filesystem checks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::RawConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::path_store::{AbsolutePath, PathStore};

/// An optional postprocess step attached to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Postprocess {
    /// Run an in-process plug-in script via a [`crate::postprocess::Pool`]
    /// worker. Holds the script path (the command's `elm-watch-node`
    /// argument stripped off).
    Node(PathBuf),
    /// Invoke an external command, piping the artifact to its stdin.
    Command(Vec<String>),
}

/// One named compile unit (§3 Target).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// The target's declared name.
    pub name: String,
    /// Module entry paths, in declaration order.
    pub inputs: Vec<PathBuf>,
    /// Output path, always ending in `.js`.
    pub output: PathBuf,
    /// Optional postprocess step.
    pub postprocess: Option<Postprocess>,
}

/// Validates a target's declared name against the §3 rule: must start and
/// end with a non-whitespace character other than `-`, and contain no
/// newlines.
fn validate_target_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::InvalidConfig).with_context("target name is empty"));
    }
    if name.contains('\n') {
        return Err(
            Error::new(ErrorKind::InvalidConfig).with_context(format!("target name {name:?} contains a newline"))
        );
    }
    let first = name.chars().next().unwrap();
    let last = name.chars().last().unwrap();
    let edge_ok = |c: char| !c.is_whitespace() && c != '-';
    if !edge_ok(first) || !edge_ok(last) {
        return Err(Error::new(ErrorKind::InvalidConfig).with_context(format!(
            "target name {name:?} must start and end with a non-whitespace character other than '-'"
        )));
    }
    Ok(())
}

/// Validates that `output` ends in `.js` and is not `/dev/null`.
fn validate_output(output: &Path) -> Result<()> {
    let is_js = output.extension().and_then(|e| e.to_str()) == Some("js");
    if !is_js || output == Path::new("/dev/null") {
        return Err(Error::new(ErrorKind::InvalidConfig)
            .with_path(output)
            .with_context("output must be a path ending in .js and not /dev/null"));
    }
    Ok(())
}

/// Validates that `input` resolves to an existing file whose basename is
/// module-name-shaped (starts with an uppercase ASCII letter, the rest
/// alphanumeric or `.`/`_`), and has the source extension.
fn validate_input(input: &Path, source_extension: &str) -> Result<()> {
    if !input.is_file() {
        return Err(Error::new(ErrorKind::InputsNotFound).with_path(input));
    }
    let extension_ok = input.extension().and_then(|e| e.to_str()) == Some(source_extension);
    let stem_ok = input
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| {
            let mut chars = stem.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
                && chars.all(|c| c.is_alphanumeric() || c == '_')
        });
    if !extension_ok || !stem_ok {
        return Err(Error::new(ErrorKind::InputsFailedToResolve)
            .with_path(input)
            .with_context("input must have the source extension and a module-name-shaped basename"));
    }
    Ok(())
}

fn parse_postprocess(argv: Vec<String>) -> Postprocess {
    match argv.split_first() {
        Some((first, rest)) if first == "elm-watch-node" => {
            Postprocess::Node(PathBuf::from(rest.first().cloned().unwrap_or_default()))
        }
        _ => Postprocess::Command(argv),
    }
}

/// A fully validated project: every enabled target, the configuration file
/// it was loaded from, and (when all targets agree) the single compiler
/// project file covering them.
#[derive(Debug, Clone)]
pub struct Project {
    /// Path to the `elm-watch.json` this project was loaded from.
    pub config_path: AbsolutePath,
    /// Every target declared in the configuration, keyed by name.
    pub targets: BTreeMap<String, Target>,
    /// The single compiler project file shared by all enabled targets, if
    /// they agree on one. `None` when targets disagree — affected targets
    /// are reported with [`ErrorKind::NoUniqueProject`] by the caller, while
    /// other targets continue (§3).
    pub project_file: Option<AbsolutePath>,
    /// Targets excluded because their declared project file didn't match
    /// the majority.
    pub no_unique_project: Vec<String>,
    /// The configuration's fixed WebSocket port, if the user pinned one
    /// (§6 `elm-watch.json`'s top-level `port`).
    pub configured_port: Option<u16>,
}

/// Builds a validated [`Project`] from a parsed configuration.
///
/// `source_extension` is the compiler's module-file extension (e.g. `elm`),
/// passed in rather than hardcoded so this stays decoupled from any one
/// compiler's naming.
///
/// # Errors
///
/// Returns [`ErrorKind::InvalidConfig`] on the first target whose name,
/// inputs, or output fail validation, and [`ErrorKind::DuplicateOutputs`] if
/// two targets share an output path.
pub fn build(
    config_path: &Path,
    raw: RawConfig,
    source_extension: &str,
    path_store: &PathStore,
) -> Result<Project> {
    if raw.port == Some(0) {
        return Err(Error::new(ErrorKind::InvalidConfig).with_context("port 0 is not a valid port"));
    }

    let mut targets = BTreeMap::new();
    let mut outputs_seen: BTreeMap<PathBuf, String> = BTreeMap::new();

    for (name, raw_target) in raw.targets {
        validate_target_name(&name)?;
        if raw_target.inputs.is_empty() {
            return Err(Error::new(ErrorKind::InvalidConfig)
                .with_context(format!("target {name:?} has no inputs")));
        }
        for input in &raw_target.inputs {
            validate_input(input, source_extension)?;
        }
        validate_output(&raw_target.output)?;

        if let Some(existing) = outputs_seen.get(&raw_target.output) {
            return Err(Error::new(ErrorKind::DuplicateOutputs).with_path(&raw_target.output).with_context(
                format!("targets {existing:?} and {name:?} share the same output"),
            ));
        }
        outputs_seen.insert(raw_target.output.clone(), name.clone());

        let target = Target {
            name: name.clone(),
            inputs: raw_target.inputs,
            output: raw_target.output,
            postprocess: raw_target.postprocess.map(parse_postprocess),
        };
        targets.insert(name, target);
    }

    let config_path = path_store.canonicalise(config_path)?;

    let (project_file, no_unique_project) = resolve_project_file(&targets, path_store);

    Ok(Project {
        config_path,
        targets,
        project_file,
        no_unique_project,
        configured_port: raw.port,
    })
}

/// For every enabled target, finds the nearest `elm.json` above its first
/// input; if they don't all agree, returns the majority file and the names
/// of the targets that disagreed (§3 `NoUniqueProject`).
fn resolve_project_file(
    targets: &BTreeMap<String, Target>,
    path_store: &PathStore,
) -> (Option<AbsolutePath>, Vec<String>) {
    let mut counts: BTreeMap<AbsolutePath, Vec<String>> = BTreeMap::new();

    for target in targets.values() {
        let Some(first_input) = target.inputs.first() else {
            continue;
        };
        let Some(dir) = first_input.parent() else {
            continue;
        };
        if let Some(project_file) = find_project_file(dir) {
            if let Ok(canonical) = path_store.canonicalise(&project_file) {
                counts.entry(canonical).or_default().push(target.name.clone());
            }
        }
    }

    let Some((winner, winners)) = counts.iter().max_by_key(|(_, names)| names.len()) else {
        return (None, Vec::new());
    };
    let winner = winner.clone();
    let winners = winners.clone();

    let losers = targets
        .keys()
        .filter(|name| !winners.contains(name))
        .cloned()
        .collect();

    (Some(winner), losers)
}

/// Walks upward from `start` looking for `elm.json`.
fn find_project_file(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join("elm.json");
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
    use crate::config::RawTargetConfig;
    use std::fs;

    fn setup_target(dir: &Path, name: &str) -> (String, RawTargetConfig) {
        let input = dir.join(format!("{name}.elm"));
        fs::write(&input, format!("module {name} exposing (..)")).unwrap();
        (
            name.to_string(),
            RawTargetConfig {
                inputs: vec![input],
                output: dir.join(format!("{name}.js")),
                postprocess: None,
            },
        )
    }

    #[test]
    fn target_name_rejects_leading_dash() {
        assert!(validate_target_name("-a").is_err());
    }

    #[test]
    fn target_name_rejects_whitespace_edges() {
        assert!(validate_target_name(" a").is_err());
        assert!(validate_target_name("a ").is_err());
    }

    #[test]
    fn target_name_rejects_newline() {
        assert!(validate_target_name("a\nb").is_err());
    }

    #[test]
    fn target_name_accepts_single_char() {
        assert!(validate_target_name("a").is_ok());
    }

    #[test]
    fn output_rejects_non_js_extension() {
        assert!(validate_output(Path::new("main.html")).is_err());
        assert!(validate_output(Path::new(".js")).is_err());
    }

    #[test]
    fn output_rejects_dev_null() {
        assert!(validate_output(Path::new("/dev/null")).is_err());
    }

    #[test]
    fn output_accepts_plain_js_path() {
        assert!(validate_output(Path::new("main.js")).is_ok());
    }

    #[test]
    fn build_rejects_duplicate_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let (name_a, mut target_a) = setup_target(dir.path(), "A");
        let (name_b, mut target_b) = setup_target(dir.path(), "B");
        target_a.output = dir.path().join("shared.js");
        target_b.output = dir.path().join("shared.js");

        let mut raw = RawConfig::default();
        raw.targets.insert(name_a, target_a);
        raw.targets.insert(name_b, target_b);

        let store = PathStore::new();
        let config_path = dir.path().join("elm-watch.json");
        fs::write(&config_path, b"{}").unwrap();

        let err = build(&config_path, raw, "elm", &store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateOutputs);
    }

    #[test]
    fn build_rejects_port_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (name, target) = setup_target(dir.path(), "Main");
        let mut raw = RawConfig::default();
        raw.targets.insert(name, target);
        raw.port = Some(0);

        let store = PathStore::new();
        let config_path = dir.path().join("elm-watch.json");
        fs::write(&config_path, b"{}").unwrap();

        let err = build(&config_path, raw, "elm", &store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn build_accepts_valid_single_target() {
        let dir = tempfile::tempdir().unwrap();
        let (name, target) = setup_target(dir.path(), "Main");
        let mut raw = RawConfig::default();
        raw.targets.insert(name, target);

        let store = PathStore::new();
        let config_path = dir.path().join("elm-watch.json");
        fs::write(&config_path, b"{}").unwrap();

        let project = build(&config_path, raw, "elm", &store).unwrap();
        assert_eq!(project.targets.len(), 1);
    }

    #[test]
    fn no_unique_project_flags_minority_targets() {
        let dir = tempfile::tempdir().unwrap();
        let sub_a = dir.path().join("a");
        let sub_b = dir.path().join("b");
        fs::create_dir_all(&sub_a).unwrap();
        fs::create_dir_all(&sub_b).unwrap();
        fs::write(sub_a.join("elm.json"), b"{}").unwrap();
        fs::write(sub_b.join("elm.json"), b"{}").unwrap();

        let (name_a, target_a) = setup_target(&sub_a, "A");
        let (name_b, target_b) = setup_target(&sub_b, "B");

        let mut targets = BTreeMap::new();
        targets.insert(
            name_a.clone(),
            Target {
                name: name_a.clone(),
                inputs: target_a.inputs,
                output: target_a.output,
                postprocess: None,
            },
        );
        targets.insert(
            name_b.clone(),
            Target {
                name: name_b.clone(),
                inputs: target_b.inputs,
                output: target_b.output,
                postprocess: None,
            },
        );

        let store = PathStore::new();
        let (project_file, losers) = resolve_project_file(&targets, &store);
        assert!(project_file.is_some());
        assert_eq!(losers.len(), 1);
    }

    #[test]
    fn postprocess_node_strips_marker_token() {
        let parsed = parse_postprocess(vec!["elm-watch-node".to_string(), "scripts/post.js".to_string()]);
        assert_eq!(parsed, Postprocess::Node(PathBuf::from("scripts/post.js")));
    }

    #[test]
    fn postprocess_external_command_kept_verbatim() {
        let parsed = parse_postprocess(vec!["prettier".to_string(), "--stdin-filepath".to_string()]);
        assert_eq!(
            parsed,
            Postprocess::Command(vec!["prettier".to_string(), "--stdin-filepath".to_string()])
        );
    }
}
