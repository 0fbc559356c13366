//! The `elm-watch` command-line surface: `init`, `make`, `hot`, `help` (§6).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::compiler::CompileMode;
use crate::config;
use crate::error::{Error, ErrorKind};
use crate::orchestrator::{self, RuntimeConfig};
use crate::path_store::PathStore;
use crate::project;

/// Name of the compiler executable this orchestrator shells out to.
///
/// Hardcoded rather than configurable: §6 doesn't expose a way to change it,
/// and every target's compiler project file is assumed to use the same
/// toolchain.
const COMPILER_EXECUTABLE: &str = "elm";

#[derive(Parser, Debug)]
#[command(name = "elm-watch", version, about = "Development-time build orchestrator with hot-reload watch mode")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scaffold a starter `elm-watch.json` in the current directory.
    Init,
    /// Compile every enabled target once and exit.
    Make(BuildArgs),
    /// Compile and keep watching, serving a hot-reload WebSocket endpoint.
    Hot(BuildArgs),
    /// Print usage information.
    Help,
}

#[derive(clap::Args, Debug)]
struct BuildArgs {
    /// Build in debug mode (verbose runtime checks, unminified).
    #[arg(long)]
    debug: bool,
    /// Build in optimize mode (dead-code elimination, minification).
    #[arg(long)]
    optimize: bool,
    /// Target names to build; all enabled targets when empty.
    targets: Vec<String>,
}

impl BuildArgs {
    fn validate(&self) -> crate::error::Result<()> {
        if self.debug && self.optimize {
            return Err(Error::new(ErrorKind::ClashingFlags)
                .with_context("--debug and --optimize cannot both be given"));
        }
        Ok(())
    }

    fn compile_mode(&self) -> CompileMode {
        if self.debug {
            CompileMode::Debug
        } else if self.optimize {
            CompileMode::Optimize
        } else {
            CompileMode::Standard
        }
    }
}

/// Compiler flags a user might mistakenly pass straight to `elm-watch`
/// instead of placing in `elm-watch.json`'s `postprocess`/target config
/// (§6: "when the unknown args look like compiler invocations, suggestions
/// to move them into configuration are printed").
const COMPILER_LOOKING_FLAGS: &[&str] = &["--output", "--report", "--docs", "--optimize", "--debug"];

/// Parses `argv`, runs the requested subcommand, and returns the process
/// exit code (§6: `0` success, `1` any error, including a bad flag).
#[must_use]
pub fn run() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(clap_error) => {
            return handle_parse_error(&clap_error);
        }
    };
    let result = match cli.command {
        Command::Init => cmd_init(),
        Command::Make(args) => cmd_make(args),
        Command::Hot(args) => cmd_hot(args),
        Command::Help => {
            print_help();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Turns a clap parse failure into §6's `UnexpectedFlags` behaviour: print
/// the error (clap's own `--help`/`--version` requests are passed through
/// unchanged, since those aren't failures), append a suggestion when an
/// unrecognised argument resembles a known compiler flag, and exit 1.
fn handle_parse_error(clap_error: &clap::Error) -> ExitCode {
    use clap::error::ErrorKind as ClapErrorKind;
    if matches!(clap_error.kind(), ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion) {
        print!("{clap_error}");
        return ExitCode::SUCCESS;
    }

    eprint!("{clap_error}");
    let rendered = clap_error.to_string();
    for flag in COMPILER_LOOKING_FLAGS {
        if rendered.contains(flag) {
            eprintln!(
                "note: `{flag}` looks like a compiler flag; move it into the target's \
                 `elm-watch.json` entry instead of passing it on the command line."
            );
            break;
        }
    }
    ExitCode::FAILURE
}

fn print_help() {
    println!(
        "elm-watch\n\n\
         Usage: elm-watch <init|make|hot|help> [target names…]\n\n\
         init   Scaffold a starter elm-watch.json\n\
         make   Compile every enabled target once and exit\n\
         hot    Compile and keep watching with hot-reload\n\
         help   Print this message"
    );
}

fn cmd_init() -> crate::error::Result<()> {
    let path = PathBuf::from(config::FILE_NAME);
    if path.exists() {
        return Err(Error::new(ErrorKind::InvalidConfig)
            .with_path(&path)
            .with_context("elm-watch.json already exists"));
    }
    let starter = r#"{
  "targets": {
    "Main": {
      "inputs": ["src/Main.elm"],
      "output": "build/main.js"
    }
  }
}
"#;
    std::fs::write(&path, starter)
        .map_err(|e| Error::new(ErrorKind::TroubleWritingFile).with_path(&path).with_context(e.to_string()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn load_project() -> crate::error::Result<(PathBuf, project::Project)> {
    let cwd = std::env::current_dir()
        .map_err(|e| Error::new(ErrorKind::ConfigNotFound).with_context(e.to_string()))?;
    let config_path = config::find_nearest(&cwd).ok_or_else(|| Error::new(ErrorKind::ConfigNotFound))?;
    let raw = config::load(&config_path)?;
    let store = PathStore::new();
    let project = project::build(&config_path, raw, "elm", &store)?;
    let project_root = project
        .config_path
        .as_path()
        .parent()
        .map(std::path::Path::to_path_buf)
        .unwrap_or(cwd);
    Ok((project_root, project))
}

/// Resolves the requested target names against the project, applying §6's
/// "unknown substring" and empty-selects-all rules.
fn resolve_enabled(project: &project::Project, requested: &[String]) -> crate::error::Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(project.targets.keys().cloned().collect());
    }
    let mut enabled = Vec::new();
    let mut unknown = Vec::new();
    for substring in requested {
        let matches: Vec<String> =
            project.targets.keys().filter(|name| name.contains(substring.as_str())).cloned().collect();
        if matches.is_empty() {
            unknown.push(substring.clone());
        } else {
            enabled.extend(matches);
        }
    }
    if !unknown.is_empty() {
        return Err(Error::new(ErrorKind::UnknownTargetsSubstrings)
            .with_context(format!("no target matched: {}", unknown.join(", "))));
    }
    enabled.sort();
    enabled.dedup();
    Ok(enabled)
}

fn cmd_make(args: BuildArgs) -> crate::error::Result<()> {
    args.validate()?;
    let (_project_root, project) = load_project()?;
    let enabled = resolve_enabled(&project, &args.targets)?;
    let config = RuntimeConfig::from_env();
    orchestrator::run_make(&project, &enabled, &PathBuf::from(COMPILER_EXECUTABLE), args.compile_mode(), &config)
}

fn cmd_hot(args: BuildArgs) -> crate::error::Result<()> {
    args.validate()?;
    let (project_root, project) = load_project()?;
    let enabled = resolve_enabled(&project, &args.targets)?;
    let config = RuntimeConfig::from_env();
    let persisted_state_path = project_root.join("elm-stuff").join("elm-watch").join("stuff.json");
    orchestrator::run_hot(
        &project_root,
        &project,
        &enabled,
        &PathBuf::from(COMPILER_EXECUTABLE),
        args.compile_mode(),
        &persisted_state_path,
        &config,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn project_with(names: &[&str]) -> project::Project {
        let mut targets = BTreeMap::new();
        for name in names {
            targets.insert(
                (*name).to_string(),
                project::Target {
                    name: (*name).to_string(),
                    inputs: vec![PathBuf::from(format!("src/{name}.elm"))],
                    output: PathBuf::from(format!("build/{name}.js")),
                    postprocess: None,
                },
            );
        }
        project::Project {
            config_path: crate::path_store::test_support::absolute_path_unchecked(PathBuf::from(
                "/proj/elm-watch.json",
            )),
            targets,
            project_file: None,
            no_unique_project: Vec::new(),
            configured_port: None,
        }
    }

    #[test]
    fn build_args_rejects_clashing_flags() {
        let args = BuildArgs { debug: true, optimize: true, targets: Vec::new() };
        assert_eq!(args.validate().unwrap_err().kind(), ErrorKind::ClashingFlags);
    }

    #[test]
    fn build_args_compile_mode_follows_flags() {
        let standard = BuildArgs { debug: false, optimize: false, targets: Vec::new() };
        let debug = BuildArgs { debug: true, optimize: false, targets: Vec::new() };
        let optimize = BuildArgs { debug: false, optimize: true, targets: Vec::new() };
        assert_eq!(standard.compile_mode(), CompileMode::Standard);
        assert_eq!(debug.compile_mode(), CompileMode::Debug);
        assert_eq!(optimize.compile_mode(), CompileMode::Optimize);
    }

    #[test]
    fn resolve_enabled_defaults_to_everything() {
        let project = project_with(&["Main", "Other"]);
        let enabled = resolve_enabled(&project, &[]).unwrap();
        assert_eq!(enabled, vec!["Main".to_string(), "Other".to_string()]);
    }

    #[test]
    fn resolve_enabled_matches_substrings() {
        let project = project_with(&["Main", "Other"]);
        let enabled = resolve_enabled(&project, &["Mai".to_string()]).unwrap();
        assert_eq!(enabled, vec!["Main".to_string()]);
    }

    #[test]
    fn resolve_enabled_rejects_unknown_substring() {
        let project = project_with(&["Main"]);
        let err = resolve_enabled(&project, &["Nope".to_string()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownTargetsSubstrings);
    }
}
