//! CompilerDriver: external compiler invocations, classification of their
//! results, and cooperative interruption (§4.5).

pub mod report;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, ErrorKind};
use crate::project::Target;
pub use report::CompilerReport;

/// Default grace period between SIGTERM and SIGKILL, overridable by
/// `__ELM_WATCH_ELM_TIMEOUT_MS` for tests (§5).
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Which kind of invocation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Full build: emit a JavaScript artifact.
    Compile,
    /// Verify the program but discard code generation.
    TypecheckOnly,
}

/// Which of the compiler's own build modes to request (§3 `TargetPreferences`,
/// §6 CLI `--debug`/`--optimize`). Orthogonal to [`Mode`]: this only matters
/// when [`Mode::Compile`] is in effect — a typecheck-only run never reaches
/// code generation, so the flag would have nothing to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompileMode {
    /// Verbose runtime checks, unminified.
    Debug,
    /// Plain development build.
    #[default]
    Standard,
    /// Dead-code elimination and minification.
    Optimize,
}

impl CompileMode {
    /// The command-line flag this mode adds to the compiler invocation, if
    /// any (`Standard` adds none).
    #[must_use]
    fn flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => Some("--debug"),
            Self::Standard => None,
            Self::Optimize => Some("--optimize"),
        }
    }
}

/// The outcome of one compiler invocation (§4.5's three-way classification).
#[derive(Debug)]
pub enum Outcome {
    /// Exit 0, empty stderr: `artifact` holds the produced JavaScript
    /// (empty for [`Mode::TypecheckOnly`]).
    Success { artifact: String },
    /// Exit 1 with a stderr payload this driver knows how to interpret.
    Recognised(crate::error::Error),
    /// Anything this driver doesn't have a rule for.
    Unrecognised { stdout: String, stderr: String, exit_code: Option<i32> },
}

/// Per-project-file interrupt handle, letting the scheduler cancel whatever
/// child is currently running for that project file.
#[derive(Clone, Default)]
struct RunningChild(Arc<Mutex<Option<Child>>>);

/// Per-project-file slot: `exec_lock` is held for the full spawn-to-wait
/// span of one invocation, so two threads racing to compile the same
/// project file (two targets sharing an `elm.json`, §4.5) are genuinely
/// serialised rather than merely sharing a handle that the second spawn
/// clobbers.
#[derive(Clone, Default)]
struct ProjectFileSlot {
    exec_lock: Arc<Mutex<()>>,
    child: RunningChild,
}

impl RunningChild {
    fn set(&self, child: Child) {
        *self.0.lock().unwrap() = Some(child);
    }

    /// Sends SIGTERM, waits up to `grace_period`, then SIGKILL. Blocks until
    /// the child has actually exited.
    fn interrupt(&self, grace_period: Duration) {
        let mut guard = self.0.lock().unwrap();
        let Some(child) = guard.as_mut() else {
            return;
        };

        send_sigterm(child);

        let deadline = Instant::now() + grace_period;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    break;
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(5)),
                Err(_) => break,
            }
        }
        *guard = None;
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    #[allow(unsafe_code)]
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.kill();
}

/// Wraps the compiler executable, enforcing the single-invocation-per-project-file
/// rule and supporting cooperative interruption.
pub struct CompilerDriver {
    executable: PathBuf,
    grace_period: Duration,
    running: Mutex<BTreeMap<PathBuf, ProjectFileSlot>>,
}

impl CompilerDriver {
    /// Creates a driver that invokes `executable` (resolved against PATH by
    /// the OS loader if not absolute).
    #[must_use]
    pub fn new(executable: PathBuf, grace_period: Duration) -> Self {
        Self {
            executable,
            grace_period,
            running: Mutex::new(BTreeMap::new()),
        }
    }

    /// Compiles a synthetic empty module to a null sink, to trigger
    /// dependency installation without producing a real artifact.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ElmNotFound`] (enriched with PATH) if the
    /// executable could not be spawned, or [`ErrorKind::TroubleSpawningCommand`]
    /// for any other spawn failure.
    pub fn install_dependencies(&self, project_file: &Path) -> crate::error::Result<Outcome> {
        let dir = project_file.parent().unwrap_or_else(|| Path::new("."));
        let mut command = Command::new(&self.executable);
        command
            .current_dir(dir)
            .arg("make")
            .arg("--output=/dev/null")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = self.run_to_completion(project_file, command)?;
        Ok(self.classify_install(output))
    }

    /// Invokes the compiler for `target` in `mode`, optionally requesting
    /// `--report=json`.
    ///
    /// # Errors
    ///
    /// See [`Self::install_dependencies`].
    pub fn compile(
        &self,
        project_file: &Path,
        target: &Target,
        mode: Mode,
        compile_mode: CompileMode,
        report_json: bool,
    ) -> crate::error::Result<Outcome> {
        let dir = project_file.parent().unwrap_or_else(|| Path::new("."));
        let mut command = Command::new(&self.executable);
        command.current_dir(dir).arg("make");
        for input in &target.inputs {
            command.arg(input);
        }
        if matches!(mode, Mode::TypecheckOnly) {
            command.arg("--output=/dev/null");
        } else {
            command.arg(format!("--output={}", target.output.display()));
            if let Some(flag) = compile_mode.flag() {
                command.arg(flag);
            }
        }
        if report_json {
            command.arg("--report=json");
        }
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let output = self.run_to_completion(project_file, command)?;
        Ok(self.classify_compile(output, report_json, project_file))
    }

    /// Sends SIGTERM (then SIGKILL after the grace period) to whatever
    /// compiler child is currently running for `project_file`, and blocks
    /// until it has exited.
    pub fn interrupt(&self, project_file: &Path) {
        let slot = self.running.lock().unwrap().get(project_file).cloned();
        if let Some(slot) = slot {
            slot.child.interrupt(self.grace_period);
        }
    }

    fn run_to_completion(
        &self,
        project_file: &Path,
        mut command: Command,
    ) -> crate::error::Result<RawOutput> {
        let slot = {
            let mut running = self.running.lock().unwrap();
            running
                .entry(project_file.to_path_buf())
                .or_insert_with(ProjectFileSlot::default)
                .clone()
        };

        // Held for the whole spawn-to-wait span: a second thread wanting to
        // compile the same project file queues here instead of racing to
        // set a handle the first invocation is still using (§4.5).
        let _exec_guard = slot.exec_lock.lock().unwrap();
        let handle = slot.child;

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::new(ErrorKind::ElmNotFound).with_context(enrich_with_path(&self.executable))
            } else {
                Error::new(ErrorKind::TroubleSpawningCommand).with_context(e.to_string())
            }
        })?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        handle.set(child);

        // Reading to EOF and waiting happen outside the `running` map lock
        // so a concurrent `interrupt()` call can still look up this slot's
        // handle and send SIGTERM while this thread blocks on I/O.
        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut out) = stdout_pipe.take() {
            let _ = out.read_to_string(&mut stdout);
        }
        if let Some(mut err) = stderr_pipe.take() {
            let _ = err.read_to_string(&mut stderr);
        }

        let exit_code = {
            let mut guard = handle.0.lock().unwrap();
            let code = guard.as_mut().and_then(|c| c.wait().ok()).and_then(|s| s.code());
            *guard = None;
            code
        };

        Ok(RawOutput { stdout, stderr, exit_code })
    }

    fn classify_install(&self, output: RawOutput) -> Outcome {
        if output.exit_code == Some(0) && output.stderr.is_empty() {
            return Outcome::Success { artifact: String::new() };
        }
        if output.exit_code == Some(1) && looks_like_dependency_failure(&output.stderr) {
            return Outcome::Recognised(
                Error::new(ErrorKind::DependencyFetchError).with_context(output.stderr.clone()),
            );
        }
        Outcome::Unrecognised {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        }
    }

    fn classify_compile(&self, output: RawOutput, report_json: bool, project_file: &Path) -> Outcome {
        if output.exit_code == Some(0) && output.stderr.is_empty() {
            return Outcome::Success { artifact: output.stdout };
        }

        if output.exit_code == Some(1) && report_json {
            return match serde_json::from_str::<CompilerReport>(&output.stderr) {
                Ok(report) => Outcome::Recognised(
                    Error::new(ErrorKind::UnexpectedElmOutput)
                        .with_context(format!("{} problem(s) reported", report.problem_count())),
                ),
                Err(_) => {
                    let report_path = write_raw_report(project_file, &output.stderr);
                    Outcome::Recognised(
                        Error::new(ErrorKind::TroubleWithJsonReport)
                            .with_path(report_path)
                            .with_context("stderr was not valid compiler JSON"),
                    )
                }
            };
        }

        Outcome::Unrecognised {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
        }
    }
}

struct RawOutput {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
}

/// §4.5: the install-stage stderr regex is part of the compatibility
/// contract with a specific compiler version and must be captured from
/// integration testing rather than invented (see the Open Questions
/// decisions in the design notes). This substring check is a placeholder
/// narrow enough not to misclassify arbitrary failures as dependency
/// fetch errors.
fn looks_like_dependency_failure(stderr: &str) -> bool {
    stderr.contains("PROBLEM LOADING PACKAGE LIST") || stderr.contains("CORRUPT DEPENDENCY CACHE")
}

/// Builds the `ElmNotFound` enrichment message: a formatted listing of the
/// PATH-like environment variables consulted when spawning `executable`.
///
/// Windows has more than one PATH-like variable; Unix has exactly one.
fn enrich_with_path(executable: &Path) -> String {
    let mut vars = vec!["PATH".to_string()];
    if cfg!(windows) {
        vars.push("Path".to_string());
    }
    let rendered: Vec<String> = vars
        .iter()
        .map(|name| {
            let value = std::env::var(name).unwrap_or_default();
            format!("{name}={value}")
        })
        .collect();
    format!(
        "could not find {:?} on:\n{}",
        executable.display(),
        rendered.join("\n")
    )
}

fn write_raw_report(project_file: &Path, stderr: &str) -> PathBuf {
    let dir = project_file.parent().unwrap_or_else(|| Path::new("."));
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let path = dir.join(format!("elm-watch-report-{millis}.txt"));
    let _ = std::fs::write(&path, stderr);
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_like_dependency_failure_matches_known_phrase() {
        assert!(looks_like_dependency_failure("PROBLEM LOADING PACKAGE LIST\n..."));
        assert!(!looks_like_dependency_failure("some other error"));
    }

    #[test]
    fn enrich_with_path_includes_executable_name() {
        let message = enrich_with_path(Path::new("elm"));
        assert!(message.contains("elm"));
        assert!(message.contains("PATH="));
    }

    #[test]
    fn compile_mode_flags_match_documented_values() {
        assert_eq!(CompileMode::Debug.flag(), Some("--debug"));
        assert_eq!(CompileMode::Standard.flag(), None);
        assert_eq!(CompileMode::Optimize.flag(), Some("--optimize"));
    }

    #[test]
    fn spawning_missing_executable_is_elm_not_found() {
        let driver = CompilerDriver::new(PathBuf::from("/no/such/elm-binary"), Duration::from_millis(50));
        let target = Target {
            name: "Main".to_string(),
            inputs: vec![PathBuf::from("src/Main.elm")],
            output: PathBuf::from("build/main.js"),
            postprocess: None,
        };
        let err = driver
            .compile(Path::new("/tmp/elm.json"), &target, Mode::Compile, CompileMode::Standard, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ElmNotFound);
    }
}
