//! Wires every subsystem into the two run loops a caller actually invokes:
//! one-shot [`run_make`] and watch-mode [`run_hot`] (§5).
//!
//! Everything that touches `TargetState` happens on the thread that calls
//! these functions; compiler/postprocess invocations are offloaded to
//! worker threads whose completion is reported back through an
//! [`std::sync::mpsc`] channel, exactly as §5 describes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::compiler::{CompileMode, CompilerDriver, Mode, Outcome};
use crate::config;
use crate::dependency_graph::DependencyGraph;
use crate::error::{Error, ErrorKind, Result};
use crate::hot_runtime;
use crate::observability::LatestEvents;
use crate::path_store::PathStore;
use crate::persisted_state::{self, BrowserUiPosition, CompilationMode, PersistedState, TargetPreferences};
use crate::postprocess::{self, PostprocessArgs};
use crate::project::{self as project_model, Project, Target};
use crate::scheduler::{Event, Phase, Scheduler};
use crate::signal;
use crate::tracing_compat::{info, warn};
use crate::watcher::{self, FileWatcher, Significance, DEFAULT_DEBOUNCE};
use crate::web::hub::{Hub, TargetRoster};
use crate::web::{ServerMessage, Status};

/// The compiler's module-file extension. Hardcoded for the same reason
/// `cli::COMPILER_EXECUTABLE` is: the whole orchestrator is wired to one
/// compiler toolchain.
const SOURCE_EXTENSION: &str = "elm";

/// Every timing knob §5/§6 lets a test shrink via an `__ELM_WATCH_*`
/// environment variable.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// File-watch debounce window (§4.3).
    pub debounce: Duration,
    /// SIGTERM → SIGKILL grace period for the compiler child (§5).
    pub compiler_grace_period: Duration,
    /// How long an idle postprocess worker survives before retirement (§4.6).
    pub postprocess_idle_timeout: Duration,
    /// How long the editor-open command is allowed to run (§4.8).
    pub editor_timeout: Duration,
    /// Shared admission slot budget for ElmMake/Postprocess (§4.7).
    pub slot_budget: usize,
    /// `ELM_WATCH_EXIT_ON_STDIN_END` (§6): exit watch mode once stdin closes,
    /// so the process doesn't outlive a parent that piped it a dummy stdin.
    pub exit_on_stdin_end: bool,
    /// `__ELM_WATCH_EXIT_ON_ERROR` (§7): test-only override that makes watch
    /// mode exit on the first per-target error instead of awaiting the next
    /// event.
    pub exit_on_error: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            compiler_grace_period: crate::compiler::DEFAULT_GRACE_PERIOD,
            postprocess_idle_timeout: Duration::from_secs(60),
            editor_timeout: Duration::from_secs(5),
            slot_budget: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
            exit_on_stdin_end: false,
            exit_on_error: false,
        }
    }
}

impl RuntimeConfig {
    /// Reads the `__ELM_WATCH_*` test-stabilisation overrides from the
    /// environment, falling back to the documented defaults (§6).
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_millis("__ELM_WATCH_DEBOUNCE_MS") {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("__ELM_WATCH_ELM_TIMEOUT_MS") {
            config.compiler_grace_period = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("__ELM_WATCH_WORKER_IDLE_TIMEOUT_MS") {
            config.postprocess_idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("__ELM_WATCH_OPEN_EDITOR_TIMEOUT_MS") {
            config.editor_timeout = Duration::from_millis(ms);
        }
        config.exit_on_stdin_end = std::env::var_os("ELM_WATCH_EXIT_ON_STDIN_END").is_some();
        config.exit_on_error = std::env::var_os("__ELM_WATCH_EXIT_ON_ERROR").is_some();
        config
    }
}

fn env_millis(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

/// Compiles and writes every enabled target once, then returns.
///
/// No watcher, no hub, no hot-runtime injection: §1's "one-shot `make`"
/// path. Each target is typechecked-and-built in full regardless of
/// connection state (there are no browsers to be typecheck-only for).
///
/// # Errors
///
/// Returns the first fatal [`Error`] encountered (e.g. the compiler
/// executable is missing); individual target compile/postprocess failures
/// are reported and counted but do not stop the remaining targets from
/// being attempted.
pub fn run_make(
    project: &Project,
    enabled: &[String],
    compiler_executable: &Path,
    compile_mode: CompileMode,
    config: &RuntimeConfig,
) -> Result<()> {
    let driver = CompilerDriver::new(compiler_executable.to_path_buf(), config.compiler_grace_period);
    let pool = Mutex::new(postprocess::Pool::new(config.slot_budget, config.postprocess_idle_timeout));
    let mut failures = Vec::new();

    for name in enabled {
        let Some(target) = project.targets.get(name) else {
            continue;
        };
        let Some(project_file) = &project.project_file else {
            return Err(Error::new(ErrorKind::NoUniqueProject)
                .with_context("no single compiler project file covers the enabled targets"));
        };

        match build_one(&driver, &pool, project_file.as_path(), target, Mode::Compile, compile_mode, false, None) {
            Ok(_code) => info!(target = name.as_str(), "compiled"),
            Err(e) => {
                warn!(target = name.as_str(), error = %e, "build failed");
                failures.push(name.clone());
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::UnexpectedElmOutput)
            .with_context(format!("targets failed to build: {}", failures.join(", "))))
    }
}

/// Compiles one target end to end: compile, optional postprocess, optional
/// hot-runtime injection (when `server_url` is given), then an atomic write
/// to the target's output path.
fn build_one(
    driver: &CompilerDriver,
    pool: &Mutex<postprocess::Pool>,
    project_file: &Path,
    target: &Target,
    mode: Mode,
    compile_mode: CompileMode,
    watch_mode: bool,
    server_url: Option<(&str, u64)>,
) -> Result<String> {
    let outcome = driver.compile(project_file, target, mode, compile_mode, true)?;
    let artifact = match outcome {
        Outcome::Success { artifact } => artifact,
        Outcome::Recognised(e) => return Err(e),
        Outcome::Unrecognised { stdout, stderr, exit_code } => {
            return Err(Error::new(ErrorKind::UnexpectedElmOutput)
                .with_context(format!("exit={exit_code:?} stdout={stdout} stderr={stderr}")));
        }
    };

    if matches!(mode, Mode::TypecheckOnly) {
        return Ok(String::new());
    }

    let mut code = artifact;
    if let Some(postprocess) = &target.postprocess {
        let args = PostprocessArgs {
            code: code.clone(),
            target_name: target.name.clone(),
            compilation_mode: compile_mode_label(compile_mode).to_string(),
            run_mode: if watch_mode { "hot".to_string() } else { "make".to_string() },
            argv: Vec::new(),
        };
        code = pool.lock().unwrap().run(postprocess, &args)?;
    }

    if let Some((url, compiled_at)) = server_url {
        code = hot_runtime::inject(&code, &target.name, url, compiled_at)?;
    }

    write_output(&target.output, &code)?;
    Ok(code)
}

/// Label passed to postprocess workers' `compilationMode` field (§4.6).
fn compile_mode_label(mode: CompileMode) -> &'static str {
    match mode {
        CompileMode::Debug => "debug",
        CompileMode::Standard => "standard",
        CompileMode::Optimize => "optimize",
    }
}

/// Converts a browser-requested [`CompilationMode`] into the compiler-facing
/// [`CompileMode`] the driver shells out with.
fn to_compile_mode(mode: CompilationMode) -> CompileMode {
    match mode {
        CompilationMode::Debug => CompileMode::Debug,
        CompilationMode::Standard => CompileMode::Standard,
        CompilationMode::Optimize => CompileMode::Optimize,
    }
}

/// The inverse of [`to_compile_mode`], for reporting the mode actually used
/// back to the browser in `SuccessfullyCompiled` (§4.8).
fn from_compile_mode(mode: CompileMode) -> CompilationMode {
    match mode {
        CompileMode::Debug => CompilationMode::Debug,
        CompileMode::Standard => CompilationMode::Standard,
        CompileMode::Optimize => CompilationMode::Optimize,
    }
}

/// Applies `update` to `target`'s persisted preferences record (creating one
/// if absent) and writes the file, warning (not failing) on write trouble
/// per §4.2's `TroubleWritingPersistedState`.
fn persist_target_preference(
    persisted: &mut PersistedState,
    persisted_state_path: &Path,
    target: &str,
    update: impl FnOnce(&mut TargetPreferences),
) {
    update(persisted.targets.entry(target.to_string()).or_default());
    if let Err(e) = persisted_state::write(persisted_state_path, persisted) {
        warn!(error = %e, "failed to persist target preference");
    }
}

fn write_output(output: &Path, code: &str) -> Result<()> {
    let dir = output.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| {
        Error::new(ErrorKind::TroubleWritingFile).with_path(output).with_context(e.to_string())
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        Error::new(ErrorKind::TroubleWritingFile).with_path(output).with_context(e.to_string())
    })?;
    use std::io::Write as _;
    tmp.write_all(code.as_bytes()).map_err(|e| {
        Error::new(ErrorKind::TroubleWritingFile).with_path(output).with_context(e.to_string())
    })?;
    tmp.persist(output)
        .map_err(|e| Error::new(ErrorKind::TroubleWritingFile).with_path(output).with_context(e.error.to_string()))?;
    Ok(())
}

/// Internal events the single-threaded hot-mode loop reacts to, folding
/// together watcher events, hub events, worker completions, and shutdown.
enum LoopEvent {
    Scheduler(Event),
    WorkerDone { target: String, result: std::result::Result<BuildSuccess, Error> },
}

/// What a successful [`dispatch_build`] worker reports back, carried over to
/// the `SuccessfullyCompiled` broadcast (§4.8).
struct BuildSuccess {
    code: String,
    compiled_at: u64,
    compile_mode: CompileMode,
}

/// Runs the persistent watch loop: FileWatcher + WebSocketHub + Scheduler +
/// CompilerDriver + PostprocessPool + HotRuntime Injector, all driven from
/// one event-loop thread (§5).
///
/// Returns once cooperative shutdown has been requested and every in-flight
/// build has drained.
///
/// # Errors
///
/// Returns a fatal [`Error`] (§7 `is_fatal_to_watch_mode`) if the watcher or
/// the configuration can't be recovered from; per-target build failures are
/// reported to connected browsers and do not stop the loop.
pub fn run_hot(
    project_root: &Path,
    project: &Project,
    enabled: &[String],
    compiler_executable: &Path,
    default_compile_mode: CompileMode,
    persisted_state_path: &Path,
    config: &RuntimeConfig,
) -> Result<()> {
    let persisted = match persisted_state::read(persisted_state_path) {
        persisted_state::ReadOutcome::Parsed(state) => state,
        persisted_state::ReadOutcome::Missing => PersistedState::default(),
        persisted_state::ReadOutcome::Invalid(reason) => {
            warn!(reason = reason.as_str(), "persisted state unreadable, starting fresh");
            PersistedState::default()
        }
    };

    let (events_tx, events_rx) = mpsc::channel::<Event>();

    let roster = TargetRoster {
        all: project.targets.keys().cloned().collect(),
        enabled: enabled.iter().cloned().collect(),
    };
    let configured_port = project.configured_port;
    let hub = Arc::new(Hub::new(
        if persisted.port == 0 { None } else { Some(persisted.port) },
        configured_port,
        roster,
        events_tx.clone(),
    )?);

    let mut persisted = persisted;
    if persisted.port != hub.port() {
        persisted.port = hub.port();
        if let Err(e) = persisted_state::write(persisted_state_path, &persisted) {
            warn!(error = %e, "failed to persist chosen port");
        }
    }

    {
        let hub = Arc::clone(&hub);
        thread::spawn(move || hub.run());
    }

    let watcher = FileWatcher::new(project_root, config.debounce)?;
    let shutdown = signal::install().map_err(|e| {
        Error::new(ErrorKind::WatcherError).with_context(format!("signal install failed: {e}"))
    })?;

    {
        let tx = events_tx.clone();
        let shutdown = shutdown.clone();
        thread::spawn(move || loop {
            if shutdown.is_set() {
                let _ = tx.send(Event::ShutdownRequested);
                return;
            }
            thread::sleep(Duration::from_millis(50));
        });
    }

    if config.exit_on_stdin_end {
        let tx = events_tx.clone();
        thread::spawn(move || {
            use std::io::Read as _;
            let mut sink = [0u8; 64];
            // Any read that reports 0 bytes or an error means stdin closed.
            while let Ok(n) = std::io::stdin().read(&mut sink) {
                if n == 0 {
                    break;
                }
            }
            let _ = tx.send(Event::ShutdownRequested);
        });
    }

    let target_names: Vec<String> = project.targets.keys().cloned().collect();
    let mut target_modes: HashMap<String, CompileMode> = target_names
        .iter()
        .map(|name| {
            let mode = persisted
                .targets
                .get(name)
                .and_then(|prefs| prefs.compilation_mode)
                .map_or(default_compile_mode, to_compile_mode);
            (name.clone(), mode)
        })
        .collect();
    let mut scheduler = Scheduler::new(&target_names, config.slot_budget);
    let mut timeline = LatestEvents::new();
    let mut dependency_graph = DependencyGraph::new();
    let mut project = project.clone();
    let driver = Arc::new(CompilerDriver::new(compiler_executable.to_path_buf(), config.compiler_grace_period));
    let pool = Arc::new(Mutex::new(postprocess::Pool::new(config.slot_budget, config.postprocess_idle_timeout)));
    let mut record_signatures: HashMap<String, String> = HashMap::new();
    let (worker_tx, worker_rx) = mpsc::channel::<LoopEvent>();

    for name in &target_names {
        if let Some(target) = project.targets.get(name) {
            let source_dirs = source_directories(target);
            let _ = dependency_graph.rebuild(name, &target.inputs, &source_dirs, SOURCE_EXTENSION);
        }
    }
    for name in enabled {
        scheduler.touch(name);
    }

    let mut first_error: Option<Error> = None;

    loop {
        pool.lock().unwrap().retire_idle(scheduler_active_target_count(&scheduler, &target_names));

        if scheduler.shutdown_requested() && scheduler.is_quiescent() {
            break;
        }

        while let Some(name) = scheduler.admit_next() {
            let Some(target) = project.targets.get(&name).cloned() else {
                scheduler.release_slot();
                continue;
            };
            let Some(project_file) = project.project_file.clone() else {
                scheduler.fail(&name);
                scheduler.release_slot();
                continue;
            };
            let compile_mode = target_modes.get(&name).copied().unwrap_or(default_compile_mode);
            // §4.7 phase policy: no connected session means typecheck-only,
            // with no hot-runtime server URL to inject (there's no browser
            // to talk to yet).
            let mode = match scheduler.phase_for(&name) {
                Phase::FullBuild => Mode::Compile,
                Phase::TypecheckOnly => Mode::TypecheckOnly,
            };
            hub.broadcast(&name, &ServerMessage::StatusChanged { status: Status::Busy });
            dispatch_build(
                &name,
                target,
                project_file.into_path_buf(),
                Arc::clone(&driver),
                Arc::clone(&pool),
                worker_tx.clone(),
                hub.port(),
                compile_mode,
                mode,
            );
        }

        match recv_next(&watcher, &events_rx, &worker_rx, Duration::from_millis(100)) {
            Some(LoopEvent::Scheduler(event)) => {
                if let Event::FileChanged { kind, path } = &event {
                    let watch_event = watcher::WatchEvent { kind: *kind, path: path.clone() };
                    let significance = watcher::classify(
                        &watch_event,
                        &project.config_path,
                        project.project_file.as_ref(),
                        |p| !dependency_graph.affected_by(p).is_empty(),
                    );
                    match significance {
                        Significance::ConfigFile => {
                            reload_config(&mut project, &mut scheduler, &driver, &mut timeline, &target_names);
                        }
                        Significance::ProjectFile => {
                            // §4.3: a project-file event reinstalls dependencies
                            // for every target, then every target is recompiled.
                            note(&mut timeline, format!("project file {} changed", path.display()));
                            if let Some(pf) = project.project_file.clone() {
                                if let Err(e) = driver.install_dependencies(pf.as_path()) {
                                    warn!(error = %e, "dependency reinstall failed");
                                }
                            }
                            for name in &target_names {
                                scheduler.touch(name);
                                signal_interrupt_if_active(&scheduler, &driver, project.project_file.as_deref(), name);
                            }
                        }
                        Significance::Imported => {
                            note(&mut timeline, format!("changed {}", path.display()));
                            for target in dependency_graph.affected_by(path) {
                                scheduler.touch(&target);
                                signal_interrupt_if_active(&scheduler, &driver, project.project_file.as_deref(), &target);
                            }
                        }
                        Significance::NotImported => {
                            info!(path = %path.display(), "not imported by any target");
                        }
                    }
                } else {
                    match &event {
                        Event::SessionConnected { target, .. } => {
                            note(&mut timeline, format!("browser connected for {target}"));
                        }
                        Event::SessionDisconnected { target, .. } => {
                            note(&mut timeline, format!("browser disconnected from {target}"));
                        }
                        Event::ChangedCompilationMode { target, mode } => {
                            persist_target_preference(
                                &mut persisted,
                                persisted_state_path,
                                target,
                                |prefs| prefs.compilation_mode = Some(*mode),
                            );
                            target_modes.insert(target.clone(), to_compile_mode(*mode));
                        }
                        Event::ChangedBrowserUiPosition { target, position } => {
                            persist_target_preference(
                                &mut persisted,
                                persisted_state_path,
                                target,
                                |prefs| prefs.browser_ui_position = Some(*position),
                            );
                        }
                        Event::ChangedOpenErrorOverlay { target, open } => {
                            persist_target_preference(
                                &mut persisted,
                                persisted_state_path,
                                target,
                                |prefs| prefs.open_error_overlay = Some(*open),
                            );
                        }
                        _ => {}
                    }
                    let affected_targets: Vec<String> = match event.target() {
                        Some(t) => vec![t.to_string()],
                        None => target_names.clone(),
                    };
                    scheduler.handle_event(event);
                    for name in &affected_targets {
                        signal_interrupt_if_active(&scheduler, &driver, project.project_file.as_deref(), name);
                    }
                }
            }
            Some(LoopEvent::WorkerDone { target, result }) => {
                scheduler.release_slot();
                let succeeded = result.is_ok();
                if let Err(e) = &result {
                    if config.exit_on_error && first_error.is_none() {
                        first_error = Some(e.clone());
                    }
                }
                let browser_ui_position = persisted
                    .targets
                    .get(&target)
                    .and_then(|prefs| prefs.browser_ui_position)
                    .unwrap_or(BrowserUiPosition::BottomRight);
                // §4.8: only a full build (non-empty code) can corrupt a
                // previously hot-patched page's record shapes.
                let record_fields_changed = match &result {
                    Ok(success) if !success.code.is_empty() => {
                        let signature = hot_runtime::record_field_signature(&success.code);
                        let changed = record_signatures
                            .get(&target)
                            .is_some_and(|previous| previous != &signature);
                        record_signatures.insert(target.clone(), signature);
                        changed
                    }
                    _ => false,
                };
                note(
                    &mut timeline,
                    if succeeded { format!("{target} compiled") } else { format!("{target} failed to compile") },
                );
                finish_build(&mut scheduler, &hub, &target, browser_ui_position, record_fields_changed, result);
                if succeeded {
                    if let Some(t) = project.targets.get(&target) {
                        let source_dirs = source_directories(t);
                        let _ = dependency_graph.rebuild(&target, &t.inputs, &source_dirs, SOURCE_EXTENSION);
                    }
                }
                if first_error.is_some() {
                    scheduler.handle_event(Event::ShutdownRequested);
                }
            }
            None => {}
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Records `summary` in `timeline` and logs the ring's current rendering
/// (§3 `LatestEvents`: a small ring of recent user-visible events the
/// terminal collaborator renders, older ones collapsing into "(N more
/// events)").
fn note(timeline: &mut LatestEvents, summary: impl Into<String>) {
    let summary = summary.into();
    timeline.record(summary.clone());
    info!(timeline = %timeline.render_lines().join(" | "), "{summary}");
}

fn scheduler_active_target_count(scheduler: &Scheduler, names: &[String]) -> usize {
    names.iter().filter(|n| matches!(scheduler.state_of(n), Some(s) if s.is_active())).count()
}

/// If `name` is currently in an active phase (meaning the touch that just
/// happened set its `pending_restart` flag rather than re-queuing it from
/// idle), asks the driver to cancel the in-flight compile for
/// `project_file` in the background (§4.7 "the previous child is
/// signalled", §5 "Cancellation"). Fire-and-forget: the loop thread must
/// not block on the grace period, and `finish_build` picks up the
/// resulting `pending_restart` once the worker reports back.
fn signal_interrupt_if_active(
    scheduler: &Scheduler,
    driver: &Arc<CompilerDriver>,
    project_file: Option<&Path>,
    name: &str,
) {
    if !matches!(scheduler.state_of(name), Some(s) if s.is_active()) {
        return;
    }
    let Some(project_file) = project_file else {
        return;
    };
    let driver = Arc::clone(driver);
    let project_file = project_file.to_path_buf();
    thread::spawn(move || driver.interrupt(&project_file));
}

/// §4.3: "an event on the configuration file reloads configuration; if
/// reload fails, the previous configuration remains in effect until the next
/// successful reload". On success, every known target whose declaration
/// changed is re-touched so it recompiles with the new settings; targets
/// added or removed by the edit aren't picked up by the already-running
/// [`Scheduler`] (its target set is fixed at construction) and are reported
/// so the user knows a restart is needed to see them.
fn reload_config(
    project: &mut Project,
    scheduler: &mut Scheduler,
    driver: &Arc<CompilerDriver>,
    timeline: &mut LatestEvents,
    known_targets: &[String],
) {
    let raw = match config::load(project.config_path.as_path()) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "configuration reload failed, keeping previous configuration");
            return;
        }
    };
    let store = PathStore::new();
    let rebuilt = project_model::build(project.config_path.as_path(), raw, SOURCE_EXTENSION, &store);
    let new_project = match rebuilt {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "configuration reload failed, keeping previous configuration");
            return;
        }
    };

    let mut added_or_removed = false;
    for name in known_targets {
        match (project.targets.get(name), new_project.targets.get(name)) {
            (Some(old), Some(new)) if old != new => {
                scheduler.touch(name);
                signal_interrupt_if_active(scheduler, driver, project.project_file.as_deref(), name);
            }
            (Some(_), None) | (None, Some(_)) => added_or_removed = true,
            _ => {}
        }
    }
    if new_project.targets.keys().any(|name| !known_targets.contains(name)) {
        added_or_removed = true;
    }
    if added_or_removed {
        warn!("configuration reload added or removed targets; restart elm-watch to pick them up");
    }

    note(timeline, "configuration reloaded");
    *project = new_project;
}

fn source_directories(target: &Target) -> Vec<PathBuf> {
    target
        .inputs
        .iter()
        .filter_map(|p| p.parent().map(Path::to_path_buf))
        .collect()
}

fn dispatch_build(
    name: &str,
    target: Target,
    project_file: PathBuf,
    driver: Arc<CompilerDriver>,
    pool: Arc<Mutex<postprocess::Pool>>,
    worker_tx: Sender<LoopEvent>,
    hub_port: u16,
    compile_mode: CompileMode,
    mode: Mode,
) {
    let name = name.to_string();
    thread::spawn(move || {
        let server_url = format!("ws://127.0.0.1:{hub_port}");
        let compiled_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        // A typecheck-only build produces no artifact, so there's nothing
        // to hot-patch and no reason to tell it where the server lives.
        let server_url_arg = matches!(mode, Mode::Compile).then(|| (server_url.as_str(), compiled_at));
        let result = build_one(
            &driver,
            &pool,
            &project_file,
            &target,
            mode,
            compile_mode,
            true,
            server_url_arg,
        )
        .map(|code| BuildSuccess { code, compiled_at, compile_mode });
        let _ = worker_tx.send(LoopEvent::WorkerDone { target: name, result });
    });
}

fn finish_build(
    scheduler: &mut Scheduler,
    hub: &Hub,
    target: &str,
    browser_ui_position: BrowserUiPosition,
    record_fields_changed: bool,
    result: std::result::Result<BuildSuccess, Error>,
) {
    // §4.7 coalescing: an event that arrived while this build was in
    // flight takes precedence over whatever it produced — requeue instead
    // of finalising into `Succeeded`/`Failed`.
    if scheduler.has_pending_restart(target) {
        scheduler.child_exited_after_interrupt(target);
        return;
    }

    match result {
        Ok(success) => {
            scheduler.succeed(target);
            let message = if record_fields_changed {
                ServerMessage::SuccessfullyCompiledButRecordFieldsChanged
            } else {
                ServerMessage::SuccessfullyCompiled {
                    code: success.code,
                    elm_compiled_timestamp: success.compiled_at,
                    compilation_mode: from_compile_mode(success.compile_mode),
                    browser_ui_position,
                }
            };
            hub.broadcast(target, &message);
        }
        Err(e) => {
            scheduler.fail(target);
            hub.broadcast(
                target,
                &ServerMessage::StatusChanged { status: Status::CompileError { diagnostic: None } },
            );
            warn!(target = target, error = %e, "build failed");
        }
    }
}

fn recv_next(
    watcher: &FileWatcher,
    events_rx: &mpsc::Receiver<Event>,
    worker_rx: &mpsc::Receiver<LoopEvent>,
    timeout: Duration,
) -> Option<LoopEvent> {
    if let Ok(event) = events_rx.try_recv() {
        return Some(LoopEvent::Scheduler(event));
    }
    if let Ok(done) = worker_rx.try_recv() {
        return Some(done);
    }
    match watcher.recv(timeout) {
        Ok(Some(batch)) => batch.into_iter().next().map(|event| {
            LoopEvent::Scheduler(Event::FileChanged { kind: event.kind, path: event.path })
        }),
        Ok(None) => None,
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_config_defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.debounce, DEFAULT_DEBOUNCE);
        assert_eq!(config.compiler_grace_period, crate::compiler::DEFAULT_GRACE_PERIOD);
    }

    #[test]
    fn runtime_config_from_env_overrides_debounce() {
        std::env::set_var("__ELM_WATCH_DEBOUNCE_MS", "0");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.debounce, Duration::from_millis(0));
        std::env::remove_var("__ELM_WATCH_DEBOUNCE_MS");
    }

    #[test]
    fn write_output_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested/dir/main.js");
        write_output(&output, "var x = 1;").unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "var x = 1;");
    }

    #[test]
    fn compile_mode_label_matches_documented_values() {
        assert_eq!(compile_mode_label(CompileMode::Debug), "debug");
        assert_eq!(compile_mode_label(CompileMode::Standard), "standard");
        assert_eq!(compile_mode_label(CompileMode::Optimize), "optimize");
    }

    #[test]
    fn to_compile_mode_converts_every_browser_mode() {
        assert_eq!(to_compile_mode(CompilationMode::Debug), CompileMode::Debug);
        assert_eq!(to_compile_mode(CompilationMode::Standard), CompileMode::Standard);
        assert_eq!(to_compile_mode(CompilationMode::Optimize), CompileMode::Optimize);
    }

    #[test]
    fn from_compile_mode_is_the_inverse_of_to_compile_mode() {
        for mode in [CompilationMode::Debug, CompilationMode::Standard, CompilationMode::Optimize] {
            assert_eq!(from_compile_mode(to_compile_mode(mode)), mode);
        }
    }

    #[test]
    fn note_records_into_the_timeline() {
        let mut timeline = LatestEvents::new();
        note(&mut timeline, "src/Main.elm changed");
        let lines: Vec<&str> = timeline.entries().map(|e| e.summary.as_str()).collect();
        assert_eq!(lines, vec!["src/Main.elm changed"]);
    }

    #[test]
    fn persist_target_preference_writes_and_updates_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elm-stuff/elm-watch/stuff.json");
        let mut persisted = PersistedState::default();

        persist_target_preference(&mut persisted, &path, "Main", |prefs| {
            prefs.compilation_mode = Some(CompilationMode::Optimize);
        });

        assert_eq!(
            persisted.targets.get("Main").and_then(|p| p.compilation_mode),
            Some(CompilationMode::Optimize)
        );
        match persisted_state::read(&path) {
            persisted_state::ReadOutcome::Parsed(on_disk) => assert_eq!(on_disk, persisted),
            other => panic!("expected Parsed, got {other:?}"),
        }
    }
}
