//! Error taxonomy for the watch orchestrator.
//!
//! Every kind an operator can see is enumerated in [`ErrorKind`]; [`Error`]
//! pairs a kind with a free-form context string built at the call site where
//! the failure was diagnosed. This mirrors the "kind enum + context string"
//! shape the rest of this codebase uses for leaf error types (see
//! [`crate::compiler::CompilerError`]) but at the top level, so callers that
//! only care about "did this fail, and how" can match on one type.

use std::fmt;
use std::path::PathBuf;

/// Every error kind the orchestrator can surface, grouped per the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration
    /// No `elm-watch.json` found in any ancestor directory.
    ConfigNotFound,
    /// `elm-watch.json` failed schema validation.
    InvalidConfig,
    /// CLI flags not recognised by the active subcommand.
    UnexpectedFlags,
    /// `--debug` and `--optimize` given together.
    ClashingFlags,
    /// A flag was given that has no effect given the other flags present.
    RedundantFlags,
    /// One or more target-name substrings on the command line matched nothing.
    UnknownTargetsSubstrings,
    /// Two or more enabled targets share an output path.
    DuplicateOutputs,
    /// Two or more input entries resolve to the same canonical file.
    DuplicateInputs,
    /// A target's input path does not exist.
    InputsNotFound,
    /// A target's input path exists but could not be resolved (e.g. OS error).
    InputsFailedToResolve,
    /// The project's paths do not share a common filesystem root.
    NoCommonRoot,
    /// Enabled targets do not all share the same compiler project file.
    NoUniqueProject,
    /// A `.elm`-shaped import resolved to more than one candidate file.
    AmbiguousImport,

    // Filesystem
    /// A source file could not be read.
    TroubleReadingFile,
    /// An output or report file could not be written.
    TroubleWritingFile,
    /// Writing the dummy install-check module failed.
    TroubleWritingDummyOutput,
    /// The existing output file could not be read back for comparison.
    TroubleReadingOutput,
    /// The existing output file's metadata could not be checked.
    TroubleCheckingOutput,
    /// The compiled artifact lacked the suffix pattern the runtime injector rewrites.
    TroubleWritingOutput,
    /// The OS-level file watcher reported a fatal error.
    WatcherError,

    // Compiler
    /// The compiler executable could not be found on PATH.
    ElmNotFound,
    /// The compiler process could not be spawned for a reason other than "not found".
    TroubleSpawningCommand,
    /// `installDependencies` recognised a dependency-resolution failure.
    DependencyFetchError,
    /// The compiler exited in a way not recognised by any classification rule.
    UnexpectedElmOutput,
    /// The compiler's `--report=json` stderr was not valid JSON.
    TroubleWithJsonReport,
    /// The compiler process crashed (signal termination, non-standard exit).
    ElmCrash,

    // Postprocess
    /// `elm-watch-node` was used but the target script path does not exist.
    MissingPostprocessScript,
    /// The postprocess script failed to load/evaluate in the worker.
    PostprocessImportError,
    /// The postprocess script has no (or a malformed) default export.
    MissingPostprocessDefaultExport,
    /// The postprocess function threw/panicked while running.
    PostprocessRunError,
    /// The postprocess function returned something that isn't a JS string.
    InvalidPostprocessResult,
    /// An external postprocess command exited non-zero.
    PostprocessNonZeroExit,
    /// Writing the artifact to an external postprocess command's stdin failed.
    PostprocessStdinTrouble,
    /// An external postprocess command could not be found on PATH.
    CommandNotFound,

    // Network
    /// The port recorded in persisted state is already in use.
    PortConflictForPersistedPort,
    /// The port named in configuration is already in use.
    PortConflictForPortFromConfig,
    /// The OS refused to hand out any port at all.
    PortConflictForNoPort,

    // Scheduler self-check
    /// The scheduler believes it has quiesced but a target is still active.
    StuckInProgress,

    // Client
    /// A WebSocket connection arrived on a path not starting with `/?`.
    UrlMismatch,
    /// The WebSocket URL's query parameters could not be decoded.
    ParamsDecodeError,
    /// The connecting browser's elm-watch version does not match the server's.
    VersionMismatch,
    /// The connecting browser named a target that does not exist.
    TargetNotFound,
    /// The connecting browser named a target that exists but is disabled.
    TargetDisabled,
    /// The configured editor-open command failed, timed out, or was unset.
    OpenEditorFailed,
}

impl ErrorKind {
    /// A short, stable, machine-matchable name for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigNotFound => "ConfigNotFound",
            Self::InvalidConfig => "InvalidConfig",
            Self::UnexpectedFlags => "UnexpectedFlags",
            Self::ClashingFlags => "ClashingFlags",
            Self::RedundantFlags => "RedundantFlags",
            Self::UnknownTargetsSubstrings => "UnknownTargetsSubstrings",
            Self::DuplicateOutputs => "DuplicateOutputs",
            Self::DuplicateInputs => "DuplicateInputs",
            Self::InputsNotFound => "InputsNotFound",
            Self::InputsFailedToResolve => "InputsFailedToResolve",
            Self::NoCommonRoot => "NoCommonRoot",
            Self::NoUniqueProject => "NoUniqueProject",
            Self::AmbiguousImport => "AmbiguousImport",
            Self::TroubleReadingFile => "TroubleReadingFile",
            Self::TroubleWritingFile => "TroubleWritingFile",
            Self::TroubleWritingDummyOutput => "TroubleWritingDummyOutput",
            Self::TroubleReadingOutput => "TroubleReadingOutput",
            Self::TroubleCheckingOutput => "TroubleCheckingOutput",
            Self::TroubleWritingOutput => "TroubleWritingOutput",
            Self::WatcherError => "WatcherError",
            Self::ElmNotFound => "ElmNotFound",
            Self::TroubleSpawningCommand => "TroubleSpawningCommand",
            Self::DependencyFetchError => "DependencyFetchError",
            Self::UnexpectedElmOutput => "UnexpectedElmOutput",
            Self::TroubleWithJsonReport => "TroubleWithJsonReport",
            Self::ElmCrash => "ElmCrash",
            Self::MissingPostprocessScript => "MissingPostprocessScript",
            Self::PostprocessImportError => "PostprocessImportError",
            Self::MissingPostprocessDefaultExport => "MissingPostprocessDefaultExport",
            Self::PostprocessRunError => "PostprocessRunError",
            Self::InvalidPostprocessResult => "InvalidPostprocessResult",
            Self::PostprocessNonZeroExit => "PostprocessNonZeroExit",
            Self::PostprocessStdinTrouble => "PostprocessStdinTrouble",
            Self::CommandNotFound => "CommandNotFound",
            Self::PortConflictForPersistedPort => "PortConflictForPersistedPort",
            Self::PortConflictForPortFromConfig => "PortConflictForPortFromConfig",
            Self::PortConflictForNoPort => "PortConflictForNoPort",
            Self::StuckInProgress => "StuckInProgress",
            Self::UrlMismatch => "UrlMismatch",
            Self::ParamsDecodeError => "ParamsDecodeError",
            Self::VersionMismatch => "VersionMismatch",
            Self::TargetNotFound => "TargetNotFound",
            Self::TargetDisabled => "TargetDisabled",
            Self::OpenEditorFailed => "OpenEditorFailed",
        }
    }

    /// Whether this kind, when it occurs outside the scope of a single
    /// target, should make watch mode exit instead of reporting and waiting
    /// (§7 propagation policy).
    #[must_use]
    pub const fn is_fatal_to_watch_mode(self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound | Self::WatcherError | Self::InvalidConfig
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single orchestrator-level error: a kind plus human-readable context.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: String,
    path: Option<PathBuf>,
}

impl Error {
    /// Creates an error of the given kind with no context.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: String::new(),
            path: None,
        }
    }

    /// Attaches a human-readable context message.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Attaches the path this error concerns, if any.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(path) = &self.path {
            write!(f, " ({})", path.display())?;
        }
        if !self.context.is_empty() {
            write!(f, ": {}", self.context)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Result type used throughout the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
