//! elm-watch: a development-time build orchestrator for a compile-to-JS
//! language, structured around a single cooperative event loop.
//!
//! # Module Structure
//!
//! - [`config`]: on-disk `elm-watch.json` shape and loading
//! - [`project`]: validated [`project::Target`]/[`project::Project`] data model
//! - [`path_store`]: path canonicalisation, duplicate detection, common roots
//! - [`persisted_state`]: cross-restart port and per-target UI preferences
//! - [`watcher`]: OS file-watch subscription, debouncing, change classification
//! - [`dependency_graph`]: per-target closed set of source files
//! - [`compiler`]: external compiler invocations and result classification
//! - [`postprocess`]: the bounded plug-in worker pool
//! - [`scheduler`]: `TargetState` ownership, priority, and admission
//! - [`web`]: the HTTP+WebSocket server browsers connect to
//! - [`hot_runtime`]: compiled-artifact rewriting for live browser updates
//! - [`observability`]: structured logging, diagnostic context, event timeline
//! - [`signal`]: cooperative shutdown on SIGINT/SIGTERM
//! - [`orchestrator`]: wires every component into the `make`/`hot` run loops
//! - [`cli`]: the `elm-watch` command-line surface
//! - [`error`]: the orchestrator-wide error taxonomy

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::module_inception)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod compiler;
pub mod config;
pub mod dependency_graph;
pub mod error;
pub mod hot_runtime;
pub mod observability;
pub mod orchestrator;
pub mod path_store;
pub mod persisted_state;
pub mod postprocess;
pub mod project;
pub mod scheduler;
pub mod signal;
pub mod watcher;
pub mod web;

pub use observability::tracing_compat;

pub use error::{Error, ErrorKind, Result};
