//! Structured logging, diagnostic context, and the terminal event timeline.

pub mod context;
pub mod level;
pub mod timeline;
pub mod tracing_compat;

pub use context::DiagnosticContext;
pub use level::LogLevel;
pub use timeline::{LatestEvents, TimelineEvent};
