//! Entry point: parses arguments and runs the requested subcommand.

use std::process::ExitCode;

#[cfg(feature = "tracing-integration")]
fn init_logging() {
    use tracing_subscriber::EnvFilter;

    // §6: `NO_COLOR` disables ANSI. The human-readable error renderer itself
    // is out of scope (§1), but our own structured log lines still honour it.
    let no_color = std::env::var_os("NO_COLOR").is_some();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("ELM_WATCH_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .init();
}

#[cfg(not(feature = "tracing-integration"))]
fn init_logging() {}

fn main() -> ExitCode {
    init_logging();
    elm_watch_core::cli::run()
}
