//! Logging setup.
//!
//! Structured logging via `tracing` goes to stderr; stdout belongs to the
//! contract block (and JSONL progress events under `--json`).

use std::io::IsTerminal;
use tracing_subscriber::{
    EnvFilter,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Check if colored output should be used: stderr is a TTY and `NO_COLOR`
/// is not set.
fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Initialize the tracing subscriber. Safe to call once per process;
/// subsequent calls are ignored.
pub fn init(debug: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if debug {
                EnvFilter::try_new("verax=debug,info")
            } else {
                EnvFilter::try_new("verax=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(use_color())
                .with_target(debug)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_line_number(false)
                .with_file(false)
                .compact(),
        )
        .try_init();
}
