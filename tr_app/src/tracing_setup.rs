use std::io;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Crates of the admission path, logged at their own level
const GATE_CRATES: [&str; 2] = ["tr_tenantrate", "tr_quotapool"];

/// Build the event filter
///
/// Everything logs at `default_level` and the admission crates at
/// `gate_level`. Directives in `rust_log` (normally `RUST_LOG`) are applied
/// on top; a gate crate named there keeps that setting.
pub fn filter(default_level: Level, gate_level: Level, rust_log: Option<&str>) -> EnvFilter {
    let mut filter = EnvFilter::builder().with_default_directive(default_level.into()).parse_lossy(rust_log.unwrap_or_default());

    for krate in GATE_CRATES {
        if rust_log.is_some_and(|directives| directives.contains(krate)) {
            continue;
        }
        if let Ok(directive) = format!("{krate}={}", gate_level.as_str().to_ascii_lowercase()).parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialise tracing with a non-blocking, hourly-rolled file appender
///
/// With `stdout` set, events are also echoed to the terminal with colours.
/// Keep the returned guard alive for the life of the process or buffered
/// lines are lost.
pub fn init(app_name: &str, log_dir: &str, default_level: Level, gate_level: Level, stdout: bool) -> WorkerGuard {
    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::hourly(log_dir, format!("{app_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let env_filter = filter(default_level, gate_level, rust_log.as_deref());

    let file_layer = fmt::layer().with_writer(non_blocking).with_target(true).with_line_number(true).with_ansi(false).compact();
    let stdout_layer = stdout.then(|| fmt::layer().with_writer(io::stdout).with_target(true).with_ansi(true).compact());

    tracing_subscriber::registry().with(env_filter).with(file_layer).with(stdout_layer).init();

    tracing::info!(app_name, log_dir, %default_level, %gate_level, "Tracing initialised");
    guard
}
