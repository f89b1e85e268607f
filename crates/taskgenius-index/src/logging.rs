//! Tracing subscriber setup

use crate::config::LoggingConfig;

fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Install a stderr `fmt` subscriber
///
/// Returns `false` when a global subscriber is already set, which happens on
/// every reload after the first.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    use tracing_subscriber::fmt;

    fmt()
        .with_max_level(parse_level(&config.level))
        .with_target(config.debug)
        .with_thread_ids(config.debug)
        .with_file(config.debug)
        .with_line_number(config.debug)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
