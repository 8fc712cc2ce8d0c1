//! Process-wide tracing setup for binaries

use tracing_subscriber::EnvFilter;

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins when set; otherwise `LOG_LEVEL` or `MCP_LOG_LEVEL`, then
/// `info`. `debug` forces the debug level regardless.
pub fn init(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level()))
    };

    // stdout carries the stdio protocol.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn default_level() -> String {
    ["LOG_LEVEL", template_core::config::ENV_LOG_LEVEL]
        .into_iter()
        .find_map(|key| std::env::var(key).ok())
        .unwrap_or_else(|| "info".to_string())
}
