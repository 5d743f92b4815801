use std::fs::OpenOptions;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set. With `file_path` the
/// output is appended to that file instead of stderr.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{level},replaystream_core={level}")))
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let file = match &config.file_path {
        Some(path) => Some(Arc::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let json = config.format.eq_ignore_ascii_case("json");

    // Each arm has a distinct layer type, so init inside the match.
    let result = match (json, file) {
        (true, Some(file)) => registry
            .with(fmt::layer().json().with_current_span(true).with_writer(file))
            .try_init(),
        (true, None) => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        (false, Some(file)) => registry
            .with(fmt::layer().with_ansi(false).with_target(true).with_writer(file))
            .try_init(),
        (false, None) => registry
            .with(fmt::layer().pretty().with_target(true).with_file(false))
            .try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Parse log level string to tracing Level
fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
