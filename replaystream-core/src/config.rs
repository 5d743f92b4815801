use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::MAX_RESPONSE_SIZE;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub streamer: StreamerConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the replay service; endpoints live below `<url>/replay`.
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

/// Streamer cadences. Tests shrink these to a few milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Upload the stream archive at least this often while recording.
    pub flush_interval_ms: u64,
    /// Also upload as soon as this many bytes are buffered.
    pub flush_max_bytes: Option<usize>,
    /// Try the next chunk at least this often while playing back.
    pub chunk_poll_interval_ms: u64,
    /// Keep the viewer registration alive this often.
    pub viewer_refresh_interval_ms: u64,
    /// Re-enumerate checkpoints of a live session this often.
    pub checkpoint_refresh_interval_ms: u64,
    /// Application name recordings are tagged with.
    pub app_name: String,
    /// Optional meta string attached to new recordings.
    pub replay_meta: Option<String>,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 10_000,
            flush_max_bytes: None,
            chunk_poll_interval_ms: 5_000,
            viewer_refresh_interval_ms: 10_000,
            checkpoint_refresh_interval_ms: 30_000,
            app_name: "replaystream".to_string(),
            replay_meta: None,
        }
    }
}

impl StreamerConfig {
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub const fn chunk_poll_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_poll_interval_ms)
    }

    #[must_use]
    pub const fn viewer_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.viewer_refresh_interval_ms)
    }

    #[must_use]
    pub const fn checkpoint_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_refresh_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
    pub pool_max_idle_per_host: usize,
    pub max_response_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 10,
            request_timeout_seconds: 30,
            pool_max_idle_per_host: 4,
            max_response_bytes: MAX_RESPONSE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // REPLAYSTREAM_SERVER__URL, REPLAYSTREAM_STREAMER__FLUSH_INTERVAL_MS, ...
        builder = builder.add_source(
            Environment::with_prefix("REPLAYSTREAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Collect every configuration problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.url.trim().is_empty() {
            errors.push("server.url must not be empty".to_string());
        } else if let Err(e) = crate::wire::ReplayApi::new(&self.server.url) {
            errors.push(format!("server.url is invalid: {e}"));
        }

        let cadences = [
            ("streamer.flush_interval_ms", self.streamer.flush_interval_ms),
            ("streamer.chunk_poll_interval_ms", self.streamer.chunk_poll_interval_ms),
            ("streamer.viewer_refresh_interval_ms", self.streamer.viewer_refresh_interval_ms),
            (
                "streamer.checkpoint_refresh_interval_ms",
                self.streamer.checkpoint_refresh_interval_ms,
            ),
        ];
        for (name, value) in cadences {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }

        if self.streamer.flush_max_bytes == Some(0) {
            errors.push("streamer.flush_max_bytes must be greater than zero when set".to_string());
        }

        if self.streamer.app_name.is_empty() {
            errors.push("streamer.app_name must not be empty".to_string());
        }

        if self.http.max_response_bytes == 0 {
            errors.push("http.max_response_bytes must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
