//! Structured logging setup
//!
//! Library code only emits `tracing` events; binaries and hosts call
//! [`init_logging`] once to install a subscriber.

use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (e.g. "info")
    pub level: String,
    pub format: LogFormat,
    /// Write to stderr so stdout stays clean for JSON output
    pub to_stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            to_stderr: true,
        }
    }
}

/// Install a global `tracing` subscriber.
///
/// Returns `false` if a subscriber was already installed; calling this more
/// than once is harmless.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match (config.format, config.to_stderr) {
        (LogFormat::Json, true) => builder.json().with_writer(std::io::stderr).try_init(),
        (LogFormat::Json, false) => builder.json().try_init(),
        (LogFormat::Compact, true) => builder.compact().with_writer(std::io::stderr).try_init(),
        (LogFormat::Compact, false) => builder.compact().try_init(),
        (LogFormat::Pretty, true) => builder.pretty().with_writer(std::io::stderr).try_init(),
        (LogFormat::Pretty, false) => builder.pretty().try_init(),
    };

    result.is_ok()
}
