//! Structured logging configuration

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level or filter directive (trace, debug, info, warn, error, `vnic=debug`)
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format (pretty, compact)
    #[serde(default)]
    pub format: LogFormat,
    /// Include file/line info
    #[serde(default)]
    pub file_info: bool,
    /// Include thread IDs
    #[serde(default)]
    pub thread_ids: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty colored output (for humans)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::Pretty,
            file_info: false,
            thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Log config for development: debug level with source locations
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            file_info: true,
            thread_ids: false,
        }
    }

    /// Log config for production: compact, info level, thread IDs
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file_info: false,
            thread_ids: true,
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Initialize logging with the given configuration.
///
/// `RUST_LOG` takes precedence over `config.level`. Panics if a global subscriber
/// is already installed; use [`try_init_logging`] when that is possible.
pub fn init_logging(config: &LogConfig) {
    if let Err(e) = try_init_logging(config) {
        panic!("failed to install tracing subscriber: {}", e);
    }
}

/// Initialize logging, returning an error if a global subscriber is already set.
pub fn try_init_logging(
    config: &LogConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = config.filter();

    match config.format {
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_file(config.file_info)
                .with_line_number(config.file_info)
                .with_thread_ids(config.thread_ids);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()?;
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_file(config.file_info)
                .with_line_number(config.file_info)
                .with_thread_ids(config.thread_ids);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()?;
        }
    }

    tracing::info!(
        level = %config.level,
        format = ?config.format,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let dev = LogConfig::development();
        assert_eq!(dev.level, "debug");
        assert!(dev.file_info);

        let prod = LogConfig::production();
        assert_eq!(prod.format, LogFormat::Compact);
        assert!(prod.thread_ids);
    }

    #[test]
    fn test_second_init_is_rejected() {
        let config = LogConfig::production();
        // Nothing else in this crate's tests installs a subscriber
        assert!(try_init_logging(&config).is_ok());
        assert!(try_init_logging(&config).is_err());
    }
}
