//! Structured logging setup using the tracing crate.
//!
//! Supports pretty, compact and JSON output. `RUST_LOG` always wins over
//! the configured level.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::{LogFormat, LogLevel};
use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Builder for the global subscriber.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: LogLevel,
    format: LogFormat,
    with_target: bool,
    ansi: bool,
}

impl LoggingBuilder {
    /// Create a builder from the logging section of the config file.
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            level: LogLevel::parse(&config.level),
            format: config.format,
            with_target: config.with_target,
            ansi: true,
        }
    }

    /// Apply `-v` flags on top of the configured level.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.level = self.level.escalate(verbosity);
        self
    }

    /// Set ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
    }

    /// Build and install the global subscriber. Logs go to stderr so they
    /// never interleave with command output on stdout.
    pub fn init(self) -> Result<()> {
        let env_filter = self.build_filter();
        let registry = tracing_subscriber::registry().with(env_filter);

        let installed = match self.format {
            LogFormat::Pretty => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr)
                        .with_ansi(self.ansi)
                        .with_target(self.with_target),
                )
                .try_init(),
            LogFormat::Compact => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(std::io::stderr)
                        .with_ansi(self.ansi)
                        .with_target(self.with_target),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(true)
                        .with_target(self.with_target),
                )
                .try_init(),
        };

        installed.map_err(|e| Error::Internal(format!("Failed to install logger: {}", e)))
    }
}

/// Initialize logging from config plus the `-v` count of the command line.
pub fn init_logging(config: &LoggingConfig, verbosity: u8) -> Result<()> {
    LoggingBuilder::from_config(config)
        .with_verbosity(verbosity)
        .init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_from_config() {
        let config = LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Json,
            with_target: true,
        };
        let builder = LoggingBuilder::from_config(&config).with_verbosity(2);
        assert_eq!(builder.level, LogLevel::Debug);
        assert_eq!(builder.format, LogFormat::Json);
        assert!(builder.with_target);
    }
}
