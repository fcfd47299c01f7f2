//! Logging setup for the engine workers.
//!
//! The engines emit `tracing` events from their worker threads; embedders
//! that do not install their own subscriber can call [`setup_logging`] once
//! at startup. The base level is refined by the usual `RUST_LOG`
//! environment-variable directives.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::errors::{Error, Result};

/// Configuration for the process-wide subscriber
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base log level; `RUST_LOG` directives refine it
    pub level: Level,
    /// Emit JSON records instead of human-readable lines
    pub json: bool,
    /// Include file and line information
    pub file_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
        }
    }
}

impl LoggingConfig {
    /// Create a configuration at the given base level
    pub fn new(level: Level) -> Self {
        LoggingConfig {
            level,
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a subscriber has already been installed for this process.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::Config(format!("failed to initialize logging: {}", e)))
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::Config(format!("Invalid log level: {}", level)))
}
