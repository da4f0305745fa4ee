//! Logging system setup
//!
//! Structured logging through `tracing`. The level comes from the
//! configuration file or `--debug`, and `RUST_LOG` overrides both.

use crate::config::LoggingSettings;
use anyhow::{anyhow, Result};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    /// Worker processes: their stdout carries the control pipe.
    Stderr,
}

/// Picks the filter directive for the configured level.
pub fn log_level(settings: &LoggingSettings, debug: bool) -> &str {
    if debug {
        "debug"
    } else {
        settings.level.as_str()
    }
}

/// Initialize the logging system
///
/// # Arguments
/// * `settings` - Logging section of the configuration
/// * `debug` - Force the debug level
/// * `output` - Destination of the log lines
///
/// # Returns
/// * `Result<()>` - Error if a global subscriber is already installed
pub fn setup_logging(settings: &LoggingSettings, debug: bool, output: LogOutput) -> Result<()> {
    let level = log_level(settings, debug);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if settings.json_format {
        registry
            .with(fmt::layer().json().with_writer(writer).with_thread_ids(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(writer).with_ansi(output == LogOutput::Stdout))
            .try_init()
    };
    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
