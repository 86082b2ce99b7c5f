//! Logging configuration and initialization for Linna.
//!
//! Host logs and script logs share one subscriber. Script logs are emitted
//! under [`LOG_TARGET`] and can be filtered separately with
//! `logging.runtime_level`.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::runtime::logger::LOG_TARGET;
use crate::{LinnaError, Result};

/// Parse log level string to tracing Level.
pub(crate) fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Filter for the configured levels. `RUST_LOG` directives are kept.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let level = parse_level(&config.level);
    let mut filter = EnvFilter::from_default_env().add_directive(level.into());

    if let Some(runtime_level) = &config.runtime_level {
        let runtime_level = parse_level(runtime_level);
        let directive: Directive = format!(
            "{LOG_TARGET}={}",
            runtime_level.as_str().to_ascii_lowercase()
        )
        .parse()
        .map_err(|e| LinnaError::Config(format!("invalid runtime log level: {e}")))?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

/// Console writer, teed into `file` unless it is empty.
fn build_writer(file: &str) -> Result<BoxMakeWriter> {
    if file.is_empty() {
        return Ok(BoxMakeWriter::new(std::io::stdout));
    }

    if let Some(parent) = Path::new(file).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let log_file = Arc::new(File::create(file)?);
    Ok(BoxMakeWriter::new(std::io::stdout.and(log_file)))
}

/// Initialize the logging system with the given configuration.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let writer = build_writer(&config.file)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true),
        )
        .with(filter)
        .try_init()
        .map_err(|e| LinnaError::Config(format!("logging already initialized: {e}")))
}

/// Initialize console-only logging (for development/testing).
pub fn init_console_only(level: &str) {
    let filter = EnvFilter::from_default_env().add_directive(parse_level(level).into());

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(true),
        )
        .with(filter)
        .try_init();
}
