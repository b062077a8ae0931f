//! Subscriber initialization
//!
//! `RUST_LOG` always takes precedence over the configured level.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use serve_config::{LogFormat, LoggingSettings};

/// Keeps the background file writer alive; drop it last
pub type LogGuard = WorkerGuard;

/// Builds the event filter from `RUST_LOG`, falling back to `default_level`
fn env_filter(default_level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("invalid log level '{}'", default_level)),
    }
}

/// Splits a log file path into the directory and file name prefix
fn file_parts(path: &Path) -> Result<(PathBuf, String)> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("log file path {} has no file name", path.display()))?
        .to_string();

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Ok((directory, file_name))
}

/// Installs the server subscriber
///
/// Logs go to stdout in the configured format and, when a file is set, to a
/// daily rolling file as well. The returned guard must be held until exit.
pub fn init(settings: &LoggingSettings) -> Result<Option<LogGuard>> {
    let filter = env_filter(&settings.level)?;

    let (file_writer, guard) = match &settings.file {
        Some(path) => {
            let (directory, file_name) = file_parts(path)?;
            std::fs::create_dir_all(&directory).with_context(|| {
                format!("failed to create log directory {}", directory.display())
            })?;
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter);

    let installed = match settings.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .with(file_writer.map(|writer| {
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_ansi(false)
                    .with_writer(writer)
            }))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true))
            .with(file_writer.map(|writer| {
                fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(writer)
            }))
            .try_init(),
    };

    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))?;

    Ok(guard)
}

/// Installs a compact stderr subscriber for command-line tools
///
/// Stdout stays free for the tool's report.
pub fn init_cli(verbose: bool) -> Result<()> {
    let filter = env_filter(if verbose { "debug" } else { "info" })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
