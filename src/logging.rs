//! Tracing subscriber setup for the binary.

use anyhow::{Context, Result};
use sandpool::config::LoggingConfig;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE_PREFIX: &str = "sandpool.log";

/// Installs the global subscriber.
///
/// Logs go to stderr so command output on stdout stays clean. With a log
/// directory configured, a daily-rolling file gets a copy; the returned guard
/// flushes it and must live until exit.
pub(crate) fn init(verbose: bool, config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("sandpool=debug")
        } else {
            EnvFilter::new("sandpool=info")
        }
    });

    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(ChronoUtc::rfc_3339());
    let stderr = if config.json {
        stderr.json().boxed()
    } else {
        stderr.boxed()
    };

    let (file, guard) = match &config.dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(ChronoUtc::rfc_3339());
            let layer = if config.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(guard)
}
