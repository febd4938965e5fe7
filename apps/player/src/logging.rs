// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Console and file logging for `mgplay`.
//!
//! Configured levels apply to the mediagraph crates only; everything else is
//! held at `warn`. `RUST_LOG`, when set, replaces the configured filters.

use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::{LogConfig, LogFormat};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;
type InitError = Box<dyn std::error::Error + Send + Sync>;

pub type LogGuard = Option<WorkerGuard>;

const OWN_TARGETS: [&str; 4] =
    ["mgplay", "mediagraph_player", "mediagraph_engine", "mediagraph_core"];

/// Filter directives for `level`, scoped to the mediagraph targets.
fn directives(level: Level) -> String {
    let mut directives = vec![Level::WARN.as_str().to_ascii_lowercase()];
    directives.extend(
        OWN_TARGETS.iter().map(|target| format!("{target}={}", level.as_str().to_ascii_lowercase())),
    );
    directives.join(",")
}

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(level)))
}

fn console_layer(level: Level) -> BoxedLayer {
    tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_filter(filter(level)).boxed()
}

fn file_layer(writer: NonBlocking, level: Level, format: LogFormat) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
    match format {
        LogFormat::Json => layer.json().with_filter(filter(level)).boxed(),
        LogFormat::Text => layer.with_filter(filter(level)).boxed(),
    }
}

fn open_log_file(path: &str) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let path = Path::new(path);
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path.file_name().ok_or_else(|| format!("{} names no file", path.display()))?;

    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create log directory {}: {e}", dir.display()))?;
    Ok(tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name)))
}

/// Installs the global subscriber described by `log_config`.
///
/// Keep the returned guard alive: dropping it flushes and closes the log file.
///
/// # Errors
///
/// Returns an error if file logging is enabled and the log file cannot be
/// created.
pub fn init_logging(log_config: &LogConfig) -> Result<LogGuard, InitError> {
    let mut guard = None;
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if log_config.file_enable {
        let (writer, file_guard) = open_log_file(&log_config.file_path)?;
        guard = Some(file_guard);
        layers.push(file_layer(writer, log_config.file_level.into(), log_config.file_format));
    }

    let silent = !log_config.console_enable && !log_config.file_enable;
    if log_config.console_enable || silent {
        layers.push(console_layer(log_config.console_level.into()));
    }

    tracing_subscriber::registry().with(layers).init();
    if silent {
        tracing::warn!("Console and file logging are both disabled, logging to the console");
    }
    Ok(guard)
}
