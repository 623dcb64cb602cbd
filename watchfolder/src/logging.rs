//! Tracing setup for the watch process.
//!
//! Library code only emits `tracing` events. The binary calls [`init`] once at
//! startup and keeps the returned guard alive until exit, so tests can drive
//! the loop without any subscriber installed.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps the file writer flushing until dropped.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Parse a configured log level.
///
/// Accepts plain names (`info`, `warning`) and the `logging.INFO` spelling
/// used by older pipeline configs.
pub fn parse_level(raw: &str) -> Result<LevelFilter> {
    let name = raw.trim();
    let name = name.strip_prefix("logging.").unwrap_or(name);
    match name.to_ascii_lowercase().as_str() {
        "error" | "critical" => Ok(LevelFilter::ERROR),
        "warn" | "warning" => Ok(LevelFilter::WARN),
        "info" => Ok(LevelFilter::INFO),
        "debug" => Ok(LevelFilter::DEBUG),
        "trace" => Ok(LevelFilter::TRACE),
        "off" => Ok(LevelFilter::OFF),
        _ => Err(anyhow!("unknown log-level {raw:?}")),
    }
}

/// Install the global subscriber: stderr always, plus `log_file` when given.
///
/// `RUST_LOG` overrides `level` when set.
///
/// # Example
/// ```bash
/// RUST_LOG=watchfolder=debug watchfolder --config config.toml
/// ```
pub fn init(level: LevelFilter, log_file: Option<&Path>) -> Result<LoggingGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let (file_layer, file_guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("log file {} has no file name", path.display()))?;
            fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_legacy_level_names() {
        assert_eq!(parse_level("info").expect("info"), LevelFilter::INFO);
        assert_eq!(parse_level("logging.DEBUG").expect("debug"), LevelFilter::DEBUG);
        assert_eq!(parse_level("WARNING").expect("warning"), LevelFilter::WARN);
    }

    #[test]
    fn rejects_unknown_level() {
        assert!(parse_level("chatty").is_err());
    }
}
