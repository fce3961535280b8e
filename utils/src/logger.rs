use slog::o;
use slog::Drain;
use slog::Level;
use slog::LevelFilter;
#[cfg(all(target_os = "linux", feature = "journald"))]
use slog_journald::JournaldDrain;
#[cfg(feature = "syslog")]
use slog_syslog::Facility;

use std::fs::OpenOptions;
use std::path::Path;

use super::error::Result;
use crate::app_config::{AppConfig, LogConfig};

pub fn setup_logging() -> Result<slog_scope::GlobalLoggerGuard> {
    // Setup Logging
    let guard = slog_scope::set_global_logger(default_root_logger()?);
    slog_stdlog::init()?;

    Ok(guard)
}

pub fn default_root_logger() -> Result<slog::Logger> {
    let log_config = AppConfig::get::<LogConfig>("log").ok();
    let log_level = log_config
        .as_ref()
        .map(|c| parse_level(&c.level))
        .unwrap_or(Level::Info);

    // 终端输出走 stderr，stdout 留给审计报告
    let term_drain = default_term_drain().unwrap_or(default_discard()?);

    // 仅在配置了 log.file 时写文件
    let file_drain = match log_config.as_ref().map(|c| c.file.as_str()) {
        Some(path) if !path.is_empty() => default_file_drain(Path::new(path))?,
        _ => default_discard()?,
    };

    let drain = slog::Duplicate(term_drain, file_drain).fuse();

    // Merge additional drains based on features
    #[cfg(feature = "syslog")]
    let drain = slog::Duplicate(default_syslog_drain().unwrap_or(default_discard()?), drain).fuse();
    #[cfg(feature = "journald")]
    #[cfg(target_os = "linux")]
    let drain = slog::Duplicate(
        default_journald_drain().unwrap_or(default_discard()?),
        drain,
    )
    .fuse();

    let drain = LevelFilter::new(drain, log_level).fuse();

    let logger = slog::Logger::root(drain, o!("app" => "permsweep"));

    Ok(logger)
}

/// Map a configured level name onto a slog level; unknown names fall back to info.
pub fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" | "warning" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

fn default_discard() -> Result<slog_async::Async> {
    let drain = slog_async::Async::new(slog::Discard)
        .chan_size(1024)
        .build();

    Ok(drain)
}

// term drain: Log to Terminal
#[cfg(not(feature = "termlog"))]
fn default_term_drain() -> Result<slog_async::Async> {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let term = slog_term::FullFormat::new(plain)
        .use_file_location()
        .use_custom_timestamp(slog_term::timestamp_local);

    let drain = slog_async::Async::new(term.build().fuse())
        .chan_size(1024)
        .build();

    Ok(drain)
}

// term drain: Log to Terminal with colors
#[cfg(feature = "termlog")]
fn default_term_drain() -> Result<slog_async::Async> {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let term = slog_term::FullFormat::new(decorator)
        .use_file_location()
        .use_custom_timestamp(slog_term::timestamp_local);

    let drain = slog_async::Async::new(term.build().fuse())
        .chan_size(1024)
        .build();

    Ok(drain)
}

// file drain: Log to file
fn default_file_drain(log_file: &Path) -> Result<slog_async::Async> {
    if let Some(log_dir) = log_file.parent() {
        if !log_dir.as_os_str().is_empty() {
            std::fs::create_dir_all(log_dir)?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    let decorator = slog_term::PlainSyncDecorator::new(file);
    let formatter = slog_term::FullFormat::new(decorator)
        .use_file_location()
        .use_custom_timestamp(slog_term::timestamp_local)
        .build()
        .fuse();

    let drain = slog_async::Async::new(formatter)
        .chan_size(1024)
        .build();

    Ok(drain)
}

// syslog drain: Log to syslog
#[cfg(feature = "syslog")]
fn default_syslog_drain() -> Result<slog_async::Async> {
    let syslog = slog_syslog::unix_3164(Facility::LOG_AUTH)
        .map_err(|e| crate::error::Error::with_source("Failed to open syslog", Box::new(e)))?;

    let drain = slog_async::Async::new(syslog.fuse())
        .chan_size(1024)
        .build();

    Ok(drain)
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn default_journald_drain() -> Result<slog_async::Async> {
    let journald = JournaldDrain.ignore_res();
    let drain = slog_async::Async::new(journald)
        .chan_size(1024)
        .build();

    Ok(drain)
}
