//! Structured logging setup: JSON or pretty `tracing` output, optional
//! rotating file appender.
//!
//! Call [`init`] once at process start. Re-initializing a global
//! subscriber is a programmer error and will return an error rather than
//! panic.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Json
    }
}

/// When a file appender rotates its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    Daily,
    Hourly,
    Never,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::Daily
    }
}

/// Logging configuration (SPEC_FULL §Ambient stack / Logging).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,
    #[serde(default)]
    pub rotation: RotationPolicy,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_level() -> String {
    "info".to_string()
}

const fn default_enable_stdout() -> bool {
    true
}

const fn default_retention_days() -> i64 {
    30
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stdout: default_enable_stdout(),
            rotation: RotationPolicy::default(),
            retention_days: default_retention_days(),
        }
    }
}

/// Holds the non-blocking file writer's guard (if any) alive for the
/// process lifetime. Dropping it flushes and stops the writer thread.
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Initialize the global `tracing` subscriber from `config`. Safe to
    /// call at most once per process.
    pub fn init(config: &LogConfig) -> Result<Self> {
        let level = parse_log_level(&config.level)?;
        let env_filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env()
            .map_err(|e| Error::validation("telemetry.init", e.to_string()))?;

        let guard = if let Some(ref log_dir) = config.log_dir {
            std::fs::create_dir_all(log_dir)
                .map_err(|e| Error::io("telemetry.init", format!("creating {}: {e}", log_dir.display())))?;

            let rotation = match config.rotation {
                RotationPolicy::Daily => tracing_appender::rolling::Rotation::DAILY,
                RotationPolicy::Hourly => tracing_appender::rolling::Rotation::HOURLY,
                RotationPolicy::Never => tracing_appender::rolling::Rotation::NEVER,
            };
            let appender = tracing_appender::rolling::RollingFileAppender::new(rotation, log_dir, "swarmmail.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true);

            if config.enable_stdout {
                match config.format {
                    LogFormat::Json => {
                        let stdout_layer = tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(io::stdout)
                            .with_target(true)
                            .with_file(true)
                            .with_line_number(true);
                        tracing_subscriber::registry()
                            .with(env_filter)
                            .with(file_layer)
                            .with(stdout_layer)
                            .init();
                    }
                    LogFormat::Pretty => {
                        let stdout_layer = tracing_subscriber::fmt::layer()
                            .pretty()
                            .with_writer(io::stdout)
                            .with_target(true)
                            .with_thread_ids(true)
                            .with_file(true)
                            .with_line_number(true)
                            .with_span_events(FmtSpan::CLOSE);
                        tracing_subscriber::registry()
                            .with(env_filter)
                            .with(file_layer)
                            .with(stdout_layer)
                            .init();
                    }
                }
            } else {
                tracing_subscriber::registry().with(env_filter).with(file_layer).init();
            }

            Some(guard)
        } else {
            match config.format {
                LogFormat::Json => {
                    let stdout_layer = tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(io::stdout)
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_thread_names(true)
                        .with_file(true)
                        .with_line_number(true);
                    tracing_subscriber::registry().with(env_filter).with(stdout_layer).init();
                }
                LogFormat::Pretty => {
                    let stdout_layer = tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(io::stdout)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_span_events(FmtSpan::CLOSE);
                    tracing_subscriber::registry().with(env_filter).with(stdout_layer).init();
                }
            }
            None
        };

        tracing::info!(
            level = %config.level,
            format = ?config.format,
            file_output = config.log_dir.is_some(),
            "telemetry initialized"
        );

        Ok(Self { _guard: guard })
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::validation("telemetry.init", format!("invalid log level: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_level_accepts_known_levels_case_insensitively() {
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
    }

    #[test]
    fn parse_log_level_rejects_unknown() {
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn default_config_is_json_with_stdout_enabled() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.enable_stdout);
        assert!(config.log_dir.is_none());
    }
}
