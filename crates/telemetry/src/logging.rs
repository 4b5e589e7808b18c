use std::env;
use std::io;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// Compact text format for serial consoles
    Compact,
    /// JSON format for log shipping
    Json,
}

impl LogFormat {
    /// Parse log format from the `LOG_FORMAT` environment variable.
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT").unwrap_or_default().to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ => Self::default(),
        }
    }
}

/// Configuration for structured logging on the node.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log output format (pretty/compact/json)
    pub format: LogFormat,
    /// Gate identity included in every startup line
    pub gate_id: String,
    /// Log to a daily-rolling file in addition to stdout
    pub log_to_file: bool,
    /// Directory for rolling log files
    pub log_dir: Option<String>,
}

impl LogConfig {
    pub fn new(gate_id: impl Into<String>) -> Self {
        Self {
            format: LogFormat::from_env(),
            gate_id: gate_id.into(),
            log_to_file: env::var("LOG_TO_FILE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_dir: env::var("LOG_DIR").ok(),
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_logging(mut self, log_dir: impl Into<String>) -> Self {
        self.log_to_file = true;
        self.log_dir = Some(log_dir.into());
        self
    }
}

/// Initialize structured logging.
///
/// Returns the appender guard that must be held for the lifetime of the
/// process when file logging is enabled; dropping it flushes buffered lines.
pub fn init_logging(config: LogConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = default_filter();

    let registry = tracing_subscriber::registry().with(filter);

    let mut guard = None;
    macro_rules! build_file_layer {
        () => {
            if config.log_to_file {
                config.log_dir.as_ref().map(|dir| {
                    let appender = tracing_appender::rolling::daily(dir, "gate-node.log");
                    let (non_blocking, g) = tracing_appender::non_blocking(appender);
                    guard = Some(g);
                    fmt::layer().compact().with_ansi(false).with_writer(non_blocking)
                })
            } else {
                None
            }
        };
    }

    match config.format {
        LogFormat::Json => {
            let stdout = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_names(true)
                .with_writer(io::stdout);
            let file_layer = build_file_layer!();
            registry.with(stdout).with(file_layer).init();
        }
        LogFormat::Compact => {
            let stdout = fmt::layer().compact().with_target(true);
            let file_layer = build_file_layer!();
            registry.with(stdout).with(file_layer).init();
        }
        LogFormat::Pretty => {
            let stdout = fmt::layer().pretty().with_target(true).with_line_number(true);
            let file_layer = build_file_layer!();
            registry.with(stdout).with(file_layer).init();
        }
    }

    tracing::info!(
        gate_id = %config.gate_id,
        format = ?config.format,
        "structured logging initialized"
    );

    guard
}

fn default_filter() -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    for directive in ["hyper=warn", "reqwest=warn", "ort=warn", "nokhwa=warn"] {
        if let Ok(parsed) = directive.parse() {
            filter = filter.add_directive(parsed);
        }
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_from_env() {
        std::env::remove_var("LOG_FORMAT");
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);

        std::env::set_var("LOG_FORMAT", "json");
        assert_eq!(LogFormat::from_env(), LogFormat::Json);

        std::env::set_var("LOG_FORMAT", "compact");
        assert_eq!(LogFormat::from_env(), LogFormat::Compact);

        std::env::remove_var("LOG_FORMAT");
    }

    #[test]
    fn log_config_builder() {
        let config = LogConfig::new("gate-007")
            .with_format(LogFormat::Json)
            .with_file_logging("/tmp/logs");

        assert_eq!(config.gate_id, "gate-007");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.log_to_file);
        assert_eq!(config.log_dir.as_deref(), Some("/tmp/logs"));
    }
}
