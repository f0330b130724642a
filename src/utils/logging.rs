//! Structured logging setup.
//!
//! The engine only emits `tracing` events; installing a subscriber is the host's call.
//! [`init_logging`] is a ready-made setup driven by [`LoggingConfig`]: console and/or file
//! output, plain or JSON, with `RUST_LOG` taking precedence over the configured level.

use crate::config::LoggingConfig;
use crate::error::{InterceptError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Filter used when `RUST_LOG` is not set
pub fn default_env_filter(level: Level) -> EnvFilter {
    EnvFilter::new(level_directive(level))
}

fn level_directive(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Install the global subscriber described by `config`.
///
/// Fails if the log file cannot be opened or a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_env_filter(config.log_level));

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.log_to_console {
        let console = fmt::layer().with_target(true).with_thread_names(true);
        layers.push(if config.json_format {
            console.json().boxed()
        } else {
            console.boxed()
        });
    }

    if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            InterceptError::ConfigError("log_file_path must be set for file logging".into())
        })?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let file_layer = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(true);
        layers.push(if config.json_format {
            file_layer.json().boxed()
        } else {
            file_layer.boxed()
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| InterceptError::ConfigError(format!("Failed to install subscriber: {e}")))?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
