//! Structured logging setup.
//!
//! Builds a `tracing-subscriber` stack from [`LoggingConfig`]: an `EnvFilter`
//! (the `RUST_LOG` variable wins over the configured level), a console layer
//! in plain or JSON form, and an optional JSON file layer.

use std::fs::OpenOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install the global subscriber.
///
/// # Errors
/// `Io` if the log file cannot be opened, `ConfigError` if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config);

    let console_plain = (config.log_to_console && !config.json_format)
        .then(|| fmt::layer().with_target(true).with_level(true));
    let console_json = (config.log_to_console && config.json_format)
        .then(|| fmt::layer().json().with_target(true));

    let file_layer = match (config.log_to_file, config.log_file_path.as_deref()) {
        (true, Some(path)) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .json()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_plain)
        .with(console_json)
        .with(file_layer)
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("Logging already initialized: {e}")))?;

    info!(
        app = %config.app_name,
        level = %config.log_level,
        json = config.json_format,
        "Logging initialized"
    );
    Ok(())
}

/// Filter honoring `RUST_LOG`, falling back to the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy()
}
