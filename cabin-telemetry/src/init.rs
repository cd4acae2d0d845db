//! Telemetry initialization and configuration

use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Error type returned by the init functions.
pub type InitError = Box<dyn std::error::Error + Send + Sync>;

/// Output format of the console layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Initialize console logging.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Only the first call in
/// a process installs a subscriber; later calls are no-ops.
///
/// # Example
/// ```
/// use cabin_telemetry::init_telemetry;
/// init_telemetry("cabin-console").expect("Failed to initialize telemetry");
/// ```
pub fn init_telemetry(service_name: &str) -> Result<(), InitError> {
    init_with_format(service_name, LogFormat::Pretty)
}

/// Initialize JSON logging, for log shippers.
pub fn init_json_telemetry(service_name: &str) -> Result<(), InitError> {
    init_with_format(service_name, LogFormat::Json)
}

/// Initialize logging in the given format.
pub fn init_with_format(service_name: &str, format: LogFormat) -> Result<(), InitError> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = install(format);
        if result.is_ok() {
            tracing::info!(service.name = service_name, format = ?format, "Telemetry initialized");
        }
    });
    result
}

fn install(format: LogFormat) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_line_number(true),
            )
            .try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        assert!(init_telemetry("test").is_ok());
        assert!(init_json_telemetry("test").is_ok());
    }

    #[test]
    fn test_log_format_from_config_value() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
