//! plcrelay Common Library
//!
//! This crate provides shared types and utilities for plcrelay bridges:
//!
//! - [`config`] - Logging configuration
//! - [`health`] - Link liveness and health snapshot types
//! - [`sink`] - The injected log sink handed to every bridge component
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod health;
pub mod sink;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig};
pub use error::{Error, Result};
pub use health::{DeviceLiveness, DeviceStatus, HealthSnapshot, LinkSide};
pub use sink::{DeviceLog, LogRecord, LogSink, MemorySink, TracingSink};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Tracing(e.to_string()))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Tracing(e.to_string()))?;
        }
    }

    Ok(())
}
