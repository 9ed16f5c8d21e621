//! plcrelay Bridge Framework
//!
//! Common abstractions for building bridges that relay device data.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, cancellation, shutdown)
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeHealth`] for per-link liveness and relay counters
//!
//! # Example
//!
//! ```ignore
//! use plcrelay_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
//!
//!     // Spawn protocol-specific workers
//!     runner.spawn(my_worker(runner.cancel_token(), runner.health()));
//!
//!     // Run until Ctrl+C
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
mod error;
mod health;
mod runner;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use health::BridgeHealth;
pub use runner::BridgeRunner;

// Re-export commonly used types from plcrelay-common
pub use plcrelay_common::{
    DeviceLiveness, DeviceLog, DeviceStatus, HealthSnapshot, LinkSide, LogFormat, LogSink,
    LoggingConfig, MemorySink, TracingSink,
};
