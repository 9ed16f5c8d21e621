//! Serial instrument to Siemens S7 relay.
//!
//! Polls every configured instrument and writes the validated readings
//! into the paired controller's data block.

use std::sync::Arc;

use anyhow::{Context, Result};
use plcrelay_framework::{BridgeArgs, BridgeConfig, BridgeRunner, TracingSink};
use serial_s7_bridge::config::SerialS7BridgeConfig;
use serial_s7_bridge::supervisor::DeviceSupervisor;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("bridge.json5");

    let config = SerialS7BridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut runner = BridgeRunner::new_with_args("serial-s7", config, Some(&args))?;
    info!("Loaded configuration from {:?}", args.config);

    let supervisor = DeviceSupervisor::from_config(
        &runner.config().bridge,
        Arc::new(TracingSink),
        runner.health(),
    )?;

    info!(
        "Relaying {} device(s): {}",
        supervisor.devices().len(),
        supervisor
            .devices()
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let cancel = runner.cancel_token();
    runner.spawn(supervisor.run(cancel));

    runner.run().await?;
    Ok(())
}
