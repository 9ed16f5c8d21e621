//! Configuration for the serial to S7 bridge.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use plcrelay_framework::{BridgeConfig, BridgeError, LoggingConfig};
use serde::{Deserialize, Serialize};

use crate::command::{CommandConfig, CommandSpec};
use crate::controller::S7Endpoint;
use crate::instrument::{SerialEndpoint, SimulatedEndpoint};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::timing::TimingConfig;
use crate::writer::WriteTarget;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialS7BridgeConfig {
    /// Relay settings
    pub bridge: RelayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig for SerialS7BridgeConfig {
    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> plcrelay_framework::Result<()> {
        self.bridge.validate()
    }
}

/// Relay settings shared by all devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Devices to relay
    pub devices: Vec<DeviceConfig>,

    /// Commands used by devices that name neither inline commands nor a set
    #[serde(default)]
    pub commands: Vec<CommandConfig>,

    /// Named command sets (reusable across devices)
    #[serde(default)]
    pub command_sets: HashMap<String, Vec<CommandConfig>>,

    /// Items each device queue holds before dropping the oldest
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Timeouts and delays
    #[serde(default)]
    pub timing: TimingConfig,

    /// What to do when a worker task dies
    #[serde(default)]
    pub restart: RestartPolicy,

    /// Delay before a dead worker is restarted
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Health summary interval in seconds (0 disables it)
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_restart_delay_ms() -> u64 {
    5000
}

fn default_health_interval() -> u64 {
    60
}

/// Restart policy for worker tasks that end abnormally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Restart after `restart_delay_ms`
    #[default]
    Always,
    /// Log and leave the worker stopped
    Never,
}

/// One instrument/controller pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name (used in logs and health)
    pub name: String,

    /// Instrument link
    pub instrument: InstrumentConfig,

    /// Controller link and target block
    pub controller: ControllerConfig,

    /// Commands to poll (inline definition)
    #[serde(default)]
    pub commands: Vec<CommandConfig>,

    /// Reference to a named command set
    #[serde(default)]
    pub command_set: Option<String>,
}

/// Instrument connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InstrumentConfig {
    /// Instrument on a serial port
    Serial(SerialEndpoint),
    /// Canned responses, no hardware
    Simulated(SimulatedEndpoint),
}

/// Controller connection plus the block the device writes into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Data block number
    pub db_number: u16,

    /// Byte address command offsets are added to
    #[serde(default)]
    pub start_address: u32,

    /// How to reach the controller
    pub connection: ControllerConnection,
}

impl ControllerConfig {
    pub fn target(&self) -> WriteTarget {
        WriteTarget {
            db_number: self.db_number,
            start_address: self.start_address,
        }
    }
}

/// Controller transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControllerConnection {
    /// Siemens S7 over ISO-on-TCP
    S7(S7Endpoint),
    /// In-memory controller
    Simulated,
}

impl RelayConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.devices.is_empty() {
            return Err(BridgeError::validation(
                "At least one device must be configured",
            ));
        }

        if self.queue_capacity == 0 {
            return Err(BridgeError::validation("queue_capacity must be at least 1"));
        }

        let zero = self.timing.zero_limits();
        if !zero.is_empty() {
            return Err(BridgeError::validation(format!(
                "timing values must be positive: {}",
                zero.join(", ")
            )));
        }

        for (name, commands) in &self.command_sets {
            compile(commands).map_err(|e| {
                BridgeError::validation(format!("Command set '{name}': {e}"))
            })?;
        }
        compile(&self.commands)
            .map_err(|e| BridgeError::validation(format!("Default commands: {e}")))?;

        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(BridgeError::validation("Device name cannot be empty"));
            }

            if !names.insert(device.name.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Duplicate device name '{}'",
                    device.name
                )));
            }

            if self.device_commands(device)?.is_empty() {
                return Err(BridgeError::validation(format!(
                    "Device '{}': must specify commands, command_set, or default commands",
                    device.name
                )));
            }

            validate_instrument(&device.name, &device.instrument)?;
            validate_controller(&device.name, &device.controller)?;
        }

        Ok(())
    }

    /// Compiled commands for a device, in polling order.
    ///
    /// Inline commands come first, then the named set. A device naming
    /// neither uses the default `commands` list.
    pub fn device_commands(
        &self,
        device: &DeviceConfig,
    ) -> Result<Vec<Arc<CommandSpec>>, BridgeError> {
        let mut configs: Vec<&CommandConfig> = device.commands.iter().collect();

        if let Some(set_name) = &device.command_set {
            let set = self.command_sets.get(set_name).ok_or_else(|| {
                BridgeError::validation(format!(
                    "Device '{}': unknown command_set '{}'",
                    device.name, set_name
                ))
            })?;
            configs.extend(set);
        }

        if configs.is_empty() {
            configs.extend(&self.commands);
        }

        configs
            .into_iter()
            .map(|command| {
                CommandSpec::try_from(command).map(Arc::new).map_err(|e| {
                    BridgeError::validation(format!(
                        "Device '{}': invalid pattern for {:?}: {}",
                        device.name, command.send, e
                    ))
                })
            })
            .collect()
    }
}

fn compile(commands: &[CommandConfig]) -> Result<(), String> {
    for command in commands {
        if command.send.is_empty() {
            return Err("command text cannot be empty".to_string());
        }
        CommandSpec::try_from(command)
            .map_err(|e| format!("invalid pattern for {:?}: {}", command.send, e))?;
    }
    Ok(())
}

fn validate_instrument(device: &str, instrument: &InstrumentConfig) -> Result<(), BridgeError> {
    if let InstrumentConfig::Serial(serial) = instrument {
        if serial.port.is_empty() {
            return Err(BridgeError::validation(format!(
                "Device '{device}': serial port cannot be empty"
            )));
        }
        if serial.baud_rate == 0 {
            return Err(BridgeError::validation(format!(
                "Device '{device}': baud_rate must be positive"
            )));
        }
        if !(5..=8).contains(&serial.data_bits) {
            return Err(BridgeError::validation(format!(
                "Device '{device}': data_bits must be 5-8, got {}",
                serial.data_bits
            )));
        }
        if !matches!(serial.stop_bits, 1 | 2) {
            return Err(BridgeError::validation(format!(
                "Device '{device}': stop_bits must be 1 or 2, got {}",
                serial.stop_bits
            )));
        }
    }
    Ok(())
}

fn validate_controller(device: &str, controller: &ControllerConfig) -> Result<(), BridgeError> {
    if let ControllerConnection::S7(endpoint) = &controller.connection {
        if endpoint.address.is_empty() {
            return Err(BridgeError::validation(format!(
                "Device '{device}': controller address cannot be empty"
            )));
        }
        if endpoint.rack > 7 {
            return Err(BridgeError::validation(format!(
                "Device '{device}': rack must be 0-7, got {}",
                endpoint.rack
            )));
        }
        if endpoint.slot > 31 {
            return Err(BridgeError::validation(format!(
                "Device '{device}': slot must be 0-31, got {}",
                endpoint.slot
            )));
        }
    }
    Ok(())
}
