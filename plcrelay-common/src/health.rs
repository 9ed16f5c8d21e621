//! Health and liveness types shared by bridges.
//!
//! The tracker that produces these lives in the bridge framework; the types
//! are kept here so that tools reading health snapshots (log processors,
//! tests) do not need the full framework.

use serde::{Deserialize, Serialize};

/// Link availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Link is connected and exchanging data.
    Online,
    /// Link is down after repeated failures.
    Offline,
    /// Link is up but recently failed.
    Degraded,
    /// Link has not been attempted yet.
    #[default]
    Unknown,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Offline => write!(f, "offline"),
            DeviceStatus::Degraded => write!(f, "degraded"),
            DeviceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Which side of a device pairing a link belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkSide {
    /// Serial instrument side.
    Instrument,
    /// Controller (PLC) side.
    Controller,
}

impl LinkSide {
    /// Return the string name for this side.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkSide::Instrument => "instrument",
            LinkSide::Controller => "controller",
        }
    }
}

impl std::fmt::Display for LinkSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health snapshot of a running bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Bridge name.
    pub bridge: String,
    /// Overall health status ("healthy", "degraded", "error").
    pub status: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Total links tracked (two per device).
    pub links_total: u64,
    /// Links currently online or degraded.
    pub links_responding: u64,
    /// Links currently offline.
    pub links_failed: u64,
    /// Responses encoded and queued for the controller.
    pub responses_relayed: u64,
    /// Responses that matched no command.
    pub responses_invalid: u64,
    /// Queue items evicted by overflow.
    pub items_dropped: u64,
    /// Successful controller writes.
    pub writes_ok: u64,
    /// Failed controller writes (item discarded).
    pub writes_failed: u64,
    /// Reconnect attempts across all links.
    pub reconnects: u64,
}

/// Link liveness information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceLiveness {
    /// Device name from configuration.
    pub device: String,
    /// Link side.
    pub side: LinkSide,
    /// Current status.
    pub status: DeviceStatus,
    /// Last successful exchange (millis since epoch).
    pub last_seen: i64,
    /// Consecutive failures count.
    pub consecutive_failures: u32,
    /// Last error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
