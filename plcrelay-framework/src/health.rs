//! Bridge health monitoring and metrics.
//!
//! This module provides [`BridgeHealth`], a tracker shared by every worker
//! of a bridge. Each device contributes two links (instrument and
//! controller); each link has its own liveness state. Relay counters are
//! bridge-wide.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use plcrelay_common::{DeviceLiveness, DeviceStatus, HealthSnapshot, LinkSide};

/// Consecutive failures after which a link is reported offline.
const OFFLINE_AFTER_FAILURES: u32 = 3;

/// Bridge health metrics.
#[derive(Debug)]
pub struct BridgeHealth {
    /// Bridge name.
    bridge_name: String,
    /// Start time for uptime calculation.
    start_time: Instant,
    /// Responses encoded and queued.
    responses_relayed: AtomicU64,
    /// Responses that matched no command.
    responses_invalid: AtomicU64,
    /// Queue items evicted by overflow.
    items_dropped: AtomicU64,
    /// Successful controller writes.
    writes_ok: AtomicU64,
    /// Failed controller writes.
    writes_failed: AtomicU64,
    /// Reconnect attempts.
    reconnects: AtomicU64,
    /// Per-link liveness tracking.
    links: RwLock<HashMap<(String, LinkSide), LinkState>>,
}

/// Link state for liveness tracking.
#[derive(Debug, Clone, Default)]
struct LinkState {
    /// Current status.
    status: DeviceStatus,
    /// Last successful exchange (millis since epoch).
    last_seen: i64,
    /// Number of consecutive failures.
    consecutive_failures: u32,
    /// Last error message (if any).
    last_error: Option<String>,
}

impl BridgeHealth {
    /// Create a new health tracker.
    pub fn new(bridge_name: impl Into<String>) -> Self {
        Self {
            bridge_name: bridge_name.into(),
            start_time: Instant::now(),
            responses_relayed: AtomicU64::new(0),
            responses_invalid: AtomicU64::new(0),
            items_dropped: AtomicU64::new(0),
            writes_ok: AtomicU64::new(0),
            writes_failed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            links: RwLock::new(HashMap::new()),
        }
    }

    /// Register a link so it counts towards the total before its first poll.
    pub fn register_link(&self, device: &str, side: LinkSide) {
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        links.entry((device.to_string(), side)).or_default();
    }

    /// Record that a link exchanged data successfully.
    pub fn record_link_success(&self, device: &str, side: LinkSide) {
        let now = chrono::Utc::now().timestamp_millis();

        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        let state = links.entry((device.to_string(), side)).or_default();

        state.status = DeviceStatus::Online;
        state.last_seen = now;
        state.consecutive_failures = 0;
        state.last_error = None;
    }

    /// Record that a link failed.
    pub fn record_link_failure(&self, device: &str, side: LinkSide, error: &str) {
        let mut links = self.links.write().unwrap_or_else(PoisonError::into_inner);
        let state = links.entry((device.to_string(), side)).or_default();

        state.consecutive_failures += 1;
        state.last_error = Some(error.to_string());

        if state.consecutive_failures >= OFFLINE_AFTER_FAILURES {
            state.status = DeviceStatus::Offline;
        } else {
            state.status = DeviceStatus::Degraded;
        }
    }

    pub fn record_relayed(&self) {
        self.responses_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.responses_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.items_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_write_ok(&self) {
        self.writes_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failed(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current health metrics.
    pub fn snapshot(&self) -> HealthSnapshot {
        let (total, responding, failed) = {
            let links = self.links.read().unwrap_or_else(PoisonError::into_inner);
            let mut responding = 0u64;
            let mut failed = 0u64;
            for state in links.values() {
                match state.status {
                    DeviceStatus::Online | DeviceStatus::Degraded => responding += 1,
                    DeviceStatus::Offline => failed += 1,
                    DeviceStatus::Unknown => {}
                }
            }
            (links.len() as u64, responding, failed)
        };

        let status = if failed == 0 {
            "healthy"
        } else if responding > 0 {
            "degraded"
        } else {
            "error"
        };

        HealthSnapshot {
            bridge: self.bridge_name.clone(),
            status: status.to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            links_total: total,
            links_responding: responding,
            links_failed: failed,
            responses_relayed: self.responses_relayed.load(Ordering::Relaxed),
            responses_invalid: self.responses_invalid.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            writes_ok: self.writes_ok.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Get liveness info for one link.
    pub fn link_liveness(&self, device: &str, side: LinkSide) -> Option<DeviceLiveness> {
        let links = self.links.read().unwrap_or_else(PoisonError::into_inner);
        links
            .get(&(device.to_string(), side))
            .map(|state| to_liveness(device, side, state))
    }

    /// Get liveness info for all links, sorted by device then side.
    pub fn all_liveness(&self) -> Vec<DeviceLiveness> {
        let links = self.links.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = links
            .iter()
            .map(|((device, side), state)| to_liveness(device, *side, state))
            .collect();
        all.sort_by(|a, b| {
            (a.device.as_str(), a.side.as_str()).cmp(&(b.device.as_str(), b.side.as_str()))
        });
        all
    }
}

fn to_liveness(device: &str, side: LinkSide, state: &LinkState) -> DeviceLiveness {
    DeviceLiveness {
        device: device.to_string(),
        side,
        status: state.status,
        last_seen: state.last_seen,
        consecutive_failures: state.consecutive_failures,
        last_error: state.last_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_new() {
        let health = BridgeHealth::new("test");
        assert_eq!(health.bridge_name, "test");

        let snapshot = health.snapshot();
        assert_eq!(snapshot.bridge, "test");
        assert_eq!(snapshot.status, "healthy");
        assert_eq!(snapshot.links_total, 0);
    }

    #[test]
    fn test_register_link_counts_as_unknown() {
        let health = BridgeHealth::new("test");
        health.register_link("oven01", LinkSide::Instrument);
        health.register_link("oven01", LinkSide::Controller);

        let snapshot = health.snapshot();
        assert_eq!(snapshot.links_total, 2);
        assert_eq!(snapshot.links_responding, 0);

        let liveness = health
            .link_liveness("oven01", LinkSide::Controller)
            .unwrap();
        assert_eq!(liveness.status, DeviceStatus::Unknown);
    }

    #[test]
    fn test_link_success() {
        let health = BridgeHealth::new("test");

        health.record_link_success("oven01", LinkSide::Instrument);

        let liveness = health
            .link_liveness("oven01", LinkSide::Instrument)
            .unwrap();
        assert_eq!(liveness.status, DeviceStatus::Online);
        assert_eq!(liveness.consecutive_failures, 0);
        assert!(liveness.last_error.is_none());
        assert!(liveness.last_seen > 0);
    }

    #[test]
    fn test_link_failure_goes_offline_after_three() {
        let health = BridgeHealth::new("test");

        health.record_link_failure("oven01", LinkSide::Controller, "timeout");
        let liveness = health
            .link_liveness("oven01", LinkSide::Controller)
            .unwrap();
        assert_eq!(liveness.status, DeviceStatus::Degraded);

        health.record_link_failure("oven01", LinkSide::Controller, "timeout");
        health.record_link_failure("oven01", LinkSide::Controller, "timeout");
        let liveness = health
            .link_liveness("oven01", LinkSide::Controller)
            .unwrap();
        assert_eq!(liveness.status, DeviceStatus::Offline);
        assert_eq!(liveness.consecutive_failures, 3);
        assert_eq!(liveness.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_recovery() {
        let health = BridgeHealth::new("test");

        for _ in 0..3 {
            health.record_link_failure("oven01", LinkSide::Instrument, "error");
        }
        health.record_link_success("oven01", LinkSide::Instrument);

        let liveness = health
            .link_liveness("oven01", LinkSide::Instrument)
            .unwrap();
        assert_eq!(liveness.status, DeviceStatus::Online);
        assert_eq!(liveness.consecutive_failures, 0);
    }

    #[test]
    fn test_health_status() {
        let health = BridgeHealth::new("test");

        health.record_link_success("d1", LinkSide::Instrument);
        health.record_link_success("d2", LinkSide::Instrument);
        assert_eq!(health.snapshot().status, "healthy");

        for _ in 0..3 {
            health.record_link_failure("d1", LinkSide::Instrument, "error");
        }
        assert_eq!(health.snapshot().status, "degraded");

        for _ in 0..3 {
            health.record_link_failure("d2", LinkSide::Instrument, "error");
        }
        assert_eq!(health.snapshot().status, "error");
    }

    #[test]
    fn test_relay_counters() {
        let health = BridgeHealth::new("test");

        health.record_relayed();
        health.record_relayed();
        health.record_invalid();
        health.record_dropped(5);
        health.record_write_ok();
        health.record_write_failed();
        health.record_reconnect();

        let snapshot = health.snapshot();
        assert_eq!(snapshot.responses_relayed, 2);
        assert_eq!(snapshot.responses_invalid, 1);
        assert_eq!(snapshot.items_dropped, 5);
        assert_eq!(snapshot.writes_ok, 1);
        assert_eq!(snapshot.writes_failed, 1);
        assert_eq!(snapshot.reconnects, 1);
    }

    #[test]
    fn test_all_liveness_sorted() {
        let health = BridgeHealth::new("test");
        health.register_link("b", LinkSide::Instrument);
        health.register_link("a", LinkSide::Instrument);
        health.register_link("a", LinkSide::Controller);

        let all = health.all_liveness();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].device, "a");
        assert_eq!(all[0].side, LinkSide::Controller);
        assert_eq!(all[2].device, "b");
    }
}
