//! Injected log sink.
//!
//! Bridge components never log through a global: each one is constructed
//! with a [`DeviceLog`] handle that forwards to a shared [`LogSink`]. The
//! default sink emits `tracing` events; tests install a [`MemorySink`] and
//! inspect what was logged.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::Level;

use crate::health::LinkSide;

/// Append-only log capability.
pub trait LogSink: Send + Sync {
    /// Append one message with its device context.
    fn log(&self, level: Level, device: &str, side: Option<LinkSide>, message: &str);
}

/// Sink that forwards every message to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, device: &str, side: Option<LinkSide>, message: &str) {
        let side = side.map(|s| s.as_str()).unwrap_or("-");
        match level {
            Level::ERROR => tracing::error!(device = %device, side = %side, "{}", message),
            Level::WARN => tracing::warn!(device = %device, side = %side, "{}", message),
            Level::INFO => tracing::info!(device = %device, side = %side, "{}", message),
            Level::DEBUG => tracing::debug!(device = %device, side = %side, "{}", message),
            _ => tracing::trace!(device = %device, side = %side, "{}", message),
        }
    }
}

/// A message captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub device: String,
    pub side: Option<LinkSide>,
    pub message: String,
}

/// Sink that keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything logged so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Count messages at `level` whose text contains `needle`.
    pub fn count(&self, level: Level, needle: &str) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.level == level && r.message.contains(needle))
            .count()
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: Level, device: &str, side: Option<LinkSide>, message: &str) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogRecord {
                level,
                device: device.to_string(),
                side,
                message: message.to_string(),
            });
    }
}

/// Log handle bound to one device (and optionally one side of it).
#[derive(Clone)]
pub struct DeviceLog {
    sink: Arc<dyn LogSink>,
    device: Arc<str>,
    side: Option<LinkSide>,
}

impl DeviceLog {
    pub fn new(sink: Arc<dyn LogSink>, device: impl Into<Arc<str>>) -> Self {
        Self {
            sink,
            device: device.into(),
            side: None,
        }
    }

    /// Same device and sink, scoped to one side of the pairing.
    pub fn for_side(&self, side: LinkSide) -> Self {
        Self {
            sink: self.sink.clone(),
            device: self.device.clone(),
            side: Some(side),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn side(&self) -> Option<LinkSide> {
        self.side
    }

    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        self.sink
            .log(level, &self.device, self.side, message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::DEBUG, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::INFO, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::WARN, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::ERROR, message);
    }
}

impl std::fmt::Debug for DeviceLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLog")
            .field("device", &self.device)
            .field("side", &self.side)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_captures_context() {
        let sink = Arc::new(MemorySink::new());
        let log = DeviceLog::new(sink.clone(), "oven01").for_side(LinkSide::Instrument);

        log.warn("Received invalid data: 'xx'");
        log.info("connected");

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device, "oven01");
        assert_eq!(records[0].side, Some(LinkSide::Instrument));
        assert_eq!(records[0].level, Level::WARN);
        assert_eq!(sink.count(Level::WARN, "invalid data"), 1);
        assert_eq!(sink.count(Level::INFO, "invalid data"), 0);
    }

    #[test]
    fn test_for_side_shares_sink() {
        let sink = Arc::new(MemorySink::new());
        let log = DeviceLog::new(sink.clone(), "oven01");
        let controller = log.for_side(LinkSide::Controller);

        log.error("task failed");
        controller.error("write failed");

        let records = sink.records();
        assert_eq!(records[0].side, None);
        assert_eq!(records[1].side, Some(LinkSide::Controller));
        assert_eq!(controller.device(), "oven01");
    }

    #[test]
    fn test_tracing_sink_accepts_all_levels() {
        let sink = TracingSink;
        for level in [
            Level::ERROR,
            Level::WARN,
            Level::INFO,
            Level::DEBUG,
            Level::TRACE,
        ] {
            sink.log(level, "oven01", None, "message");
        }
    }

    #[test]
    fn test_tracing_sink_with_side() {
        let log = DeviceLog::new(Arc::new(TracingSink), "oven01").for_side(LinkSide::Controller);
        log.warn("write failed");
        log.info("connected");
        assert_eq!(log.side(), Some(LinkSide::Controller));
    }
}
