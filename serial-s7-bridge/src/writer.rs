//! Controller writing: drains the relay queue into a data block.

use std::sync::Arc;

use plcrelay_framework::{BridgeHealth, DeviceLog, LinkSide};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::controller::ControllerTransport;
use crate::error::RelayError;
use crate::queue::{BoundedRelayQueue, QueueItem};
use crate::timing::{TimingConfig, bounded, sleep_or_cancel};

/// Data block and base address a device writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteTarget {
    pub db_number: u16,
    #[serde(default)]
    pub start_address: u32,
}

impl WriteTarget {
    /// Absolute byte address of a queue item.
    pub fn address_of(&self, offset: u32) -> Option<u32> {
        self.start_address.checked_add(offset)
    }
}

/// Writes queued items to one controller.
///
/// A failed write drops the item; the link is then reopened after the
/// fixed backoff.
pub struct ControllerWriter {
    link: Box<dyn ControllerTransport>,
    target: WriteTarget,
    queue: Arc<BoundedRelayQueue>,
    timing: TimingConfig,
    log: DeviceLog,
    health: Arc<BridgeHealth>,
}

impl ControllerWriter {
    pub fn new(
        link: Box<dyn ControllerTransport>,
        target: WriteTarget,
        queue: Arc<BoundedRelayQueue>,
        timing: TimingConfig,
        log: DeviceLog,
        health: Arc<BridgeHealth>,
    ) -> Self {
        Self {
            link,
            target,
            queue,
            timing,
            log: log.for_side(LinkSide::Controller),
            health,
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.log.info(format!(
            "Starting controller writer on {} (DB{} from byte {})",
            self.link.describe(),
            self.target.db_number,
            self.target.start_address
        ));

        while !cancel.is_cancelled() {
            match self.open().await {
                Ok(()) => {
                    self.log.info("Controller connected");
                    self.record_success();

                    let result = self.drain(&cancel).await;
                    self.close().await;

                    match result {
                        Ok(()) => break,
                        Err(e) if cancel.is_cancelled() => {
                            self.log.debug(format!("Stopped during shutdown: {e}"));
                            break;
                        }
                        Err(e) => {
                            self.log.error(format!("PLC communication error: {e}"));
                            self.record_failure(&e);
                        }
                    }
                }
                Err(e) => {
                    self.log.error(format!("Failed to connect to controller: {e}"));
                    self.record_failure(&e);
                }
            }

            self.health.record_reconnect();
            if !sleep_or_cancel(self.timing.reconnect_backoff(), &cancel).await {
                break;
            }
            self.log.info("Reconnecting to controller");
        }

        self.log.info("Controller writer stopped");
    }

    /// Write items as they arrive; `Ok` means cancelled.
    async fn drain(&mut self, cancel: &CancellationToken) -> Result<(), RelayError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.queue.try_dequeue() {
                Some(item) => self.write_item(item).await?,
                None => {
                    if !sleep_or_cancel(self.timing.idle_poll(), cancel).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Write one item at `start_address + offset`.
    ///
    /// The item is consumed either way; failed writes are not retried.
    pub async fn write_item(&mut self, item: QueueItem) -> Result<(), RelayError> {
        if item.payload.is_empty() {
            self.log
                .warn(format!("Skipping empty payload for offset {}", item.offset));
            return Ok(());
        }

        let address = self.target.address_of(item.offset).ok_or_else(|| {
            RelayError::transport(
                "write",
                format!(
                    "offset {} overflows start address {}",
                    item.offset, self.target.start_address
                ),
            )
        })?;

        let result = bounded(
            "write",
            self.timing.write_timeout(),
            self.link.write(self.target.db_number, address, &item.payload),
        )
        .await
        .and_then(|inner| inner.map_err(|e| RelayError::transport("write", e)));

        match result {
            Ok(()) => {
                self.health.record_write_ok();
                self.record_success();
                self.log.info(format!(
                    "Wrote {} byte(s) to DB{}.DBB{address}",
                    item.payload.len(),
                    self.target.db_number
                ));
                Ok(())
            }
            Err(e) => {
                self.health.record_write_failed();
                self.log.warn(format!(
                    "Dropped {} byte(s) for DB{}.DBB{address} after failed write",
                    item.payload.len(),
                    self.target.db_number
                ));
                Err(e)
            }
        }
    }

    async fn open(&mut self) -> Result<(), RelayError> {
        bounded("open", self.timing.open_timeout(), self.link.open())
            .await?
            .map_err(RelayError::connection)
    }

    async fn close(&mut self) {
        match bounded("close", self.timing.close_timeout(), self.link.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.log.debug(format!("Error closing controller: {e}")),
            Err(e) => self.log.debug(e.to_string()),
        }
    }

    fn record_success(&self) {
        self.health
            .record_link_success(self.log.device(), LinkSide::Controller);
    }

    fn record_failure(&self, error: &RelayError) {
        self.health
            .record_link_failure(self.log.device(), LinkSide::Controller, &error.to_string());
    }
}
