//! Instrument polling: command/response cycles feeding the relay queue.

use std::sync::Arc;

use plcrelay_framework::{BridgeHealth, DeviceLog, LinkSide};
use tokio_util::sync::CancellationToken;

use crate::command::CommandSpec;
use crate::encoder::{EncodeError, encode};
use crate::error::RelayError;
use crate::instrument::InstrumentTransport;
use crate::matcher::ResponseMatcher;
use crate::queue::{BoundedRelayQueue, QueueItem};
use crate::timing::{TimingConfig, bounded, sleep_or_cancel};

/// What happened to one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Encoded and queued; `dropped` older items were evicted to make room.
    Queued { offset: u32, dropped: usize },
    /// Matched no command; logged and skipped.
    Invalid,
    /// Matched a command whose kind has no encoding.
    Skipped,
}

/// Polls one instrument and feeds one queue.
///
/// Owns the instrument link and the response matcher; the queue is shared
/// with exactly one [`crate::writer::ControllerWriter`].
pub struct InstrumentPoller {
    link: Box<dyn InstrumentTransport>,
    commands: Vec<Arc<CommandSpec>>,
    matcher: ResponseMatcher,
    queue: Arc<BoundedRelayQueue>,
    timing: TimingConfig,
    log: DeviceLog,
    health: Arc<BridgeHealth>,
}

impl InstrumentPoller {
    pub fn new(
        link: Box<dyn InstrumentTransport>,
        commands: Vec<Arc<CommandSpec>>,
        queue: Arc<BoundedRelayQueue>,
        timing: TimingConfig,
        log: DeviceLog,
        health: Arc<BridgeHealth>,
    ) -> Self {
        Self {
            link,
            commands,
            matcher: ResponseMatcher::new(),
            queue,
            timing,
            log: log.for_side(LinkSide::Instrument),
            health,
        }
    }

    /// Run until cancelled.
    ///
    /// Every failure closes the link, waits the fixed backoff, and reopens.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.log.info(format!(
            "Starting instrument poller on {} ({} commands)",
            self.link.describe(),
            self.commands.len()
        ));

        while !cancel.is_cancelled() {
            match self.open().await {
                Ok(()) => {
                    self.log.info("Instrument connected");
                    self.record_success();

                    let result = self.poll_until_failure(&cancel).await;
                    self.close().await;

                    match result {
                        Ok(()) => break,
                        Err(e) if cancel.is_cancelled() => {
                            self.log.debug(format!("Stopped during shutdown: {e}"));
                            break;
                        }
                        Err(e) => {
                            self.log.error(format!("Serial communication error: {e}"));
                            self.record_failure(&e);
                        }
                    }
                }
                Err(e) => {
                    self.log.error(format!("Failed to open instrument: {e}"));
                    self.record_failure(&e);
                }
            }

            self.health.record_reconnect();
            if !sleep_or_cancel(self.timing.reconnect_backoff(), &cancel).await {
                break;
            }
            self.log.info("Reconnecting to instrument");
        }

        self.log.info("Instrument poller stopped");
    }

    /// Run cycles back to back until a failure; `Ok` means cancelled.
    async fn poll_until_failure(&mut self, cancel: &CancellationToken) -> Result<(), RelayError> {
        loop {
            self.poll_cycle(cancel).await?;
            if cancel.is_cancelled() {
                return Ok(());
            }

            let delay = self.timing.cycle_delay();
            if !delay.is_zero() && !sleep_or_cancel(delay, cancel).await {
                return Ok(());
            }
        }
    }

    /// Send every command once, in order, handling each response.
    ///
    /// Stops early (with `Ok`) when cancelled between commands.
    pub async fn poll_cycle(&mut self, cancel: &CancellationToken) -> Result<(), RelayError> {
        for index in 0..self.commands.len() {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let spec = self.commands[index].clone();
            self.matcher.set_pending(spec.clone());

            bounded(
                "send",
                self.timing.send_timeout(),
                self.link.send(spec.send_text()),
            )
            .await?
            .map_err(|e| RelayError::transport("send", e))?;

            if cancel.is_cancelled() {
                return Ok(());
            }

            let response = bounded("receive", self.timing.receive_timeout(), self.link.receive())
                .await?
                .map_err(|e| RelayError::transport("receive", e))?;

            self.handle_response(&response)?;
        }
        Ok(())
    }

    /// Validate, encode and enqueue one response.
    ///
    /// Only encoding failures are errors; a response that matches nothing
    /// is logged and skipped.
    pub fn handle_response(&mut self, response: &str) -> Result<ResponseOutcome, RelayError> {
        let Some(spec) = self.matcher.match_response(response, &self.commands) else {
            return Ok(self.reject(response));
        };

        self.record_success();

        match encode(response, &spec) {
            Ok(payload) => {
                let size = payload.len();
                let dropped = self.queue.enqueue(QueueItem::new(payload, spec.offset()));
                self.health.record_relayed();
                if dropped > 0 {
                    self.health.record_dropped(dropped as u64);
                    self.log
                        .warn(format!("Relay queue full, dropped {dropped} oldest item(s)"));
                }
                self.log.debug(format!(
                    "Queued {size} byte(s) for offset {} from {:?}",
                    spec.offset(),
                    spec.send_text()
                ));
                Ok(ResponseOutcome::Queued {
                    offset: spec.offset(),
                    dropped,
                })
            }
            Err(EncodeError::Unsupported(kind)) => {
                self.log.debug(format!(
                    "Ignoring response to {:?} ({kind} command)",
                    spec.send_text()
                ));
                Ok(ResponseOutcome::Skipped)
            }
            Err(EncodeError::PatternMismatch(_)) => Ok(self.reject(response)),
            Err(source) => Err(RelayError::Encoding {
                command: spec.send_text().to_string(),
                source,
            }),
        }
    }

    fn reject(&self, response: &str) -> ResponseOutcome {
        self.health.record_invalid();
        self.log
            .warn(RelayError::Validation(response.to_string()).to_string());
        ResponseOutcome::Invalid
    }

    pub fn queue(&self) -> &Arc<BoundedRelayQueue> {
        &self.queue
    }

    async fn open(&mut self) -> Result<(), RelayError> {
        bounded("open", self.timing.open_timeout(), self.link.open())
            .await?
            .map_err(RelayError::connection)
    }

    /// Close failures only matter for diagnostics; the link is reopened anyway.
    async fn close(&mut self) {
        match bounded("close", self.timing.close_timeout(), self.link.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.log.debug(format!("Error closing instrument: {e}")),
            Err(e) => self.log.debug(e.to_string()),
        }
    }

    fn record_success(&self) {
        self.health
            .record_link_success(self.log.device(), LinkSide::Instrument);
    }

    fn record_failure(&self, error: &RelayError) {
        self.health
            .record_link_failure(self.log.device(), LinkSide::Instrument, &error.to_string());
    }
}
