//! Per-device task supervision.
//!
//! Each device gets one poller task and one writer task sharing a queue.
//! Tasks that die are restarted according to the restart policy; a
//! periodic health summary is logged while the bridge runs.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use plcrelay_framework::{BridgeError, BridgeHealth, DeviceLog, LinkSide, LogSink};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::command::CommandSpec;
use crate::config::{
    ControllerConnection, DeviceConfig, InstrumentConfig, RelayConfig, RestartPolicy,
};
use crate::controller::{ControllerTransport, S7Controller, SimulatedController};
use crate::instrument::{InstrumentTransport, SerialInstrument, SimulatedInstrument};
use crate::poller::InstrumentPoller;
use crate::queue::BoundedRelayQueue;
use crate::timing::{TimingConfig, sleep_or_cancel};
use crate::writer::{ControllerWriter, WriteTarget};

/// Builds a fresh instrument link each time a poller (re)starts.
pub type InstrumentFactory = Arc<dyn Fn() -> Box<dyn InstrumentTransport> + Send + Sync>;

/// Builds a fresh controller link each time a writer (re)starts.
pub type ControllerFactory = Arc<dyn Fn() -> Box<dyn ControllerTransport> + Send + Sync>;

/// Everything needed to run one device.
#[derive(Clone)]
pub struct DevicePairing {
    pub name: String,
    pub commands: Vec<Arc<CommandSpec>>,
    pub target: WriteTarget,
    pub instrument: InstrumentFactory,
    pub controller: ControllerFactory,
}

impl DevicePairing {
    pub fn from_config(device: &DeviceConfig, commands: Vec<Arc<CommandSpec>>) -> Self {
        let instrument: InstrumentFactory = match &device.instrument {
            InstrumentConfig::Serial(endpoint) => {
                let endpoint = endpoint.clone();
                Arc::new(move || -> Box<dyn InstrumentTransport> {
                    Box::new(SerialInstrument::new(endpoint.clone()))
                })
            }
            InstrumentConfig::Simulated(endpoint) => {
                let endpoint = endpoint.clone();
                Arc::new(move || -> Box<dyn InstrumentTransport> {
                    Box::new(SimulatedInstrument::new(endpoint.clone()))
                })
            }
        };

        let controller: ControllerFactory = match &device.controller.connection {
            ControllerConnection::S7(endpoint) => {
                let endpoint = endpoint.clone();
                Arc::new(move || -> Box<dyn ControllerTransport> {
                    Box::new(S7Controller::new(endpoint.clone()))
                })
            }
            ControllerConnection::Simulated => {
                // One memory image per device, kept across restarts.
                let plc = SimulatedController::new();
                Arc::new(move || -> Box<dyn ControllerTransport> { Box::new(plc.clone()) })
            }
        };

        Self {
            name: device.name.clone(),
            commands,
            target: device.controller.target(),
            instrument,
            controller,
        }
    }
}

impl std::fmt::Debug for DevicePairing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevicePairing")
            .field("name", &self.name)
            .field("commands", &self.commands.len())
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Settings that apply to every supervised device.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub queue_capacity: usize,
    pub timing: TimingConfig,
    pub restart: RestartPolicy,
    pub restart_delay: Duration,
    /// `None` disables the periodic health summary.
    pub health_interval: Option<Duration>,
}

impl SupervisorSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            timing: config.timing,
            restart: config.restart,
            restart_delay: Duration::from_millis(config.restart_delay_ms),
            health_interval: (config.health_interval_secs > 0)
                .then(|| Duration::from_secs(config.health_interval_secs)),
        }
    }
}

/// Runs every device pairing until cancellation.
pub struct DeviceSupervisor {
    settings: SupervisorSettings,
    devices: Vec<DevicePairing>,
    sink: Arc<dyn LogSink>,
    health: Arc<BridgeHealth>,
}

impl DeviceSupervisor {
    pub fn new(
        settings: SupervisorSettings,
        sink: Arc<dyn LogSink>,
        health: Arc<BridgeHealth>,
    ) -> Self {
        Self {
            settings,
            devices: Vec::new(),
            sink,
            health,
        }
    }

    /// Build a supervisor with one pairing per configured device.
    pub fn from_config(
        config: &RelayConfig,
        sink: Arc<dyn LogSink>,
        health: Arc<BridgeHealth>,
    ) -> Result<Self, BridgeError> {
        let mut supervisor = Self::new(SupervisorSettings::from_config(config), sink, health);
        for device in &config.devices {
            let commands = config.device_commands(device)?;
            supervisor.add_device(DevicePairing::from_config(device, commands));
        }
        Ok(supervisor)
    }

    pub fn add_device(&mut self, pairing: DevicePairing) {
        self.devices.push(pairing);
    }

    pub fn devices(&self) -> &[DevicePairing] {
        &self.devices
    }

    /// Start every device and wait until all tasks have stopped.
    pub async fn run(self, cancel: CancellationToken) {
        let mut tasks = JoinSet::new();

        for device in &self.devices {
            let queue = Arc::new(BoundedRelayQueue::new(self.settings.queue_capacity));
            let log = DeviceLog::new(self.sink.clone(), device.name.as_str());
            self.health.register_link(&device.name, LinkSide::Instrument);
            self.health.register_link(&device.name, LinkSide::Controller);

            let poller = {
                let device = device.clone();
                let queue = queue.clone();
                let log = log.clone();
                let health = self.health.clone();
                let timing = self.settings.timing;
                let cancel = cancel.clone();
                move || {
                    InstrumentPoller::new(
                        (device.instrument)(),
                        device.commands.clone(),
                        queue.clone(),
                        timing,
                        log.clone(),
                        health.clone(),
                    )
                    .run(cancel.clone())
                }
            };

            let writer = {
                let device = device.clone();
                let log = log.clone();
                let health = self.health.clone();
                let timing = self.settings.timing;
                let cancel = cancel.clone();
                move || {
                    ControllerWriter::new(
                        (device.controller)(),
                        device.target,
                        queue.clone(),
                        timing,
                        log.clone(),
                        health.clone(),
                    )
                    .run(cancel.clone())
                }
            };

            tasks.spawn(supervise(
                log.for_side(LinkSide::Instrument),
                self.settings,
                cancel.clone(),
                poller,
            ));
            tasks.spawn(supervise(
                log.for_side(LinkSide::Controller),
                self.settings,
                cancel.clone(),
                writer,
            ));
        }

        let bridge_log = DeviceLog::new(self.sink.clone(), self.health.snapshot().bridge);
        if let Some(interval) = self.settings.health_interval {
            tasks.spawn(report_health(
                self.health.clone(),
                interval,
                bridge_log.clone(),
                cancel.clone(),
            ));
        }

        while let Some(result) = tasks.join_next().await {
            let failure = match result {
                Ok(()) => continue,
                Err(e) if e.is_panic() => panic_message(e.into_panic()),
                Err(e) => e.to_string(),
            };
            bridge_log.error(format!("Supervisor task failed: {failure}"));
        }
    }
}

/// Keep one worker alive according to the restart policy.
///
/// A worker returning normally means it observed cancellation.
async fn supervise<F, Fut>(
    log: DeviceLog,
    settings: SupervisorSettings,
    cancel: CancellationToken,
    mut start: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        let failure = match tokio::spawn(start()).await {
            Ok(()) => return,
            Err(e) if e.is_panic() => panic_message(e.into_panic()),
            Err(e) => e.to_string(),
        };

        log.error(format!("Task failed: {failure}"));
        if cancel.is_cancelled() {
            return;
        }

        match settings.restart {
            RestartPolicy::Never => {
                log.error("Task will not be restarted (restart policy: never)");
                return;
            }
            RestartPolicy::Always => {
                log.warn(format!(
                    "Restarting task in {} ms",
                    settings.restart_delay.as_millis()
                ));
                if !sleep_or_cancel(settings.restart_delay, &cancel).await {
                    return;
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Log a JSON health summary every `interval` until cancelled.
async fn report_health(
    health: Arc<BridgeHealth>,
    interval: Duration,
    log: DeviceLog,
    cancel: CancellationToken,
) {
    while sleep_or_cancel(interval, &cancel).await {
        match serde_json::to_string(&health.snapshot()) {
            Ok(json) => log.info(format!("Health: {json}")),
            Err(e) => log.warn(format!("Failed to serialize health snapshot: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plcrelay_framework::MemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::Level;

    fn settings(restart: RestartPolicy) -> SupervisorSettings {
        SupervisorSettings {
            queue_capacity: 10,
            timing: TimingConfig::default(),
            restart,
            restart_delay: Duration::from_millis(100),
            health_interval: None,
        }
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_panicking_task() {
        let sink = Arc::new(MemorySink::new());
        let log = DeviceLog::new(sink.clone(), "dev1");
        let cancel = CancellationToken::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let counter = starts.clone();
        let worker_cancel = cancel.clone();
        let start = move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            let cancel = worker_cancel.clone();
            async move {
                if attempt < 2 {
                    panic!("worker crashed");
                }
                cancel.cancelled().await;
            }
        };
        let handle = tokio::spawn(supervise(
            log,
            settings(RestartPolicy::Always),
            cancel.clone(),
            start,
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 3);
        assert_eq!(sink.count(Level::ERROR, "worker crashed"), 2);
        assert_eq!(sink.count(Level::WARN, "Restarting task"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_policy_stops() {
        let sink = Arc::new(MemorySink::new());
        let log = DeviceLog::new(sink.clone(), "dev1");
        let starts = Arc::new(AtomicUsize::new(0));

        let counter = starts.clone();
        supervise(log, settings(RestartPolicy::Never), CancellationToken::new(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { panic!("worker crashed"); }
        })
        .await;

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count(Level::ERROR, "restart policy: never"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_failure_logged_through_sink() {
        let sink = Arc::new(MemorySink::new());
        let plc = SimulatedController::new();
        let pairing = DevicePairing {
            name: "dev1".to_string(),
            commands: Vec::new(),
            target: WriteTarget {
                db_number: 1,
                start_address: 0,
            },
            instrument: Arc::new(|| -> Box<dyn InstrumentTransport> { panic!("no such port") }),
            controller: Arc::new(move || -> Box<dyn ControllerTransport> { Box::new(plc.clone()) }),
        };
        let mut supervisor = DeviceSupervisor::new(
            settings(RestartPolicy::Always),
            sink.clone(),
            Arc::new(BridgeHealth::new("bridge")),
        );
        supervisor.add_device(pairing);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();

        let failures: Vec<_> = sink
            .records()
            .into_iter()
            .filter(|r| r.message.starts_with("Supervisor task failed"))
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].level, Level::ERROR);
        assert_eq!(failures[0].device, "bridge");
        assert!(failures[0].message.ends_with("no such port"));
        assert_eq!(sink.count(Level::INFO, "Controller writer stopped"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_reporter_logs_json() {
        let sink = Arc::new(MemorySink::new());
        let health = Arc::new(BridgeHealth::new("bridge"));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(report_health(
            health,
            Duration::from_secs(60),
            DeviceLog::new(sink.clone(), "bridge"),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(sink.count(Level::INFO, "\"bridge\":\"bridge\""), 2);
    }

    #[test]
    fn test_settings_from_config() {
        let config: RelayConfig = json5::from_str(
            r#"{ devices: [], health_interval_secs: 0, restart_delay_ms: 1500 }"#,
        )
        .unwrap();
        let settings = SupervisorSettings::from_config(&config);
        assert_eq!(settings.health_interval, None);
        assert_eq!(settings.restart_delay, Duration::from_millis(1500));
        assert_eq!(settings.queue_capacity, 500);
    }
}
