//! Bridge runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use plcrelay_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::health::BridgeHealth;

/// How long workers get to wind down after cancellation before they are aborted.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bridge runner that manages the lifecycle of a protocol bridge.
///
/// Handles:
/// - Logging initialization
/// - Task spawning and management
/// - Cooperative shutdown on Ctrl+C (cancellation token, then abort)
/// - The shared health tracker
///
/// # Example
///
/// ```ignore
/// use plcrelay_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let args = BridgeArgs::parse_with_default("mybridge.json5");
///     let config = MyBridgeConfig::load(&args.config)?;
///
///     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
///
///     let cancel = runner.cancel_token();
///     runner.spawn(async move {
///         // Worker logic here, exiting once `cancel` fires
///     });
///
///     runner.run().await
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging and health.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Shared health tracker.
    health: Arc<BridgeHealth>,
    /// Cancelled when shutdown starts.
    cancel: CancellationToken,
    /// Grace period before remaining tasks are aborted.
    shutdown_grace: Duration,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner, initializing logging from the config.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None)
    }

    /// Create a new bridge runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let log_config = match args.and_then(|a| a.log_level.as_ref()) {
            Some(level) => LoggingConfig {
                level: level.clone(),
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config)?;

        let runner = Self::without_logging(name, config);
        tracing::info!(bridge = %runner.name, version = %runner.version, "Starting bridge");
        Ok(runner)
    }

    /// Create a runner without installing a tracing subscriber.
    ///
    /// Used when the embedding process already owns logging, and in tests.
    pub fn without_logging(name: impl Into<String>, config: C) -> Self {
        let name = name.into();
        let health = Arc::new(BridgeHealth::new(name.clone()));

        Self {
            name,
            version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            health,
            cancel: CancellationToken::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            tasks: Vec::new(),
        }
    }

    /// Set how long tasks may run after cancellation before being aborted.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Get the bridge name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bridge version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get the shared health tracker.
    pub fn health(&self) -> Arc<BridgeHealth> {
        self.health.clone()
    }

    /// Token cancelled when shutdown starts.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a worker task.
    ///
    /// The task should exit once the cancel token fires; it is aborted if it
    /// outlives the shutdown grace period.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Run the bridge until Ctrl+C is received.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await
    }

    /// Run the bridge until `shutdown` completes.
    ///
    /// This will:
    /// 1. Wait for the shutdown future
    /// 2. Cancel the shared token
    /// 3. Wait up to the grace period for tasks to exit
    /// 4. Abort whatever is still running
    pub async fn run_until<S>(mut self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        shutdown.await;

        tracing::info!(bridge = %self.name, "Received shutdown signal");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut self.tasks);
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        let drain = async {
            for task in tasks {
                if let Err(e) = task.await {
                    if e.is_panic() {
                        tracing::error!(
                            bridge = %self.name,
                            error = %e,
                            "Task panicked during shutdown"
                        );
                    }
                }
            }
        };

        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            tracing::warn!(
                bridge = %self.name,
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "Tasks did not stop in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
    }

    impl BridgeConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }
    }

    fn runner() -> BridgeRunner<TestConfig> {
        BridgeRunner::without_logging(
            "test",
            TestConfig {
                logging: LoggingConfig::default(),
            },
        )
    }

    #[tokio::test]
    async fn test_shutdown_cancels_workers() {
        let mut runner = runner();
        let stopped = Arc::new(AtomicBool::new(false));

        let cancel = runner.cancel_token();
        let flag = stopped.clone();
        runner.spawn(async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        tokio_test::assert_ok!(runner.run_until(async {}).await);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_worker_is_aborted() {
        let mut runner = runner().with_shutdown_grace(Duration::from_millis(50));
        runner.spawn(async {
            // Ignores cancellation entirely.
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        runner.run_until(async {}).await.unwrap();
    }

    #[test]
    fn test_accessors() {
        let runner = runner();
        assert_eq!(runner.name(), "test");
        assert!(!runner.version().is_empty());
        assert_eq!(runner.config().logging().level, "info");
        assert_eq!(runner.health().snapshot().bridge, "test");
    }
}
