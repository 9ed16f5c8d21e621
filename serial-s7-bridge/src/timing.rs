//! Timeouts, backoff and the helpers that apply them.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;

/// Timing settings shared by both loops of every device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Limit for opening either link.
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,

    /// Limit for writing one command to the instrument.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Limit for receiving one response line.
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Limit for one controller write.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Limit for closing either link.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Fixed delay before every reconnect attempt.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// Writer sleep when the queue is empty.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Pause between two poll cycles (0 = back to back).
    #[serde(default)]
    pub cycle_delay_ms: u64,
}

fn default_open_timeout_ms() -> u64 {
    3000
}

fn default_send_timeout_ms() -> u64 {
    1000
}

fn default_receive_timeout_ms() -> u64 {
    2000
}

fn default_write_timeout_ms() -> u64 {
    2000
}

fn default_close_timeout_ms() -> u64 {
    1000
}

fn default_reconnect_backoff_ms() -> u64 {
    1000
}

fn default_idle_poll_ms() -> u64 {
    100
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            open_timeout_ms: default_open_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            idle_poll_ms: default_idle_poll_ms(),
            cycle_delay_ms: 0,
        }
    }
}

impl TimingConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    /// Names of the limits that are zero (a zero limit would fail every call).
    pub fn zero_limits(&self) -> Vec<&'static str> {
        [
            ("open_timeout_ms", self.open_timeout_ms),
            ("send_timeout_ms", self.send_timeout_ms),
            ("receive_timeout_ms", self.receive_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("close_timeout_ms", self.close_timeout_ms),
            ("idle_poll_ms", self.idle_poll_ms),
        ]
        .into_iter()
        .filter(|(_, value)| *value == 0)
        .map(|(name, _)| name)
        .collect()
    }
}

/// Run `fut` with a deadline. The outer error is the timeout; the inner
/// result is left to the caller to classify.
pub async fn bounded<F, T, E>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<Result<T, E>, RelayError>
where
    F: Future<Output = Result<T, E>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| RelayError::Timeout { operation, limit })
}

/// Sleep for `duration` unless cancelled first. Returns `false` on cancellation.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let timing = TimingConfig::default();
        assert_eq!(timing.reconnect_backoff(), Duration::from_secs(1));
        assert_eq!(timing.idle_poll(), Duration::from_millis(100));
        assert_eq!(timing.cycle_delay(), Duration::ZERO);
        assert!(timing.zero_limits().is_empty());
    }

    #[test]
    fn test_zero_limits_reported() {
        let timing = TimingConfig {
            receive_timeout_ms: 0,
            ..TimingConfig::default()
        };
        assert_eq!(timing.zero_limits(), vec!["receive_timeout_ms"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result = bounded("receive", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, std::io::Error>(())
        })
        .await;

        assert!(matches!(
            result,
            Err(RelayError::Timeout {
                operation: "receive",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_bounded_passes_inner_result() {
        let result = bounded("send", Duration::from_secs(1), async {
            Err::<(), _>(std::io::Error::other("broken pipe"))
        })
        .await;

        let inner = result.expect("no timeout");
        assert!(inner.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let cancel = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_millis(10), &cancel).await);

        cancel.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(3600), &cancel).await);
    }
}
