//! Relay error taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::encoder::EncodeError;

/// Errors raised inside a poll cycle or write cycle.
///
/// All of them end the current cycle and lead to a reconnect after the
/// fixed backoff, except [`RelayError::Validation`], which is logged and
/// skipped.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Opening the link failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// I/O failure (or controller rejection) while the link was open.
    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// A bounded operation exceeded its limit.
    #[error("{operation} timed out after {} ms", .limit.as_millis())]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },

    /// The response matched no configured command.
    #[error("Received invalid data: {0:?}")]
    Validation(String),

    /// A command matched but its payload could not be built.
    #[error("Failed to encode response to {command:?}: {source}")]
    Encoding {
        command: String,
        #[source]
        source: EncodeError,
    },
}

impl RelayError {
    pub fn transport(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation,
            message: err.to_string(),
        }
    }

    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }
}
