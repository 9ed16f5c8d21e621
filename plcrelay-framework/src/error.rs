//! Errors raised while starting a bridge.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Startup failures: loading config, validating it, installing logging.
///
/// Nothing here is raised once the relay is running; runtime failures are
/// handled inside the bridge's own loops.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("Failed to read configuration: {0}")]
    ConfigRead(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] plcrelay_common::Error),
}

impl BridgeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = BridgeError::ConfigNotFound {
            path: PathBuf::from("/etc/bridge.json5"),
        };
        assert_eq!(err.to_string(), "Configuration file not found: /etc/bridge.json5");

        let err = BridgeError::validation("queue_capacity must be at least 1");
        assert!(err.to_string().ends_with("queue_capacity must be at least 1"));
    }

    #[test]
    fn test_logging_error_converts() {
        let err: BridgeError = plcrelay_common::Error::Tracing("already set".to_string()).into();
        assert!(matches!(err, BridgeError::Logging(_)));
        assert_eq!(err.to_string(), "Logging setup failed: tracing: already set");
    }
}
