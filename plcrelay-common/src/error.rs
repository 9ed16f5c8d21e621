use thiserror::Error;

/// Error type for the shared plcrelay utilities.
#[derive(Debug, Error)]
pub enum Error {
    /// A global tracing subscriber could not be installed.
    #[error("tracing: {0}")]
    Tracing(String),
}

/// Result type alias using plcrelay's Error.
pub type Result<T> = std::result::Result<T, Error>;
