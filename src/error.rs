//! Error types for the stream control application

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline driver errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Failed to acquire pipeline: {0}")]
    AcquireFailed(String),

    #[error("Failed to start pipeline: {0}")]
    StartFailed(String),

    #[error("Failed to stop pipeline: {0}")]
    StopFailed(String),

    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(u64),
}

/// Control API transport errors, as seen by the client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, reset or timed out
    #[error("Cannot connect to server - {0}")]
    Unreachable(String),

    #[error("Server returned {0}")]
    UnexpectedStatus(u16),

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            TransportError::UnexpectedStatus(status.as_u16())
        } else if err.is_decode() {
            TransportError::InvalidResponse(err.to_string())
        } else {
            TransportError::Unreachable(err.to_string())
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
