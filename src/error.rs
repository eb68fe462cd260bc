//! # Error Types
//!
//! Custom error types for the EX Bus receiver using `thiserror`.
//!
//! The byte decoder itself never fails: malformed input degrades to
//! "no channel update". These errors cover frame parsing helpers,
//! configuration and the host serial link.

use thiserror::Error;

/// Main error type for the EX Bus receiver
#[derive(Debug, Error)]
pub enum ExBusError {
    /// EX Bus protocol errors
    #[error("EX Bus protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// No usable serial device
    #[error("Serial port not found (tried: {0})")]
    SerialPortNotFound(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Status serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the EX Bus receiver
pub type Result<T> = std::result::Result<T, ExBusError>;
