//! Unified error type for the ledd-lib crate.
//!
//! [`LeddError`] wraps bus errors (`DeviceError`) and the request-level error
//! kinds the dispatcher reports back to clients (`Validation`, `NotFound`,
//! `Range`). `From` impls allow `?` to propagate across module boundaries.

use std::fmt;

use crate::bus::DeviceError;

/// Unified error type for ledd-lib operations.
#[derive(Debug)]
pub enum LeddError {
    /// Missing or malformed request fields.
    Validation(String),
    /// Unparseable protocol message. Never answered, only logged.
    Protocol(String),
    /// Unknown controller, stripe or effect id.
    NotFound(String),
    /// Bus communication fault.
    Device(DeviceError),
    /// Value outside the range the hardware accepts (frequency, channel index).
    Range(String),
    /// Standard I/O error (socket, store file).
    Io(std::io::Error),
    /// Persistence error (corrupt store document, serialization).
    Store(String),
    /// Configuration error.
    Config(String),
}

impl fmt::Display for LeddError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeddError::Validation(e) => write!(f, "{e}"),
            LeddError::Protocol(e) => write!(f, "Protocol error: {e}"),
            LeddError::NotFound(what) => write!(f, "{what} not found"),
            LeddError::Device(e) => write!(f, "{e}"),
            LeddError::Range(e) => write!(f, "Out of range: {e}"),
            LeddError::Io(e) => write!(f, "I/O error: {e}"),
            LeddError::Store(e) => write!(f, "Store error: {e}"),
            LeddError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for LeddError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LeddError::Device(e) => Some(e),
            LeddError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DeviceError> for LeddError {
    fn from(e: DeviceError) -> Self {
        LeddError::Device(e)
    }
}

impl From<std::io::Error> for LeddError {
    fn from(e: std::io::Error) -> Self {
        LeddError::Io(e)
    }
}

impl From<serde_json::Error> for LeddError {
    fn from(e: serde_json::Error) -> Self {
        LeddError::Store(e.to_string())
    }
}

/// Crate-level Result alias using [`LeddError`].
pub type Result<T> = std::result::Result<T, LeddError>;
