//! Error taxonomy shared by the DSP stack

use std::time::Duration;
use thiserror::Error;

/// Result type alias using `DspError`
pub type Result<T> = std::result::Result<T, DspError>;

/// Errors raised by memory region accesses
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Access falls outside the region
    #[error("Access out of bounds: offset {offset} + {len} bytes exceeds region of {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
}

/// Core error type for the DSP stack
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DspError {
    /// Bad handle, bad state transition, malformed volume, ...
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Pool or slot exhaustion
    #[error("No resources: {0}")]
    NoResources(String),

    /// Firmware did not reply in time
    #[error("Firmware did not reply to {message} within {after:?}")]
    Timeout {
        message: String,
        after: Duration,
    },

    /// Firmware replied with a non-success result code
    #[error("Firmware rejected {message}: result code {code}")]
    FirmwareFailure { message: String, code: i32 },

    /// Format or codec compiled out
    #[error("Feature not supported: {0}")]
    FeatureNotSupported(String),

    /// Handle not present in the expected collection
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Shared memory access failed
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DspError {
    /// Create an invalid parameter error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create a resource exhaustion error
    pub fn no_resources(msg: impl Into<String>) -> Self {
        Self::NoResources(msg.into())
    }

    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create a feature-not-supported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::FeatureNotSupported(msg.into())
    }

    /// True when the firmware never answered (as opposed to answering with an error)
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<config::ConfigError> for DspError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
