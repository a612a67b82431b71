//! Error types for the IPC layer

use crate::header::HeaderField;
use crate::message::Command;
use soc_audio_core::{DspError, MemoryError};
use std::time::Duration;
use thiserror::Error;

/// Result type for IPC operations
pub type Result<T> = std::result::Result<T, IpcError>;

/// Errors raised while talking to the firmware
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// No reply within the allotted time
    #[error("{command} timed out after {after:?}")]
    Timeout { command: Command, after: Duration },

    /// Reply carried a non-success result code
    #[error("{command} failed with firmware result {code}")]
    Firmware { command: Command, code: i32 },

    /// Payload does not fit the mailbox window
    #[error("Payload of {size} bytes exceeds mailbox window of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Value does not fit its header bit-field
    #[error("Value {value:#x} does not fit header field {field:?}")]
    FieldOverflow { field: HeaderField, value: u32 },

    /// Message id outside the known id space
    #[error("Unknown message id {0:#04x}")]
    UnknownMessage(u8),

    /// Payload shorter than its layout requires
    #[error("Truncated payload: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Doorbell or core control failed
    #[error("DSP link error: {0}")]
    Link(String),

    /// Transport was shut down while a request was outstanding
    #[error("IPC transport disconnected")]
    Disconnected,

    /// Mailbox access failed
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl From<IpcError> for DspError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Timeout { command, after } => DspError::Timeout {
                message: command.to_string(),
                after,
            },
            IpcError::Firmware { command, code } => DspError::FirmwareFailure {
                message: command.to_string(),
                code,
            },
            IpcError::PayloadTooLarge { .. } => DspError::NoResources(err.to_string()),
            IpcError::Link(_) | IpcError::Disconnected => DspError::NoResources(err.to_string()),
            IpcError::Memory(mem) => DspError::Memory(mem),
            IpcError::FieldOverflow { .. }
            | IpcError::UnknownMessage(_)
            | IpcError::Truncated { .. } => DspError::InvalidParameter(err.to_string()),
        }
    }
}
