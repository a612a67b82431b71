//! Error types for firmware image handling

use soc_audio_core::{DspError, MemoryError};
use thiserror::Error;

/// Result type for image parsing and loading
pub type Result<T> = std::result::Result<T, ImageError>;

/// Errors found while validating or loading a firmware image
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// Image ends before a header or block is complete
    #[error("Image truncated while reading {what}: need {needed} bytes, {available} left")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Bad {what} signature: expected {expected:?}, found {found:?}")]
    BadSignature {
        what: &'static str,
        expected: [u8; 4],
        found: [u8; 4],
    },

    /// `file_size + header_size` differs from the buffer length
    #[error("Image size mismatch: header declares {declared} bytes, buffer holds {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    /// Blocks of a module do not add up to its declared size
    #[error("Module {module} declares {declared} bytes but its blocks span {actual}")]
    ModuleSizeMismatch {
        module: usize,
        declared: usize,
        actual: usize,
    },

    #[error("Image carries no modules")]
    NoModules,

    /// Bytes left over after the last module
    #[error("{0} trailing bytes after last module")]
    TrailingData(usize),

    #[error("Module {module} block {block} is empty")]
    EmptyBlock { module: usize, block: usize },

    #[error("Module {module} block {block} has unknown RAM type {ram_type}")]
    UnknownRamType {
        module: usize,
        block: usize,
        ram_type: u32,
    },

    /// Block would land outside its target RAM
    #[error(
        "Module {module} block {block}: {size} bytes at {offset:#x} exceed {capacity} bytes of RAM"
    )]
    OutOfRange {
        module: usize,
        block: usize,
        offset: usize,
        size: usize,
        capacity: usize,
    },

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl From<ImageError> for DspError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Memory(mem) => DspError::Memory(mem),
            other => DspError::InvalidParameter(other.to_string()),
        }
    }
}
