//! SoC Audio Firmware
//!
//! Parses `$SST` firmware images and copies them into the coprocessor's
//! instruction and data RAM. Validation covers the whole image before a
//! single byte is written, so a bad image never leaves RAM half loaded.
//!
//! # Example
//!
//! ```rust
//! use soc_audio_core::HeapRegion;
//! use soc_audio_firmware::{FirmwareLoader, ImageError};
//! use std::sync::Arc;
//!
//! let loader = FirmwareLoader::new(
//!     Arc::new(HeapRegion::new(1024)),
//!     Arc::new(HeapRegion::new(1024)),
//! );
//! assert!(matches!(
//!     loader.load_bytes(b"not an image"),
//!     Err(ImageError::Truncated { .. })
//! ));
//! ```

#![forbid(unsafe_code)]

mod error;
pub mod image;
mod loader;

#[cfg(any(test, feature = "test-utils"))]
mod builder;

#[cfg(any(test, feature = "test-utils"))]
pub use builder::{ImageBuilder, ModuleBuilder};
pub use error::{ImageError, Result};
pub use image::{Block, FirmwareImage, Module, RamType};
pub use loader::{FirmwareLoader, LoadReport};
