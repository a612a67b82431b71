//! SoC Audio Core
//!
//! Foundational pieces shared by every crate of the audio DSP stack:
//!
//! - **Error Handling**: the `DspError` taxonomy and `Result` alias
//! - **Configuration**: `DspConfig`, loaded from TOML and `SOC_AUDIO_*` env vars
//! - **Memory Regions**: the `MemoryRegion` seam over the coprocessor's
//!   shared SRAM, instruction RAM and data RAM
//! - **Domain Types**: audio formats, pipeline types, firmware handles
//!
//! # Example
//!
//! ```rust
//! use soc_audio_core::{DspConfig, HeapRegion, MemoryRegion};
//!
//! let config = DspConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let sram = HeapRegion::new(64);
//! sram.write(4, &[1, 2, 3]).unwrap();
//! let mut buf = [0u8; 3];
//! sram.read(4, &mut buf).unwrap();
//! assert_eq!(buf, [1, 2, 3]);
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod memory;
pub mod types;

pub use config::{DspConfig, IpcSettings, PipelineSettings, PoolSettings};
pub use error::{DspError, MemoryError, Result};
pub use memory::{HeapRegion, MemoryRegion};
pub use types::{AudioFormat, FirmwareHandle, PipelineType, StreamFormat};
