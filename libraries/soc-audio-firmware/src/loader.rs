//! Copies a validated image into coprocessor RAM
//!
//! Loading happens in two passes: every block's placement is checked
//! against its target region first, and only then is anything written.
//! A rejected image leaves both RAMs untouched.

use crate::error::{ImageError, Result};
use crate::image::{FirmwareImage, RamType};
use soc_audio_core::MemoryRegion;
use std::sync::Arc;
use tracing::{debug, info};

/// Summary of a successful load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub entry_point: u32,
    pub modules: usize,
    pub blocks: usize,
    pub iram_bytes: usize,
    pub dram_bytes: usize,
}

pub struct FirmwareLoader {
    iram: Arc<dyn MemoryRegion>,
    dram: Arc<dyn MemoryRegion>,
}

impl FirmwareLoader {
    pub fn new(iram: Arc<dyn MemoryRegion>, dram: Arc<dyn MemoryRegion>) -> Self {
        Self { iram, dram }
    }

    pub fn region(&self, ram: RamType) -> &Arc<dyn MemoryRegion> {
        match ram {
            RamType::Iram => &self.iram,
            RamType::Dram => &self.dram,
        }
    }

    /// Parse `bytes` and load the result
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<LoadReport> {
        let image = FirmwareImage::parse(bytes)?;
        self.load(&image)
    }

    pub fn load(&self, image: &FirmwareImage<'_>) -> Result<LoadReport> {
        for (module, block, entry) in image.blocks() {
            let region = self.region(entry.ram_type);
            let offset = entry.ram_offset as usize;
            if region.check_bounds(offset, entry.data.len()).is_err() {
                return Err(ImageError::OutOfRange {
                    module,
                    block,
                    offset,
                    size: entry.data.len(),
                    capacity: region.size(),
                });
            }
        }

        let mut blocks = 0;
        for (module, block, entry) in image.blocks() {
            debug!(
                module,
                block,
                ram = %entry.ram_type,
                offset = entry.ram_offset,
                bytes = entry.data.len(),
                "Copying firmware block"
            );
            self.region(entry.ram_type)
                .write(entry.ram_offset as usize, entry.data)?;
            blocks += 1;
        }

        let report = LoadReport {
            entry_point: image.entry_point(),
            modules: image.modules.len(),
            blocks,
            iram_bytes: image.payload_bytes(RamType::Iram),
            dram_bytes: image.payload_bytes(RamType::Dram),
        };
        info!(
            entry_point = report.entry_point,
            modules = report.modules,
            iram_bytes = report.iram_bytes,
            dram_bytes = report.dram_bytes,
            "Firmware image loaded"
        );
        Ok(report)
    }
}
