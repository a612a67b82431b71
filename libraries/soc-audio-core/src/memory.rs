//! Memory regions shared with the coprocessor
//!
//! The bus layer maps the shared SRAM mailbox, instruction RAM and data RAM
//! and hands them to the core as `MemoryRegion` trait objects. `HeapRegion`
//! is the host-memory implementation used for simulation and tests.

use crate::error::MemoryError;
use std::sync::{Mutex, PoisonError};

/// A byte-addressable window into coprocessor memory
pub trait MemoryRegion: Send + Sync {
    /// Size of the region in bytes
    fn size(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Copy `data` into the region starting at `offset`
    fn write(&self, offset: usize, data: &[u8]) -> Result<(), MemoryError>;

    /// Read a little-endian u32
    fn read_u32(&self, offset: usize) -> Result<u32, MemoryError> {
        let mut word = [0u8; 4];
        self.read(offset, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Write a little-endian u32
    fn write_u32(&self, offset: usize, value: u32) -> Result<(), MemoryError> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Check that `[offset, offset + len)` lies inside the region
    fn check_bounds(&self, offset: usize, len: usize) -> Result<(), MemoryError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(MemoryError::OutOfBounds {
                offset,
                len,
                size: self.size(),
            }),
        }
    }
}

/// Host-memory backed region
#[derive(Debug)]
pub struct HeapRegion {
    bytes: Mutex<Vec<u8>>,
    size: usize,
}

impl HeapRegion {
    /// Create a zero-filled region
    pub fn new(size: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0; size]),
            size,
        }
    }

    /// Copy of the whole region
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MemoryRegion for HeapRegion {
    fn size(&self) -> usize {
        self.size
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.check_bounds(offset, buf.len())?;
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        self.check_bounds(offset, data.len())?;
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}
