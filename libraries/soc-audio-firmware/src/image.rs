//! Firmware image format
//!
//! ```text
//! file header (32 bytes)
//!   "$SST"  file_size  module_count  format_version  reserved[4]
//! module header (20 bytes), module_count times
//!   "$MOD"  module_size  block_count  module_type  entry_point
//!   block header (16 bytes), block_count times
//!     ram_type  size  ram_offset  reserved
//!     size bytes of payload
//! ```
//!
//! All integers are little-endian. `file_size` counts everything after the
//! file header; `module_size` counts everything after the module header.
//! Parsing borrows block payloads from the input buffer.

use crate::error::{ImageError, Result};
use std::fmt;

pub const FILE_SIGNATURE: [u8; 4] = *b"$SST";
pub const MODULE_SIGNATURE: [u8; 4] = *b"$MOD";

pub const FILE_HEADER_SIZE: usize = 32;
pub const MODULE_HEADER_SIZE: usize = 20;
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Coprocessor memory a block is copied into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RamType {
    /// Instruction RAM
    Iram,
    /// Data RAM
    Dram,
}

impl RamType {
    pub fn code(self) -> u32 {
        match self {
            Self::Iram => 1,
            Self::Dram => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Iram),
            2 => Some(Self::Dram),
            _ => None,
        }
    }
}

impl fmt::Display for RamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Iram => "IRAM",
            Self::Dram => "DRAM",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block<'a> {
    pub ram_type: RamType,
    pub ram_offset: u32,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module<'a> {
    pub module_type: u32,
    pub entry_point: u32,
    pub blocks: Vec<Block<'a>>,
}

/// A fully validated image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage<'a> {
    pub format_version: u32,
    pub modules: Vec<Module<'a>>,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(ImageError::Truncated {
                what,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn signature(&mut self, expected: [u8; 4], what: &'static str) -> Result<()> {
        let mut found = [0u8; 4];
        found.copy_from_slice(self.take(4, what)?);
        if found != expected {
            return Err(ImageError::BadSignature {
                what,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn u32(&mut self, what: &'static str) -> Result<u32> {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.take(4, what)?);
        Ok(u32::from_le_bytes(word))
    }
}

impl<'a> FirmwareImage<'a> {
    /// Validate `bytes` completely; nothing is returned unless every
    /// module and block is well formed.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(ImageError::Truncated {
                what: "file header",
                needed: FILE_HEADER_SIZE,
                available: bytes.len(),
            });
        }

        cursor.signature(FILE_SIGNATURE, "file")?;
        let file_size = cursor.u32("file header")? as usize;
        let module_count = cursor.u32("file header")? as usize;
        let format_version = cursor.u32("file header")?;
        cursor.take(16, "file header")?;

        let declared = file_size.saturating_add(FILE_HEADER_SIZE);
        if declared != bytes.len() {
            return Err(ImageError::SizeMismatch {
                declared,
                actual: bytes.len(),
            });
        }
        if module_count == 0 {
            return Err(ImageError::NoModules);
        }

        let mut modules = Vec::with_capacity(module_count.min(64));
        for index in 0..module_count {
            modules.push(Self::parse_module(&mut cursor, index)?);
        }

        if cursor.remaining() != 0 {
            return Err(ImageError::TrailingData(cursor.remaining()));
        }

        Ok(Self {
            format_version,
            modules,
        })
    }

    fn parse_module(cursor: &mut Cursor<'a>, module: usize) -> Result<Module<'a>> {
        cursor.signature(MODULE_SIGNATURE, "module")?;
        let module_size = cursor.u32("module header")? as usize;
        let block_count = cursor.u32("module header")? as usize;
        let module_type = cursor.u32("module header")?;
        let entry_point = cursor.u32("module header")?;

        let start = cursor.pos;
        let mut blocks = Vec::with_capacity(block_count.min(256));
        for block in 0..block_count {
            let ram_code = cursor.u32("block header")?;
            let size = cursor.u32("block header")? as usize;
            let ram_offset = cursor.u32("block header")?;
            cursor.u32("block header")?;

            if size == 0 {
                return Err(ImageError::EmptyBlock { module, block });
            }
            let ram_type = RamType::from_code(ram_code).ok_or(ImageError::UnknownRamType {
                module,
                block,
                ram_type: ram_code,
            })?;
            let data = cursor.take(size, "block payload")?;
            blocks.push(Block {
                ram_type,
                ram_offset,
                data,
            });
        }

        let actual = cursor.pos - start;
        if actual != module_size {
            return Err(ImageError::ModuleSizeMismatch {
                module,
                declared: module_size,
                actual,
            });
        }

        Ok(Module {
            module_type,
            entry_point,
            blocks,
        })
    }

    /// Where the core starts executing: the first module's entry point
    pub fn entry_point(&self) -> u32 {
        self.modules.first().map_or(0, |m| m.entry_point)
    }

    pub fn blocks(&self) -> impl Iterator<Item = (usize, usize, &Block<'a>)> {
        self.modules.iter().enumerate().flat_map(|(m, module)| {
            module
                .blocks
                .iter()
                .enumerate()
                .map(move |(b, block)| (m, b, block))
        })
    }

    /// Payload bytes destined for `ram`
    pub fn payload_bytes(&self, ram: RamType) -> usize {
        self.blocks()
            .filter(|(_, _, block)| block.ram_type == ram)
            .map(|(_, _, block)| block.data.len())
            .sum()
    }
}
