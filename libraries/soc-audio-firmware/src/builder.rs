//! Image builder for tests and tooling

use crate::image::{
    RamType, BLOCK_HEADER_SIZE, FILE_HEADER_SIZE, FILE_SIGNATURE, MODULE_HEADER_SIZE,
    MODULE_SIGNATURE,
};

#[derive(Debug, Clone, Default)]
pub struct ModuleBuilder {
    module_type: u32,
    entry_point: u32,
    blocks: Vec<(u32, u32, Vec<u8>)>,
}

impl ModuleBuilder {
    pub fn module_type(mut self, module_type: u32) -> Self {
        self.module_type = module_type;
        self
    }

    pub fn block(self, ram: RamType, offset: u32, data: &[u8]) -> Self {
        self.raw_block(ram.code(), offset, data)
    }

    /// Block with an arbitrary RAM type code, including invalid ones
    pub fn raw_block(mut self, ram_code: u32, offset: u32, data: &[u8]) -> Self {
        self.blocks.push((ram_code, offset, data.to_vec()));
        self
    }

    fn body_len(&self) -> usize {
        self.blocks
            .iter()
            .map(|(_, _, data)| BLOCK_HEADER_SIZE + data.len())
            .sum()
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MODULE_SIGNATURE);
        push_u32(out, self.body_len() as u32);
        push_u32(out, self.blocks.len() as u32);
        push_u32(out, self.module_type);
        push_u32(out, self.entry_point);
        for (ram_code, offset, data) in &self.blocks {
            push_u32(out, *ram_code);
            push_u32(out, data.len() as u32);
            push_u32(out, *offset);
            push_u32(out, 0);
            out.extend_from_slice(data);
        }
    }
}

/// Produces images in the `$SST` format
///
/// ```rust
/// use soc_audio_firmware::{FirmwareImage, ImageBuilder, RamType};
///
/// let bytes = ImageBuilder::new()
///     .module(0x400, |m| m.block(RamType::Iram, 0, &[0xDE, 0xAD]))
///     .build();
/// assert_eq!(FirmwareImage::parse(&bytes).unwrap().entry_point(), 0x400);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    format_version: u32,
    modules: Vec<ModuleBuilder>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format_version(mut self, version: u32) -> Self {
        self.format_version = version;
        self
    }

    pub fn module(
        mut self,
        entry_point: u32,
        build: impl FnOnce(ModuleBuilder) -> ModuleBuilder,
    ) -> Self {
        let module = ModuleBuilder {
            entry_point,
            ..ModuleBuilder::default()
        };
        self.modules.push(build(module));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let body: usize = self
            .modules
            .iter()
            .map(|m| MODULE_HEADER_SIZE + m.body_len())
            .sum();

        let mut out = Vec::with_capacity(FILE_HEADER_SIZE + body);
        out.extend_from_slice(&FILE_SIGNATURE);
        push_u32(&mut out, body as u32);
        push_u32(&mut out, self.modules.len() as u32);
        push_u32(&mut out, self.format_version);
        out.extend_from_slice(&[0u8; 16]);
        for module in &self.modules {
            module.write(&mut out);
        }
        out
    }
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}
