//! Firmware image loading tests
//!
//! Validation must finish before the first byte reaches RAM: every
//! rejected image has to leave IRAM and DRAM exactly as they were.

use proptest::prelude::*;
use soc_audio_core::{DspError, HeapRegion};
use soc_audio_firmware::{FirmwareImage, FirmwareLoader, ImageBuilder, ImageError, RamType};
use std::sync::Arc;

const IRAM_SIZE: usize = 4096;
const DRAM_SIZE: usize = 2048;

struct Rig {
    iram: Arc<HeapRegion>,
    dram: Arc<HeapRegion>,
    loader: FirmwareLoader,
}

impl Rig {
    fn new() -> Self {
        let iram = Arc::new(HeapRegion::new(IRAM_SIZE));
        let dram = Arc::new(HeapRegion::new(DRAM_SIZE));
        let loader = FirmwareLoader::new(iram.clone(), dram.clone());
        Self { iram, dram, loader }
    }

    fn untouched(&self) -> bool {
        self.iram.snapshot().iter().all(|&b| b == 0) && self.dram.snapshot().iter().all(|&b| b == 0)
    }
}

fn sample_image() -> Vec<u8> {
    ImageBuilder::new()
        .format_version(2)
        .module(0x0001_0000, |m| {
            m.module_type(1)
                .block(RamType::Iram, 0, &[0x11; 64])
                .block(RamType::Dram, 0x100, &[0x22; 32])
        })
        .module(0x0002_0000, |m| m.block(RamType::Iram, 0x200, &[0x33; 16]))
        .build()
}

#[test]
fn well_formed_image_loads_completely() {
    let rig = Rig::new();
    let report = rig.loader.load_bytes(&sample_image()).unwrap();

    assert_eq!(report.entry_point, 0x0001_0000);
    assert_eq!(report.modules, 2);
    assert_eq!(report.blocks, 3);
    assert_eq!(report.iram_bytes, 80);
    assert_eq!(report.dram_bytes, 32);

    let iram = rig.iram.snapshot();
    assert!(iram[..64].iter().all(|&b| b == 0x11));
    assert!(iram[0x200..0x210].iter().all(|&b| b == 0x33));
    assert!(rig.dram.snapshot()[0x100..0x120].iter().all(|&b| b == 0x22));
}

#[test]
fn later_bad_block_prevents_earlier_copies() {
    let rig = Rig::new();
    let bytes = ImageBuilder::new()
        .module(0, |m| m.block(RamType::Iram, 0, &[0xFF; 8]))
        .module(0, |m| m.raw_block(9, 0, &[0xEE; 8]))
        .build();

    assert_eq!(
        rig.loader.load_bytes(&bytes),
        Err(ImageError::UnknownRamType {
            module: 1,
            block: 0,
            ram_type: 9
        })
    );
    assert!(rig.untouched());
}

#[test]
fn size_mismatch_is_rejected_before_copy() {
    let rig = Rig::new();
    let mut bytes = sample_image();
    bytes.truncate(bytes.len() - 1);

    assert!(matches!(
        rig.loader.load_bytes(&bytes),
        Err(ImageError::SizeMismatch { .. })
    ));
    assert!(rig.untouched());
}

#[test]
fn bad_module_signature_is_rejected() {
    let rig = Rig::new();
    let mut bytes = sample_image();
    // first module header follows the 32-byte file header
    bytes[33] = b'X';

    assert!(matches!(
        rig.loader.load_bytes(&bytes),
        Err(ImageError::BadSignature { what: "module", .. })
    ));
    assert!(rig.untouched());
}

#[test]
fn image_errors_map_to_invalid_parameter() {
    let err: DspError = ImageError::NoModules.into();
    assert!(matches!(err, DspError::InvalidParameter(_)));
}

proptest! {
    /// Property: any strict prefix of a valid image is rejected and loads nothing
    #[test]
    fn truncated_images_never_load(cut in 0usize..176) {
        let bytes = sample_image();
        prop_assume!(cut < bytes.len());

        let rig = Rig::new();
        prop_assert!(rig.loader.load_bytes(&bytes[..cut]).is_err());
        prop_assert!(rig.untouched());
    }

    /// Property: flipping any byte either still parses or is rejected cleanly
    #[test]
    fn corrupted_images_never_panic(index in 0usize..176, value in any::<u8>()) {
        let mut bytes = sample_image();
        prop_assume!(index < bytes.len());
        bytes[index] = value;

        let rig = Rig::new();
        if FirmwareImage::parse(&bytes).is_err() {
            prop_assert!(rig.loader.load_bytes(&bytes).is_err());
            prop_assert!(rig.untouched());
        }
    }
}
