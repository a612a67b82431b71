//! Domain types shared across the DSP stack

use crate::error::{DspError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audio coding of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AudioFormat {
    /// Not yet configured
    #[default]
    Invalid,
    /// Raw PCM, fed straight into the main pipeline
    Pcm,
    Mp3,
    Aac,
    Ac3,
    Dts,
    Wma,
}

impl AudioFormat {
    /// Whether streams of this format need a decode pipeline
    pub fn needs_decoder(self) -> bool {
        !matches!(self, Self::Invalid | Self::Pcm)
    }

    /// Wire code used in stage parameters
    pub fn code(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Pcm => 1,
            Self::Mp3 => 2,
            Self::Aac => 3,
            Self::Ac3 => 4,
            Self::Dts => 5,
            Self::Wma => 6,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invalid => "invalid",
            Self::Pcm => "pcm",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Ac3 => "ac3",
            Self::Dts => "dts",
            Self::Wma => "wma",
        };
        f.write_str(name)
    }
}

/// Kind of pipeline, carried in the 4-bit type field of every IPC header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineType {
    /// Mixer + post-processing + outputs, one per processor
    Main,
    /// Per-stream decoder feeding the main pipeline
    Decode,
    /// Per-stream capture path
    Capture,
}

impl PipelineType {
    pub fn code(self) -> u8 {
        match self {
            Self::Main => 0,
            Self::Decode => 1,
            Self::Capture => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Main),
            1 => Some(Self::Decode),
            2 => Some(Self::Capture),
            _ => None,
        }
    }
}

/// Opaque pipeline id assigned by the coprocessor (4 bits on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirmwareHandle(u8);

impl FirmwareHandle {
    pub const MAX: u8 = 0x0F;

    pub fn new(raw: u8) -> Result<Self> {
        if raw > Self::MAX {
            return Err(DspError::invalid(format!(
                "firmware handle {raw} does not fit in 4 bits"
            )));
        }
        Ok(Self(raw))
    }

    pub fn raw(self) -> u8 {
        self.0
    }
}

impl fmt::Display for FirmwareHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fw#{}", self.0)
    }
}

/// Sample rates the coprocessor accepts
pub const SUPPORTED_SAMPLE_RATES: [u32; 9] = [
    8_000, 11_025, 16_000, 22_050, 32_000, 44_100, 48_000, 96_000, 192_000,
];

/// Sample sizes (bits) the coprocessor accepts
pub const SUPPORTED_SAMPLE_SIZES: [u8; 4] = [16, 20, 24, 32];

/// Most channels a stream can carry
pub const MAX_CHANNELS: u8 = 8;

/// Data format of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub sample_size: u8,
    pub channel_count: u8,
}

impl StreamFormat {
    /// Interleaved PCM
    pub fn pcm(sample_rate: u32, sample_size: u8, channel_count: u8) -> Self {
        Self {
            format: AudioFormat::Pcm,
            sample_rate,
            sample_size,
            channel_count,
        }
    }

    /// Compressed stream; the decoder reports the real layout later
    pub fn encoded(format: AudioFormat, sample_rate: u32, channel_count: u8) -> Self {
        Self {
            format,
            sample_rate,
            sample_size: 16,
            channel_count,
        }
    }

    /// Check the format against the coprocessor's capabilities
    pub fn validate(&self) -> Result<()> {
        if self.format == AudioFormat::Invalid {
            return Err(DspError::invalid("stream format is not set"));
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(DspError::invalid(format!(
                "unsupported sample rate {} Hz",
                self.sample_rate
            )));
        }
        if !SUPPORTED_SAMPLE_SIZES.contains(&self.sample_size) {
            return Err(DspError::invalid(format!(
                "unsupported sample size {} bits",
                self.sample_size
            )));
        }
        if self.channel_count == 0 || self.channel_count > MAX_CHANNELS {
            return Err(DspError::invalid(format!(
                "unsupported channel count {}",
                self.channel_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_does_not_need_decoder() {
        assert!(!AudioFormat::Pcm.needs_decoder());
        assert!(!AudioFormat::Invalid.needs_decoder());
        assert!(AudioFormat::Aac.needs_decoder());
    }

    #[test]
    fn firmware_handle_is_four_bits() {
        assert_eq!(FirmwareHandle::new(15).unwrap().raw(), 15);
        assert!(FirmwareHandle::new(16).is_err());
    }

    #[test]
    fn pipeline_type_codes_round_trip() {
        for kind in [PipelineType::Main, PipelineType::Decode, PipelineType::Capture] {
            assert_eq!(PipelineType::from_code(kind.code()), Some(kind));
        }
        assert_eq!(PipelineType::from_code(9), None);
    }

    #[test]
    fn stream_format_validation() {
        assert!(StreamFormat::pcm(48_000, 16, 2).validate().is_ok());
        assert!(StreamFormat::pcm(47_000, 16, 2).validate().is_err());
        assert!(StreamFormat::pcm(48_000, 12, 2).validate().is_err());
        assert!(StreamFormat::pcm(48_000, 16, 0).validate().is_err());
        assert!(StreamFormat::pcm(48_000, 16, 9).validate().is_err());

        let unset = StreamFormat {
            format: AudioFormat::Invalid,
            ..StreamFormat::pcm(48_000, 16, 2)
        };
        assert!(matches!(unset.validate(), Err(DspError::InvalidParameter(_))));
    }
}
