//! Pipeline stages and their parameters
//!
//! `StageParams` is the closed set of stage kinds. Every variant implements
//! `StageBehavior`, which fixes the port counts the connect pass relies on
//! and the byte layout sent to the firmware in `CONFIG_PIPE` and
//! `STAGE_CONFIGURE`.
//!
//! Decoders are one capability per codec behind `DecoderParams`; which
//! codecs exist is decided by cargo features at build time.

use crate::mix::MixConfig;
use soc_audio_core::{AudioFormat, DspError, Result, StreamFormat};
use soc_audio_ipc::PayloadWriter;
use std::fmt;

/// Port count and wire encoding of one stage kind
pub trait StageBehavior {
    fn kind(&self) -> StageKind;

    /// Upstream ports this stage consumes
    fn inputs_count(&self) -> u8;

    /// Downstream ports this stage produces
    fn outputs_count(&self) -> u8;

    /// Append the stage-specific parameter block
    fn encode(&self, out: &mut PayloadWriter);
}

/// Codec-specific decoder configuration
pub trait DecoderParams {
    fn format(&self) -> AudioFormat;

    fn encode(&self, out: &mut PayloadWriter);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Input,
    Decoder,
    SampleRateConverter,
    Mixer,
    Interleaver,
    Downmix,
    Output,
}

impl StageKind {
    pub fn code(self) -> u8 {
        match self {
            Self::Input => 1,
            Self::Decoder => 2,
            Self::SampleRateConverter => 3,
            Self::Mixer => 4,
            Self::Interleaver => 5,
            Self::Downmix => 6,
            Self::Output => 7,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Decoder => "decoder",
            Self::SampleRateConverter => "src",
            Self::Mixer => "mixer",
            Self::Interleaver => "interleaver",
            Self::Downmix => "downmix",
            Self::Output => "output",
        })
    }
}

fn encode_format(out: &mut PayloadWriter, format: Option<&StreamFormat>) {
    match format {
        Some(f) => {
            out.u8(f.format.code())
                .u32(f.sample_rate)
                .u8(f.sample_size)
                .u8(f.channel_count);
        }
        None => {
            out.u8(AudioFormat::Invalid.code()).u32(0).u8(0).u8(0);
        }
    }
}

/// Entry point of a pipeline; fed by the host or by a decode pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputParams {
    /// Timestamp window slot the firmware reports progress in
    pub slot: u8,
    /// `None` while no stream is attached
    pub format: Option<StreamFormat>,
}

impl StageBehavior for InputParams {
    fn kind(&self) -> StageKind {
        StageKind::Input
    }

    fn inputs_count(&self) -> u8 {
        0
    }

    fn outputs_count(&self) -> u8 {
        1
    }

    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(self.slot).u8(u8::from(self.format.is_some()));
        encode_format(out, self.format.as_ref());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mp3Params {
    pub crc_check: bool,
}

impl DecoderParams for Mp3Params {
    fn format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }

    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(u8::from(self.crc_check));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AacBitstream {
    #[default]
    Adts,
    Adif,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AacParams {
    pub bitstream: AacBitstream,
    /// Spectral band replication
    pub sbr: bool,
    pub downmix_to_stereo: bool,
}

impl DecoderParams for AacParams {
    fn format(&self) -> AudioFormat {
        AudioFormat::Aac
    }

    fn encode(&self, out: &mut PayloadWriter) {
        let bitstream = match self.bitstream {
            AacBitstream::Adts => 0,
            AacBitstream::Adif => 1,
            AacBitstream::Raw => 2,
        };
        out.u8(bitstream)
            .u8(u8::from(self.sbr))
            .u8(u8::from(self.downmix_to_stereo));
    }
}

/// Dynamic range compression profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ac3DrcMode {
    #[default]
    Line,
    Rf,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ac3Params {
    pub drc_mode: Ac3DrcMode,
    pub karaoke: bool,
    pub lfe_output: bool,
}

impl Default for Ac3Params {
    fn default() -> Self {
        Self {
            drc_mode: Ac3DrcMode::default(),
            karaoke: false,
            lfe_output: true,
        }
    }
}

impl DecoderParams for Ac3Params {
    fn format(&self) -> AudioFormat {
        AudioFormat::Ac3
    }

    fn encode(&self, out: &mut PayloadWriter) {
        let drc = match self.drc_mode {
            Ac3DrcMode::Line => 0,
            Ac3DrcMode::Rf => 1,
            Ac3DrcMode::Off => 2,
        };
        out.u8(drc)
            .u8(u8::from(self.karaoke))
            .u8(u8::from(self.lfe_output));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DtsParams {
    /// Decode the core substream only, skipping extensions
    pub core_only: bool,
}

impl DecoderParams for DtsParams {
    fn format(&self) -> AudioFormat {
        AudioFormat::Dts
    }

    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(u8::from(self.core_only));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WmaParams {
    pub block_align: u16,
    pub encode_options: u16,
    pub channel_mask: u32,
}

impl DecoderParams for WmaParams {
    fn format(&self) -> AudioFormat {
        AudioFormat::Wma
    }

    fn encode(&self, out: &mut PayloadWriter) {
        out.u16(self.block_align)
            .u16(self.encode_options)
            .u32(self.channel_mask);
    }
}

/// Decoder selection, one variant per codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderConfig {
    Mp3(Mp3Params),
    Aac(AacParams),
    Ac3(Ac3Params),
    Dts(DtsParams),
    Wma(WmaParams),
}

impl DecoderConfig {
    /// Whether this build ships a decoder for `format`
    pub fn is_compiled_in(format: AudioFormat) -> bool {
        match format {
            AudioFormat::Mp3 => cfg!(feature = "mp3"),
            AudioFormat::Aac => cfg!(feature = "aac"),
            AudioFormat::Ac3 => cfg!(feature = "ac3"),
            AudioFormat::Dts => cfg!(feature = "dts"),
            AudioFormat::Wma => cfg!(feature = "wma"),
            AudioFormat::Invalid | AudioFormat::Pcm => false,
        }
    }

    /// Default decoder settings for `format`
    pub fn for_format(format: AudioFormat) -> Result<Self> {
        if format.needs_decoder() && !Self::is_compiled_in(format) {
            return Err(DspError::unsupported(format!(
                "{format} decoder is not part of this build"
            )));
        }

        match format {
            AudioFormat::Mp3 => Ok(Self::Mp3(Mp3Params::default())),
            AudioFormat::Aac => Ok(Self::Aac(AacParams::default())),
            AudioFormat::Ac3 => Ok(Self::Ac3(Ac3Params::default())),
            AudioFormat::Dts => Ok(Self::Dts(DtsParams::default())),
            AudioFormat::Wma => Ok(Self::Wma(WmaParams::default())),
            AudioFormat::Invalid | AudioFormat::Pcm => Err(DspError::invalid(format!(
                "{format} streams are not decoded"
            ))),
        }
    }

    fn params(&self) -> &dyn DecoderParams {
        match self {
            Self::Mp3(p) => p,
            Self::Aac(p) => p,
            Self::Ac3(p) => p,
            Self::Dts(p) => p,
            Self::Wma(p) => p,
        }
    }
}

impl DecoderParams for DecoderConfig {
    fn format(&self) -> AudioFormat {
        self.params().format()
    }

    fn encode(&self, out: &mut PayloadWriter) {
        self.params().encode(out);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderStage {
    pub config: DecoderConfig,
    pub stream: StreamFormat,
}

impl StageBehavior for DecoderStage {
    fn kind(&self) -> StageKind {
        StageKind::Decoder
    }

    fn inputs_count(&self) -> u8 {
        1
    }

    fn outputs_count(&self) -> u8 {
        1
    }

    fn encode(&self, out: &mut PayloadWriter) {
        encode_format(out, Some(&self.stream));
        self.config.encode(out);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcParams {
    pub input_rate: u32,
    pub output_rate: u32,
    pub channel_count: u8,
}

impl StageBehavior for SrcParams {
    fn kind(&self) -> StageKind {
        StageKind::SampleRateConverter
    }

    fn inputs_count(&self) -> u8 {
        1
    }

    fn outputs_count(&self) -> u8 {
        1
    }

    fn encode(&self, out: &mut PayloadWriter) {
        out.u32(self.input_rate)
            .u32(self.output_rate)
            .u8(self.channel_count);
    }
}

/// Sums every input slot into one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixerParams {
    /// One gain table per input port
    pub tables: Vec<MixConfig>,
    pub output_channels: u8,
}

impl StageBehavior for MixerParams {
    fn kind(&self) -> StageKind {
        StageKind::Mixer
    }

    fn inputs_count(&self) -> u8 {
        self.tables.len() as u8
    }

    fn outputs_count(&self) -> u8 {
        1
    }

    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(self.output_channels);
        for table in &self.tables {
            table.encode(out);
        }
    }
}

/// Fans the mixed stream out to every enabled output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterleaverParams {
    pub outputs: u8,
    pub channel_count: u8,
}

impl StageBehavior for InterleaverParams {
    fn kind(&self) -> StageKind {
        StageKind::Interleaver
    }

    fn inputs_count(&self) -> u8 {
        1
    }

    fn outputs_count(&self) -> u8 {
        self.outputs
    }

    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(self.outputs).u8(self.channel_count);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownmixParams {
    pub input_channels: u8,
    pub output_channels: u8,
}

impl StageBehavior for DownmixParams {
    fn kind(&self) -> StageKind {
        StageKind::Downmix
    }

    fn inputs_count(&self) -> u8 {
        1
    }

    fn outputs_count(&self) -> u8 {
        1
    }

    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(self.input_channels).u8(self.output_channels);
    }
}

/// Sink of a pipeline: a device output, or the main pipeline's input slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputParams {
    /// Output workload id, or main input slot for decode/capture pipelines
    pub target: u32,
    pub sample_rate: u32,
    pub channel_count: u8,
}

impl StageBehavior for OutputParams {
    fn kind(&self) -> StageKind {
        StageKind::Output
    }

    fn inputs_count(&self) -> u8 {
        1
    }

    fn outputs_count(&self) -> u8 {
        0
    }

    fn encode(&self, out: &mut PayloadWriter) {
        out.u32(self.target)
            .u32(self.sample_rate)
            .u8(self.channel_count);
    }
}

/// Tagged union over every stage kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageParams {
    Input(InputParams),
    Decoder(DecoderStage),
    SampleRateConverter(SrcParams),
    Mixer(MixerParams),
    Interleaver(InterleaverParams),
    Downmix(DownmixParams),
    Output(OutputParams),
}

impl StageParams {
    fn behavior(&self) -> &dyn StageBehavior {
        match self {
            Self::Input(p) => p,
            Self::Decoder(p) => p,
            Self::SampleRateConverter(p) => p,
            Self::Mixer(p) => p,
            Self::Interleaver(p) => p,
            Self::Downmix(p) => p,
            Self::Output(p) => p,
        }
    }
}

impl StageBehavior for StageParams {
    fn kind(&self) -> StageKind {
        self.behavior().kind()
    }

    fn inputs_count(&self) -> u8 {
        self.behavior().inputs_count()
    }

    fn outputs_count(&self) -> u8 {
        self.behavior().outputs_count()
    }

    fn encode(&self, out: &mut PayloadWriter) {
        self.behavior().encode(out);
    }
}

/// Upstream end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRef {
    pub stage: usize,
    pub port: u8,
}

/// One slot of a pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    pub in_use: bool,
    pub params: Option<StageParams>,
    /// Filled by `Pipeline::connect`, one entry per input port
    pub sources: Vec<PortRef>,
}

impl Stage {
    pub fn kind(&self) -> Option<StageKind> {
        self.params.as_ref().map(StageBehavior::kind)
    }

    pub fn inputs_count(&self) -> u8 {
        self.params.as_ref().map_or(0, StageBehavior::inputs_count)
    }

    pub fn outputs_count(&self) -> u8 {
        self.params.as_ref().map_or(0, StageBehavior::outputs_count)
    }
}
