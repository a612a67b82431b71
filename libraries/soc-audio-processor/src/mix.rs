//! Channel-mix gain engine
//!
//! Gains are handled in tenths of a decibel and sent to the firmware as
//! indices into its gain table, where index 0 is `GAIN_MAX` and every step
//! is 0.1 dB of attenuation:
//!
//! ```text
//! index = GAIN_MAX - clamp(gain, GAIN_MUTE, GAIN_MAX)
//! ```
//!
//! Stereo downmix of a multichannel source uses the fixed layout below,
//! where `half` is the volume lowered by 9.6 dB:
//!
//! ```text
//! channel   0 L   1 R   2 C    3 LFE  4 Ls   5 Rs   6..7
//! left      vol   mute  half   mute   half   mute   mute
//! right     mute  vol   half   mute   mute   half   mute
//! ```

use soc_audio_core::{DspError, Result};
use soc_audio_ipc::PayloadWriter;

/// Loudest gain the firmware table holds (+18.0 dB)
pub const GAIN_MAX: i16 = 180;

/// Unity gain
pub const GAIN_0_DB: i16 = 0;

/// Gain that silences a channel (-145.0 dB)
pub const GAIN_MUTE: i16 = -1450;

/// Attenuation applied to center and surround contributions (9.6 dB)
pub const HALF_GAIN_OFFSET: i16 = 96;

/// Input channels in one gain table
pub const MIX_INPUT_CHANNELS: usize = 8;

/// Output channels in one gain table
pub const MIX_OUTPUT_CHANNELS: usize = 2;

/// Firmware gain-table index for `tenths`
pub fn gain_index(tenths: i16) -> u16 {
    (GAIN_MAX - tenths.clamp(GAIN_MUTE, GAIN_MAX)) as u16
}

/// Reject volumes outside the representable range
pub fn validate_volume(tenths: i16) -> Result<()> {
    if (GAIN_MUTE..=GAIN_MAX).contains(&tenths) {
        Ok(())
    } else {
        Err(DspError::invalid(format!(
            "volume {tenths} is outside {GAIN_MUTE}..={GAIN_MAX} tenths of a dB"
        )))
    }
}

/// Gain, in tenths of a dB, from every input channel to every output channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixConfig {
    gains: [[i16; MIX_OUTPUT_CHANNELS]; MIX_INPUT_CHANNELS],
}

impl MixConfig {
    /// Every route silenced
    pub fn muted() -> Self {
        Self {
            gains: [[GAIN_MUTE; MIX_OUTPUT_CHANNELS]; MIX_INPUT_CHANNELS],
        }
    }

    pub fn gain(&self, input: usize, output: usize) -> i16 {
        self.gains[input][output]
    }

    /// Firmware table index for one route
    pub fn index(&self, input: usize, output: usize) -> u16 {
        gain_index(self.gains[input][output])
    }

    /// Apply per-output-channel trims; muted routes stay muted
    pub fn with_output_trims(mut self, trims: [i16; MIX_OUTPUT_CHANNELS]) -> Self {
        for row in &mut self.gains {
            for (gain, trim) in row.iter_mut().zip(trims) {
                if *gain != GAIN_MUTE {
                    *gain = gain.saturating_add(trim).clamp(GAIN_MUTE, GAIN_MAX);
                }
            }
        }
        self
    }

    /// Append the table as firmware indices, input-major
    pub fn encode(&self, out: &mut PayloadWriter) {
        for row in &self.gains {
            for gain in row {
                out.u16(gain_index(*gain));
            }
        }
    }
}

/// Derive the gain table for a source of `channel_count` channels
///
/// `output_channels` of 1 routes every input channel to the single output
/// at `volume`; anything else uses the stereo layout. Channels the source
/// does not carry are muted, as is the unused second output of a mono
/// mix.
pub fn compute_mix_config(volume: i16, channel_count: u8, output_channels: u8) -> MixConfig {
    let vol = volume.clamp(GAIN_MUTE, GAIN_MAX);
    let half = (vol - HALF_GAIN_OFFSET).max(GAIN_MUTE);
    let mute = GAIN_MUTE;
    let mut config = MixConfig::muted();

    if output_channels == 1 {
        for row in &mut config.gains {
            row[0] = vol;
        }
        return config;
    }

    if channel_count == 1 {
        config.gains[0] = [vol, vol];
        return config;
    }

    let present = usize::from(channel_count).min(MIX_INPUT_CHANNELS);
    for (channel, row) in config.gains.iter_mut().enumerate().take(present) {
        *row = match channel {
            0 => [vol, mute],
            1 => [mute, vol],
            2 => [half, half],
            4 => [half, mute],
            5 => [mute, half],
            // LFE and anything past the 5.1 layout
            _ => [mute, mute],
        };
    }
    config
}
