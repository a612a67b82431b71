//! Gain engine properties

use proptest::prelude::*;
use soc_audio_processor::mix::{MIX_INPUT_CHANNELS, MIX_OUTPUT_CHANNELS};
use soc_audio_processor::{compute_mix_config, gain_index, GAIN_0_DB, GAIN_MAX, GAIN_MUTE};

proptest! {
    #[test]
    fn indices_stay_within_gain_table(
        volume in any::<i16>(),
        channels in 1u8..=8,
        outputs in 1u8..=2,
    ) {
        let config = compute_mix_config(volume, channels, outputs);
        for input in 0..MIX_INPUT_CHANNELS {
            for output in 0..MIX_OUTPUT_CHANNELS {
                let index = config.index(input, output);
                prop_assert!(index >= gain_index(GAIN_MAX));
                prop_assert!(index <= gain_index(GAIN_MUTE));
            }
        }
    }

    #[test]
    fn mute_volume_mutes_every_route(channels in 1u8..=8, outputs in 1u8..=2) {
        let config = compute_mix_config(GAIN_MUTE, channels, outputs);
        prop_assert_eq!(config, soc_audio_processor::MixConfig::muted());
    }

    #[test]
    fn absent_channels_are_muted(volume in GAIN_MUTE..=GAIN_MAX, channels in 2u8..=8) {
        let config = compute_mix_config(volume, channels, 2);
        for input in usize::from(channels)..MIX_INPUT_CHANNELS {
            prop_assert_eq!(config.gain(input, 0), GAIN_MUTE);
            prop_assert_eq!(config.gain(input, 1), GAIN_MUTE);
        }
    }

    #[test]
    fn trims_never_unmute(
        volume in GAIN_MUTE..=GAIN_MAX,
        channels in 1u8..=8,
        left in GAIN_MUTE..=GAIN_MAX,
        right in GAIN_MUTE..=GAIN_MAX,
    ) {
        let plain = compute_mix_config(volume, channels, 2);
        let trimmed = plain.with_output_trims([left, right]);
        for input in 0..MIX_INPUT_CHANNELS {
            for output in 0..MIX_OUTPUT_CHANNELS {
                if plain.gain(input, output) == GAIN_MUTE {
                    prop_assert_eq!(trimmed.gain(input, output), GAIN_MUTE);
                }
            }
        }
    }
}

#[test]
fn mono_output_at_unity_is_unity_everywhere() {
    for channels in 1..=8 {
        let config = compute_mix_config(GAIN_0_DB, channels, 1);
        for input in 0..MIX_INPUT_CHANNELS {
            assert_eq!(config.gain(input, 0), GAIN_0_DB);
        }
    }
}
