//! Processor context scenarios against the firmware simulator
//!
//! Each test boots a pool on a fresh simulator, clears the boot traffic
//! from the log and then checks the exact firmware commands an operation
//! produces.

use soc_audio_core::{AudioFormat, DspConfig, DspError, HeapRegion, PipelineType, StreamFormat};
use soc_audio_firmware::{FirmwareLoader, ImageBuilder, RamType};
use soc_audio_ipc::sim::{FirmwareSimulator, SimStreamInfo, RESULT_FAILED};
use soc_audio_ipc::Command;
use soc_audio_processor::{
    ProcessorContext, ProcessorPool, StageKind, StreamState, GAIN_0_DB, GAIN_MUTE,
};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

struct Rig {
    sim: Arc<FirmwareSimulator>,
    pool: ProcessorPool,
}

impl Rig {
    fn new() -> Self {
        Self::with_config(DspConfig::default())
    }

    fn with_config(config: DspConfig) -> Self {
        init_tracing();
        let (sim, transport) = FirmwareSimulator::with_transport().unwrap();
        let pool = ProcessorPool::new(transport, config).unwrap();
        let loader = FirmwareLoader::new(
            Arc::new(HeapRegion::new(4096)),
            Arc::new(HeapRegion::new(4096)),
        );
        let image = ImageBuilder::new()
            .module(0x100, |m| m.block(RamType::Iram, 0, &[0x5A; 16]))
            .build();
        pool.boot(&loader, &image).unwrap();
        sim.clear_log();
        Self { sim, pool }
    }

    fn open(&self) -> Arc<ProcessorContext> {
        self.pool.open_processor(true).unwrap()
    }
}

fn short_timeout() -> DspConfig {
    let mut config = DspConfig::default();
    config.ipc.reply_timeout_ms = 100;
    config.ipc.flush_retry_delay_ms = 1;
    config
}

fn pcm() -> StreamFormat {
    StreamFormat::pcm(48_000, 16, 2)
}

fn playing_input(ctx: &ProcessorContext) -> soc_audio_processor::InputId {
    let input = ctx.input_add().unwrap();
    ctx.input_set_data_format(input, pcm()).unwrap();
    ctx.input_set_state(input, StreamState::Play).unwrap();
    input
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

// ===== Play / stop =====

#[test]
fn pcm_play_allocates_configures_and_starts_once() {
    let rig = Rig::new();
    let ctx = rig.open();

    let input = ctx.input_add().unwrap();
    assert_eq!(ctx.input_state(input).unwrap(), StreamState::Uninit);
    ctx.input_set_data_format(input, pcm()).unwrap();
    assert_eq!(ctx.input_state(input).unwrap(), StreamState::Stop);
    ctx.input_set_state(input, StreamState::Play).unwrap();

    let status = ctx.main_status();
    assert!(status.configured);
    assert!(status.started);
    assert!(status.handle.is_some());
    assert_eq!(status.pipe_type, PipelineType::Main);
    assert_eq!(
        rig.sim.commands(),
        vec![Command::AllocPipe, Command::ConfigPipe, Command::StartPipe]
    );
    assert_eq!(ctx.input_state(input).unwrap(), StreamState::Play);
}

#[test]
fn main_pipeline_stops_with_last_playing_input() {
    let rig = Rig::new();
    let ctx = rig.open();
    let first = ctx.input_add().unwrap();
    let second = ctx.input_add().unwrap();
    ctx.input_set_data_format(first, pcm()).unwrap();
    ctx.input_set_data_format(second, pcm()).unwrap();

    ctx.input_set_state(first, StreamState::Play).unwrap();
    ctx.input_set_state(second, StreamState::Play).unwrap();
    assert_eq!(rig.sim.count(Command::StartPipe), 1);

    rig.sim.clear_log();
    ctx.input_set_state(first, StreamState::Stop).unwrap();
    assert!(ctx.main_status().started);
    assert!(rig.sim.commands().is_empty());

    ctx.input_set_state(second, StreamState::Stop).unwrap();
    let status = ctx.main_status();
    assert!(!status.started);
    assert!(status.configured);
    assert_eq!(
        rig.sim.commands(),
        vec![Command::StopPipe, Command::FlushPipe]
    );
}

#[test]
fn paused_input_keeps_main_pipeline_running() {
    let rig = Rig::new();
    let ctx = rig.open();
    let first = playing_input(&ctx);
    let second = playing_input(&ctx);
    ctx.input_set_state(second, StreamState::Pause).unwrap();

    rig.sim.clear_log();
    ctx.input_set_state(first, StreamState::Stop).unwrap();
    assert!(ctx.main_status().started);
    assert!(rig.sim.commands().is_empty());
}

#[test]
fn pause_is_bookkeeping_only() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = playing_input(&ctx);
    rig.sim.clear_log();

    ctx.input_set_state(input, StreamState::Pause).unwrap();
    ctx.input_set_state(input, StreamState::Play).unwrap();

    assert!(rig.sim.commands().is_empty());
    assert!(ctx.main_status().started);
}

// ===== State machine rules =====

#[test]
fn requesting_current_state_is_a_noop() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = playing_input(&ctx);
    rig.sim.clear_log();

    ctx.input_set_state(input, StreamState::Play).unwrap();
    assert!(rig.sim.commands().is_empty());

    let fresh = ctx.input_add().unwrap();
    ctx.input_set_state(fresh, StreamState::Uninit).unwrap();
}

#[test]
fn transitions_need_a_format() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();

    for target in [StreamState::Stop, StreamState::Pause, StreamState::Play] {
        assert!(matches!(
            ctx.input_set_state(input, target),
            Err(DspError::InvalidParameter(_))
        ));
        assert_eq!(ctx.input_state(input).unwrap(), StreamState::Uninit);
    }
    assert!(rig.sim.commands().is_empty());
}

#[test]
fn disable_only_before_first_format() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();

    ctx.input_set_state(input, StreamState::Disable).unwrap();
    assert_eq!(ctx.input_state(input).unwrap(), StreamState::Disable);

    ctx.input_set_data_format(input, pcm()).unwrap();
    assert_eq!(ctx.input_state(input).unwrap(), StreamState::Stop);
    assert!(ctx.input_set_state(input, StreamState::Disable).is_err());
    assert!(ctx.input_set_state(input, StreamState::Uninit).is_err());
}

#[test]
fn format_changes_only_while_stopped() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = playing_input(&ctx);

    assert!(matches!(
        ctx.input_set_data_format(input, StreamFormat::pcm(44_100, 16, 2)),
        Err(DspError::InvalidParameter(_))
    ));
    assert_eq!(ctx.input_format(input).unwrap(), Some(pcm()));
}

#[test]
fn bad_formats_are_rejected() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();

    assert!(ctx
        .input_set_data_format(input, StreamFormat::pcm(12_345, 16, 2))
        .is_err());
    assert!(ctx
        .input_set_data_format(input, StreamFormat::pcm(48_000, 8, 2))
        .is_err());
    assert!(ctx
        .input_set_data_format(input, StreamFormat::pcm(48_000, 16, 9))
        .is_err());
    assert_eq!(ctx.input_state(input).unwrap(), StreamState::Uninit);
}

#[test]
fn unknown_input_is_not_found() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();
    ctx.input_remove(input).unwrap();

    assert!(matches!(
        ctx.input_set_state(input, StreamState::Play),
        Err(DspError::NotFound { .. })
    ));
}

#[test]
fn input_count_is_bounded() {
    let rig = Rig::new();
    let ctx = rig.open();
    for _ in 0..DspConfig::default().pool.max_inputs {
        ctx.input_add().unwrap();
    }
    assert!(matches!(
        ctx.input_add(),
        Err(DspError::NoResources(_))
    ));
    assert!(matches!(
        ctx.capture_add(),
        Err(DspError::NoResources(_))
    ));
}

// ===== Decode and capture pipelines =====

#[test]
fn decoded_input_runs_its_own_pipeline() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();
    ctx.input_set_data_format(input, StreamFormat::encoded(AudioFormat::Mp3, 44_100, 2))
        .unwrap();
    ctx.input_set_state(input, StreamState::Play).unwrap();

    assert_eq!(
        rig.sim.commands(),
        vec![
            Command::AllocPipe,
            Command::ConfigPipe,
            Command::AllocPipe,
            Command::ConfigPipe,
            Command::StartPipe,
            Command::StartPipe,
        ]
    );
    let types: Vec<u8> = rig.sim.messages().iter().map(|m| m.pipe_type).collect();
    let decode = PipelineType::Decode.code();
    let main = PipelineType::Main.code();
    assert_eq!(types, vec![decode, decode, main, main, decode, main]);

    let status = ctx.input_pipeline_status(input).unwrap().unwrap();
    assert_eq!(status.pipe_type, PipelineType::Decode);
    assert!(status.configured);
    assert!(status.started);
    assert_eq!(rig.sim.allocated_handles(), 2);
}

#[test]
fn decoded_input_reports_stream_info() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();
    ctx.input_set_data_format(input, StreamFormat::encoded(AudioFormat::Aac, 48_000, 2))
        .unwrap();

    // no decode pipeline before the first play
    assert!(ctx.input_stream_info(input).is_err());

    ctx.input_set_state(input, StreamState::Play).unwrap();
    rig.sim.set_stream_info(SimStreamInfo {
        sample_rate: 44_100,
        channel_count: 6,
        format_code: 3,
        bitrate: 256_000,
    });
    let info = ctx.input_stream_info(input).unwrap();
    assert_eq!(info.sample_rate, 44_100);
    assert_eq!(info.channel_count, 6);
    assert_eq!(info.bitrate, 256_000);

    let handle = ctx
        .input_pipeline_status(input)
        .unwrap()
        .unwrap()
        .handle
        .unwrap();
    let request = rig
        .sim
        .messages()
        .into_iter()
        .find(|m| m.command == Command::GetStreamInfo)
        .unwrap();
    assert_eq!(request.handle, handle.raw());
}

#[test]
fn removing_decoded_input_releases_everything() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();
    ctx.input_set_data_format(input, StreamFormat::encoded(AudioFormat::Mp3, 44_100, 2))
        .unwrap();
    ctx.input_set_state(input, StreamState::Play).unwrap();
    rig.sim.clear_log();

    ctx.input_remove(input).unwrap();

    let commands = rig.sim.commands();
    assert_eq!(
        &commands[..5],
        &[
            Command::StopPipe,
            Command::FlushPipe,
            Command::FreePipe,
            Command::StopPipe,
            Command::FlushPipe,
        ]
    );
    // the emptied slot is pushed to the still-configured main pipeline
    assert!(commands[5..].iter().all(|c| *c == Command::StageConfigure));
    assert_eq!(rig.sim.allocated_handles(), 1);
    assert!(!ctx.main_status().started);
    assert!(ctx.inputs().is_empty());
}

#[test]
fn capture_input_never_touches_main_pipeline() {
    let rig = Rig::new();
    let ctx = rig.open();
    let capture = ctx.capture_add().unwrap();

    assert!(ctx
        .input_set_data_format(capture, StreamFormat::encoded(AudioFormat::Mp3, 48_000, 2))
        .is_err());
    ctx.input_set_data_format(capture, pcm()).unwrap();
    ctx.input_set_state(capture, StreamState::Play).unwrap();

    assert_eq!(
        rig.sim.commands(),
        vec![Command::AllocPipe, Command::ConfigPipe, Command::StartPipe]
    );
    let capture_code = PipelineType::Capture.code();
    assert!(rig.sim.messages().iter().all(|m| m.pipe_type == capture_code));
    assert!(!ctx.main_status().configured);

    rig.sim.clear_log();
    ctx.input_set_state(capture, StreamState::Stop).unwrap();
    assert_eq!(
        rig.sim.commands(),
        vec![Command::StopPipe, Command::FlushPipe]
    );
    assert!(matches!(
        ctx.input_timestamp(capture),
        Err(DspError::InvalidParameter(_))
    ));
}

// ===== Failure handling =====

#[test]
fn failed_config_frees_and_leaves_input_stopped() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();
    ctx.input_set_data_format(input, pcm()).unwrap();
    rig.sim.fail(Command::ConfigPipe, RESULT_FAILED);

    let err = ctx.input_set_state(input, StreamState::Play).unwrap_err();
    assert!(matches!(
        err,
        DspError::FirmwareFailure {
            code: RESULT_FAILED,
            ..
        }
    ));
    assert_eq!(
        rig.sim.commands(),
        vec![Command::AllocPipe, Command::ConfigPipe, Command::FreePipe]
    );
    assert_eq!(ctx.input_state(input).unwrap(), StreamState::Stop);
    let status = ctx.main_status();
    assert!(!status.configured);
    assert!(status.handle.is_none());
    assert_eq!(rig.sim.allocated_handles(), 0);

    rig.sim.heal();
    rig.sim.clear_log();
    ctx.input_set_state(input, StreamState::Play).unwrap();
    assert_eq!(
        rig.sim.commands(),
        vec![Command::AllocPipe, Command::ConfigPipe, Command::StartPipe]
    );
}

#[test]
fn failed_start_frees_main_pipeline() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();
    ctx.input_set_data_format(input, pcm()).unwrap();
    rig.sim.fail(Command::StartPipe, RESULT_FAILED);

    assert!(ctx.input_set_state(input, StreamState::Play).is_err());
    assert_eq!(rig.sim.count(Command::FreePipe), 1);
    assert_eq!(ctx.input_state(input).unwrap(), StreamState::Stop);
    assert!(!ctx.main_status().configured);
    assert_eq!(rig.sim.allocated_handles(), 0);
}

#[test]
fn failed_decode_start_stops_nothing_else() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();
    ctx.input_set_data_format(input, StreamFormat::encoded(AudioFormat::Ac3, 48_000, 6))
        .unwrap();
    rig.sim.fail_times(Command::StartPipe, 1, RESULT_FAILED);

    assert!(ctx.input_set_state(input, StreamState::Play).is_err());
    assert!(ctx.input_pipeline_status(input).unwrap().is_none());
    // the main pipeline is configured but never started
    let status = ctx.main_status();
    assert!(status.configured);
    assert!(!status.started);
    assert_eq!(rig.sim.allocated_handles(), 1);
}

#[test]
fn flush_retries_transient_failures() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = playing_input(&ctx);
    rig.sim.fail_times(Command::FlushPipe, 2, RESULT_FAILED);
    rig.sim.clear_log();

    ctx.input_set_state(input, StreamState::Stop).unwrap();
    assert_eq!(rig.sim.count(Command::StopPipe), 1);
    assert_eq!(rig.sim.count(Command::FlushPipe), 3);
    assert_eq!(ctx.input_state(input).unwrap(), StreamState::Stop);
}

#[test]
fn flush_gives_up_after_retry_budget() {
    let mut config = short_timeout();
    config.ipc.flush_retries = 3;
    let rig = Rig::with_config(config);
    let ctx = rig.open();
    let input = playing_input(&ctx);
    rig.sim.fail(Command::FlushPipe, RESULT_FAILED);
    rig.sim.clear_log();

    assert!(matches!(
        ctx.input_set_state(input, StreamState::Stop),
        Err(DspError::FirmwareFailure { .. })
    ));
    assert_eq!(rig.sim.count(Command::StopPipe), 1);
    assert_eq!(rig.sim.count(Command::FlushPipe), 4);
    // STOP_PIPE went through, so the input is stopped despite the flush
    assert_eq!(ctx.input_state(input).unwrap(), StreamState::Stop);
    assert!(!ctx.main_status().started);

    rig.sim.heal();
    rig.sim.clear_log();
    ctx.input_set_state(input, StreamState::Stop).unwrap();
    assert!(rig.sim.commands().is_empty());

    ctx.input_set_state(input, StreamState::Play).unwrap();
    assert_eq!(rig.sim.commands(), vec![Command::StartPipe]);
    assert!(ctx.main_status().started);
}

#[test]
fn failed_stop_keeps_input_playing() {
    let rig = Rig::with_config(short_timeout());
    let ctx = rig.open();
    let input = playing_input(&ctx);
    rig.sim.fail(Command::StopPipe, RESULT_FAILED);
    rig.sim.clear_log();

    assert!(ctx.input_set_state(input, StreamState::Stop).is_err());
    assert_eq!(ctx.input_state(input).unwrap(), StreamState::Play);
    assert!(ctx.main_status().started);
    assert_eq!(rig.sim.count(Command::FlushPipe), 0);

    rig.sim.heal();
    rig.sim.clear_log();
    ctx.input_set_state(input, StreamState::Stop).unwrap();
    assert_eq!(
        rig.sim.commands(),
        vec![Command::StopPipe, Command::FlushPipe]
    );
}

#[test]
fn silent_firmware_times_out() {
    let rig = Rig::with_config(short_timeout());
    let ctx = rig.open();
    rig.sim.silence(Command::SwitchClock);

    let started = Instant::now();
    let err = ctx.switch_clock(19_200_000).unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(!ctx.reply_arrived());
}

// ===== Outputs =====

#[test]
fn output_added_to_running_pipeline_reconfigures_once() {
    let rig = Rig::new();
    let ctx = rig.open();
    playing_input(&ctx);
    rig.sim.clear_log();

    let output = ctx.output_add(2, 48_000).unwrap();
    assert!(ctx.output(output).unwrap().reconfig_post_proc_pipe());
    assert!(rig.sim.commands().is_empty());

    ctx.output_enable(output).unwrap();
    assert_eq!(
        rig.sim.commands(),
        vec![
            Command::StopPipe,
            Command::FlushPipe,
            Command::ConfigPipe,
            Command::StartPipe,
        ]
    );
    let added = ctx.output(output).unwrap();
    assert!(added.is_enabled());
    assert!(!added.reconfig_post_proc_pipe());
    assert!(ctx.main_status().started);

    // downmix 0 and output 0 of the default layout
    let active = ctx.main_active_stages();
    assert!(active.contains(&10));
    assert!(active.contains(&11));

    rig.sim.clear_log();
    ctx.output_enable(output).unwrap();
    assert!(rig.sim.commands().is_empty());
}

#[test]
fn output_before_configure_needs_no_firmware() {
    let rig = Rig::new();
    let ctx = rig.open();

    let output = ctx.output_add(2, 48_000).unwrap();
    assert!(!ctx.output(output).unwrap().reconfig_post_proc_pipe());
    ctx.output_enable(output).unwrap();
    assert!(rig.sim.commands().is_empty());

    playing_input(&ctx);
    assert_eq!(
        rig.sim.commands(),
        vec![Command::AllocPipe, Command::ConfigPipe, Command::StartPipe]
    );
    let config = rig
        .sim
        .messages()
        .into_iter()
        .find(|m| m.command == Command::ConfigPipe)
        .unwrap();
    // every input and SRC, mixer, interleaver, downmix, output
    assert_eq!(config.body[1], 4 + 4 + 1 + 1 + 1 + 1);
}

#[test]
fn play_without_outputs_runs_main_until_first_output() {
    let rig = Rig::new();
    let ctx = rig.open();
    playing_input(&ctx);

    assert!(ctx.outputs().is_empty());
    assert!(ctx.main_status().started);
    let config = rig
        .sim
        .messages()
        .into_iter()
        .find(|m| m.command == Command::ConfigPipe)
        .unwrap();
    // inputs, SRCs, mixer and an interleaver feeding nothing
    assert_eq!(config.body[1], 4 + 4 + 1 + 1);

    rig.sim.clear_log();
    let output = ctx.output_add(2, 48_000).unwrap();
    ctx.output_enable(output).unwrap();
    assert_eq!(
        rig.sim.commands(),
        vec![
            Command::StopPipe,
            Command::FlushPipe,
            Command::ConfigPipe,
            Command::StartPipe,
        ]
    );
    assert!(ctx.main_status().started);
}

#[test]
fn last_output_disabled_leaves_pipeline_stopped() {
    let rig = Rig::new();
    let ctx = rig.open();
    let output = ctx.output_add(2, 48_000).unwrap();
    ctx.output_enable(output).unwrap();
    playing_input(&ctx);
    rig.sim.clear_log();

    ctx.output_disable(output).unwrap();
    assert_eq!(
        rig.sim.commands(),
        vec![Command::StopPipe, Command::FlushPipe, Command::ConfigPipe]
    );
    assert!(!ctx.main_status().started);
    assert!(ctx.main_status().configured);

    rig.sim.clear_log();
    ctx.output_enable(output).unwrap();
    assert_eq!(
        rig.sim.commands(),
        vec![Command::FlushPipe, Command::ConfigPipe, Command::StartPipe]
    );
    assert!(ctx.main_status().started);
}

#[test]
fn removing_disabled_output_is_local() {
    let rig = Rig::new();
    let ctx = rig.open();
    playing_input(&ctx);
    let output = ctx.output_add(1, 48_000).unwrap();
    rig.sim.clear_log();

    ctx.output_remove(output).unwrap();
    assert!(rig.sim.commands().is_empty());
    assert!(ctx.outputs().is_empty());
    assert!(matches!(
        ctx.output_enable(output),
        Err(DspError::NotFound { .. })
    ));
}

#[test]
fn output_count_and_format_are_checked() {
    let rig = Rig::new();
    let ctx = rig.open();

    assert!(ctx.output_add(0, 48_000).is_err());
    assert!(ctx.output_add(2, 12_345).is_err());
    for _ in 0..DspConfig::default().pool.max_outputs {
        ctx.output_add(2, 48_000).unwrap();
    }
    assert!(matches!(
        ctx.output_add(2, 48_000),
        Err(DspError::NoResources(_))
    ));
}

// ===== Volume =====

#[test]
fn volume_change_pushes_mixer_stage() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = playing_input(&ctx);
    rig.sim.clear_log();

    ctx.set_master_volume(-200).unwrap();
    let messages = rig.sim.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].command, Command::StageConfigure);
    // stage index of the mixer in the default layout, then its kind
    assert_eq!(messages[0].body[0], 8);
    assert_eq!(messages[0].body[1], StageKind::Mixer.code());

    let table = ctx.input_mix_config(input).unwrap();
    assert_eq!(table.gain(0, 0), -200);
    assert_eq!(table.gain(1, 1), -200);
    assert_eq!(ctx.master_volume(), -200);
}

#[test]
fn mute_silences_every_route() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = playing_input(&ctx);

    ctx.mute().unwrap();
    assert!(ctx.is_muted());
    let table = ctx.input_mix_config(input).unwrap();
    for channel in 0..8 {
        assert_eq!(table.gain(channel, 0), GAIN_MUTE);
        assert_eq!(table.gain(channel, 1), GAIN_MUTE);
    }

    ctx.unmute().unwrap();
    assert_eq!(ctx.input_mix_config(input).unwrap().gain(0, 0), GAIN_0_DB);
    assert_eq!(rig.sim.count(Command::StageConfigure), 2);
}

#[test]
fn channel_trim_applies_to_one_side() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();
    ctx.input_set_data_format(input, pcm()).unwrap();

    ctx.set_channel_volume(1, -60).unwrap();
    let table = ctx.input_mix_config(input).unwrap();
    assert_eq!(table.gain(0, 0), GAIN_0_DB);
    assert_eq!(table.gain(1, 1), -60);
    // nothing configured yet, so nothing to push
    assert!(rig.sim.commands().is_empty());

    assert!(ctx.set_channel_volume(2, 0).is_err());
}

#[test]
fn out_of_range_volume_is_rejected() {
    let rig = Rig::new();
    let ctx = rig.open();
    playing_input(&ctx);
    rig.sim.clear_log();

    assert!(matches!(
        ctx.set_master_volume(181),
        Err(DspError::InvalidParameter(_))
    ));
    assert!(ctx.set_master_volume(GAIN_MUTE - 1).is_err());
    assert_eq!(ctx.master_volume(), GAIN_0_DB);
    assert!(rig.sim.commands().is_empty());
}

// ===== Data path extras =====

#[test]
fn job_available_is_posted_only_while_playing() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();
    ctx.input_set_data_format(input, pcm()).unwrap();
    assert!(ctx.input_job_available(input, 4096).is_err());

    ctx.input_set_state(input, StreamState::Play).unwrap();
    ctx.input_job_available(input, 4096).unwrap();
    assert!(wait_until(|| rig.sim.count(Command::InputJobAvailable) == 1));

    let job = rig
        .sim
        .messages()
        .into_iter()
        .find(|m| m.command == Command::InputJobAvailable)
        .unwrap();
    assert_eq!(job.token, 0);
    assert_eq!(job.handle, ctx.main_status().handle.unwrap().raw());
    let mut expected = input.0.to_le_bytes().to_vec();
    expected.extend_from_slice(&4096u32.to_le_bytes());
    assert_eq!(job.body, expected);

    ctx.input_set_state(input, StreamState::Pause).unwrap();
    assert!(ctx.input_job_available(input, 4096).is_err());
}

#[test]
fn timestamp_is_read_from_input_slot() {
    let rig = Rig::new();
    let ctx = rig.open();
    let input = ctx.input_add().unwrap();
    rig.sim.set_timestamp(0, 48_000 * 3).unwrap();

    assert_eq!(ctx.input_timestamp(input).unwrap(), 144_000);
}

#[test]
fn clock_switch_round_trip() {
    let rig = Rig::new();
    let ctx = rig.open();

    ctx.switch_clock(24_576_000).unwrap();
    let messages = rig.sim.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].command, Command::SwitchClock);
    assert_eq!(messages[0].body, 24_576_000u32.to_le_bytes().to_vec());
    assert!(ctx.reply_arrived());

    assert!(ctx.switch_clock(0).is_err());
}

// ===== Teardown =====

#[test]
fn close_releases_every_firmware_pipeline() {
    let rig = Rig::new();
    let ctx = rig.open();
    let output = ctx.output_add(2, 48_000).unwrap();
    ctx.output_enable(output).unwrap();
    let decoded = ctx.input_add().unwrap();
    ctx.input_set_data_format(decoded, StreamFormat::encoded(AudioFormat::Mp3, 48_000, 2))
        .unwrap();
    ctx.input_set_state(decoded, StreamState::Play).unwrap();
    playing_input(&ctx);
    assert_eq!(rig.sim.allocated_handles(), 2);

    rig.pool.close_processor(&ctx).unwrap();

    assert!(ctx.is_closed());
    assert_eq!(rig.sim.allocated_handles(), 0);
    assert_eq!(rig.pool.open_count(), 0);
    assert!(!ctx.main_status().configured);
    assert!(matches!(
        ctx.input_add(),
        Err(DspError::InvalidParameter(_))
    ));
}

#[test]
fn close_continues_past_failures() {
    let rig = Rig::new();
    let ctx = rig.open();
    let decoded = ctx.input_add().unwrap();
    ctx.input_set_data_format(decoded, StreamFormat::encoded(AudioFormat::Mp3, 48_000, 2))
        .unwrap();
    ctx.input_set_state(decoded, StreamState::Play).unwrap();
    ctx.input_add().unwrap();
    rig.sim.fail(Command::FreePipe, RESULT_FAILED);

    let err = rig.pool.close_processor(&ctx).unwrap_err();
    assert!(matches!(err, DspError::FirmwareFailure { .. }));
    assert!(ctx.is_closed());
    assert!(ctx.inputs().is_empty());
    // decode and main pipelines were both asked to free
    assert_eq!(rig.sim.count(Command::FreePipe), 2);
    assert_eq!(rig.pool.open_count(), 0);
}
