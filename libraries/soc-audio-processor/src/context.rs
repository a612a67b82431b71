//! Processor context
//!
//! One audio-processing instance: a main pipeline, the inputs and outputs
//! attached to it, and the volume state its mixer renders with.
//!
//! ## Main pipeline layout
//!
//! ```text
//! [input 0][src 0]? ... [input N-1][src N-1]?  [mixer][interleaver]  [downmix 0]?[output 0] ... [downmix M-1]?[output M-1]
//!  └─ always in use, one per input slot ──┘                          └─ in use only for enabled outputs ───────────────┘
//! ```
//!
//! Every mutation runs under the context lock, including the firmware
//! round trips it triggers, so a context never has more than one request
//! in flight.

use crate::mix::{
    compute_mix_config, validate_volume, MixConfig, GAIN_0_DB, GAIN_MUTE, MIX_OUTPUT_CHANNELS,
};
use crate::pipeline::{FlushPolicy, Pipeline, PipelineStatus};
use crate::stage::{
    DecoderConfig, DecoderStage, DownmixParams, InputParams, InterleaverParams, MixerParams,
    OutputParams, SrcParams, StageParams,
};
use crate::workload::{
    InputId, InputKind, InputWorkload, OutputId, OutputWorkload, StreamState,
};
use soc_audio_core::types::{MAX_CHANNELS, SUPPORTED_SAMPLE_RATES};
use soc_audio_core::{AudioFormat, DspConfig, DspError, PipelineType, Result, StreamFormat};
use soc_audio_ipc::{Command, IpcEndpoint, IpcMessage, IpcTransport, PayloadWriter};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Slot index of a context within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(pub usize);

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "processor#{}", self.0)
    }
}

/// Decoder view of a stream, from `GET_STREAM_INFO`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channel_count: u32,
    pub format_code: u32,
    pub bitrate: u32,
}

/// Stage indices of the main pipeline
#[derive(Debug, Clone)]
struct MainLayout {
    inputs: Vec<usize>,
    srcs: Vec<Option<usize>>,
    mixer: usize,
    interleaver: usize,
    downmixes: Vec<Option<usize>>,
    outputs: Vec<usize>,
    stage_count: usize,
}

impl MainLayout {
    fn new(config: &DspConfig) -> Self {
        let mut next = 0;
        let mut take = || {
            next += 1;
            next - 1
        };

        let mut inputs = Vec::new();
        let mut srcs = Vec::new();
        for _ in 0..config.pool.max_inputs {
            inputs.push(take());
            srcs.push(config.pipeline.input_src.then(&mut take));
        }
        let mixer = take();
        let interleaver = take();
        let mut downmixes = Vec::new();
        let mut outputs = Vec::new();
        for _ in 0..config.pool.max_outputs {
            downmixes.push(config.pipeline.output_downmix.then(&mut take));
            outputs.push(take());
        }

        Self {
            inputs,
            srcs,
            mixer,
            interleaver,
            downmixes,
            outputs,
            stage_count: next,
        }
    }
}

struct ContextState {
    id: ProcessorId,
    endpoint: IpcEndpoint,
    config: DspConfig,
    flush: FlushPolicy,
    layout: MainLayout,
    main: Pipeline,
    inputs: Vec<InputWorkload>,
    outputs: Vec<OutputWorkload>,
    next_input: u32,
    next_output: u32,
    master_volume: i16,
    channel_volume: [i16; MIX_OUTPUT_CHANNELS],
    muted: bool,
    closed: bool,
}

impl ContextState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DspError::invalid(format!("{} is closed", self.id)));
        }
        Ok(())
    }

    fn input_index(&self, id: InputId) -> Result<usize> {
        self.inputs
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| DspError::not_found("input", id))
    }

    fn output_index(&self, id: OutputId) -> Result<usize> {
        self.outputs
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| DspError::not_found("output", id))
    }

    /// Any playback input keeping the main pipeline busy, other than `except`
    fn playback_active(&self, except: Option<usize>) -> bool {
        self.inputs
            .iter()
            .enumerate()
            .any(|(i, w)| Some(i) != except && !w.is_capture() && w.state.is_active())
    }

    fn enabled_outputs(&self) -> Vec<&OutputWorkload> {
        let mut enabled: Vec<_> = self.outputs.iter().filter(|o| o.enabled).collect();
        enabled.sort_by_key(|o| o.slot);
        enabled
    }

    /// Format the main pipeline sees on `slot`
    ///
    /// Decoded inputs arrive as PCM from their decode pipeline, already
    /// converted to the mix rate when sample-rate conversion is enabled.
    fn slot_format(&self, slot: usize) -> Option<StreamFormat> {
        let format = self
            .inputs
            .iter()
            .find(|w| w.slot == Some(slot))
            .and_then(|w| w.format)?;
        if !format.format.needs_decoder() {
            return Some(format);
        }
        let rate = if self.config.pipeline.input_src {
            self.config.pipeline.mix_sample_rate
        } else {
            format.sample_rate
        };
        Some(StreamFormat::pcm(rate, format.sample_size, format.channel_count))
    }

    /// Channels the mixer renders: mono only if every enabled output is mono
    fn mix_channels(&self) -> u8 {
        let enabled = self.enabled_outputs();
        if !enabled.is_empty() && enabled.iter().all(|o| o.channel_count == 1) {
            1
        } else {
            MIX_OUTPUT_CHANNELS as u8
        }
    }

    fn effective_volume(&self) -> i16 {
        if self.muted {
            GAIN_MUTE
        } else {
            self.master_volume
        }
    }

    fn mix_table(&self, slot: usize) -> MixConfig {
        match self.slot_format(slot) {
            Some(format) => compute_mix_config(
                self.effective_volume(),
                format.channel_count,
                self.mix_channels(),
            )
            .with_output_trims(self.channel_volume),
            None => MixConfig::muted(),
        }
    }

    fn src_params(&self, format: Option<StreamFormat>) -> SrcParams {
        let mix_rate = self.config.pipeline.mix_sample_rate;
        SrcParams {
            input_rate: format.map_or(mix_rate, |f| f.sample_rate),
            output_rate: mix_rate,
            channel_count: format.map_or(2, |f| f.channel_count),
        }
    }

    /// Recompute every main stage's parameters from current workloads
    fn refresh_main_params(&mut self) -> Result<()> {
        let layout = self.layout.clone();
        let mix_channels = self.mix_channels();

        for (slot, &stage) in layout.inputs.iter().enumerate() {
            let format = self.slot_format(slot);
            self.main.enable_stage(
                stage,
                StageParams::Input(InputParams {
                    slot: slot as u8,
                    format,
                }),
            )?;
            if let Some(src) = layout.srcs[slot] {
                let params = self.src_params(format);
                self.main
                    .enable_stage(src, StageParams::SampleRateConverter(params))?;
            }
        }

        let tables = (0..layout.inputs.len()).map(|s| self.mix_table(s)).collect();
        self.main.enable_stage(
            layout.mixer,
            StageParams::Mixer(MixerParams {
                tables,
                output_channels: mix_channels,
            }),
        )?;

        let enabled: Vec<(usize, OutputParams)> = self
            .enabled_outputs()
            .iter()
            .map(|o| {
                (
                    o.slot,
                    OutputParams {
                        target: o.id.0,
                        sample_rate: o.sample_rate,
                        channel_count: o.channel_count,
                    },
                )
            })
            .collect();

        self.main.enable_stage(
            layout.interleaver,
            StageParams::Interleaver(InterleaverParams {
                outputs: enabled.len() as u8,
                channel_count: mix_channels,
            }),
        )?;

        for (slot, &stage) in layout.outputs.iter().enumerate() {
            let downmix = layout.downmixes[slot];
            match enabled.iter().find(|(s, _)| *s == slot) {
                Some((_, params)) => {
                    if let Some(downmix) = downmix {
                        self.main.enable_stage(
                            downmix,
                            StageParams::Downmix(DownmixParams {
                                input_channels: mix_channels,
                                output_channels: params.channel_count,
                            }),
                        )?;
                    }
                    self.main.enable_stage(stage, StageParams::Output(*params))?;
                }
                None => {
                    if let Some(downmix) = downmix {
                        self.main.disable_stage(downmix)?;
                    }
                    self.main.disable_stage(stage)?;
                }
            }
        }
        Ok(())
    }

    fn build_main(&mut self) -> Result<Pipeline> {
        let fresh = Pipeline::create(self.layout.stage_count, PipelineType::Main)?;
        let old = std::mem::replace(&mut self.main, fresh);
        self.refresh_main_params()?;
        Ok(old)
    }

    /// Replace a main pipeline whose firmware side is gone
    fn rebuild_main(&mut self) {
        match self.build_main() {
            Ok(old) => {
                if let Err(err) = old.delete() {
                    warn!(processor = %self.id, %err, "Dropping main pipeline still marked allocated");
                }
            }
            Err(err) => warn!(processor = %self.id, %err, "Cannot rebuild main pipeline"),
        }
    }

    fn configure_main(&mut self) -> Result<()> {
        if self.main.is_configured() {
            return Ok(());
        }
        self.refresh_main_params()?;
        if let Err(err) = self.main.configure(&mut self.endpoint) {
            self.rebuild_main();
            return Err(err);
        }
        Ok(())
    }

    fn start_main(&mut self) -> Result<()> {
        if self.main.is_started() {
            return Ok(());
        }
        if let Err(err) = self.main.start(&mut self.endpoint) {
            self.rebuild_main();
            return Err(err);
        }
        Ok(())
    }

    fn stop_main(&mut self) -> Result<()> {
        if !self.main.is_started() {
            return Ok(());
        }
        self.main.stop(&mut self.endpoint)?;
        self.main.flush(&mut self.endpoint, self.flush)
    }

    /// Rebuild post-mix stages after the output set changed
    ///
    /// Stop, flush, rebuild, connect and restart. With no enabled output
    /// left, or nothing playing, the pipeline stays stopped.
    fn reconfigure(&mut self) -> Result<()> {
        if !self.main.is_configured() {
            return self.refresh_main_params();
        }

        self.main.stop(&mut self.endpoint)?;
        self.main.flush(&mut self.endpoint, self.flush)?;
        self.refresh_main_params()?;
        if let Err(err) = self.main.configure(&mut self.endpoint) {
            self.rebuild_main();
            return Err(err);
        }

        let outputs = self.enabled_outputs().len();
        if outputs > 0 && self.playback_active(None) {
            self.start_main()?;
        }
        info!(
            processor = %self.id,
            outputs,
            started = self.main.is_started(),
            "Main pipeline reconfigured"
        );
        Ok(())
    }

    /// Push the parameters of one input slot to a configured main pipeline
    fn push_slot(&mut self, slot: usize) -> Result<()> {
        self.refresh_main_params()?;
        if !self.main.is_configured() {
            return Ok(());
        }
        self.main
            .configure_stage(&mut self.endpoint, self.layout.inputs[slot])?;
        if let Some(src) = self.layout.srcs[slot] {
            self.main.configure_stage(&mut self.endpoint, src)?;
        }
        self.main
            .configure_stage(&mut self.endpoint, self.layout.mixer)
    }

    fn push_mixer(&mut self) -> Result<()> {
        self.refresh_main_params()?;
        if !self.main.is_configured() {
            return Ok(());
        }
        self.main
            .configure_stage(&mut self.endpoint, self.layout.mixer)
    }

    fn build_input_pipeline(&self, input: &InputWorkload) -> Result<Pipeline> {
        let format = input
            .format
            .ok_or_else(|| DspError::invalid(format!("{} has no format", input.id)))?;
        let mix_rate = self.config.pipeline.mix_sample_rate;
        let needs_src = self.config.pipeline.input_src && format.sample_rate != mix_rate;
        let slot = input.slot.map_or(0, |s| s as u8);
        let output = OutputParams {
            target: input.slot.map_or(input.id.0, |s| s as u32),
            sample_rate: if needs_src { mix_rate } else { format.sample_rate },
            channel_count: format.channel_count,
        };

        let mut stages = vec![StageParams::Input(InputParams {
            slot,
            format: Some(format),
        })];
        let pipe_type = if input.is_capture() {
            PipelineType::Capture
        } else {
            stages.push(StageParams::Decoder(DecoderStage {
                config: DecoderConfig::for_format(format.format)?,
                stream: format,
            }));
            PipelineType::Decode
        };
        let src_index = stages.len();
        stages.push(StageParams::SampleRateConverter(self.src_params(Some(format))));
        stages.push(StageParams::Output(output));

        let mut pipeline = Pipeline::create(stages.len(), pipe_type)?;
        for (index, params) in stages.into_iter().enumerate() {
            if index == src_index && !needs_src {
                pipeline.set_params(index, params)?;
            } else {
                pipeline.enable_stage(index, params)?;
            }
        }
        Ok(pipeline)
    }

    /// Main starts even with no output enabled; the first output enabled
    /// afterwards reconfigures the running graph.
    fn play_input(&mut self, index: usize) -> Result<()> {
        let capture = self.inputs[index].is_capture();

        if self.inputs[index].needs_pipeline() && self.inputs[index].pipeline.is_none() {
            let pipeline = self.build_input_pipeline(&self.inputs[index])?;
            self.inputs[index].pipeline = Some(pipeline);
        }
        if let Some(pipeline) = self.inputs[index].pipeline.as_mut() {
            if !pipeline.is_configured() {
                if let Err(err) = pipeline.configure(&mut self.endpoint) {
                    self.inputs[index].pipeline = None;
                    return Err(err);
                }
            }
        }

        if !capture {
            self.configure_main()?;
        }

        if let Some(pipeline) = self.inputs[index].pipeline.as_mut() {
            if let Err(err) = pipeline.start(&mut self.endpoint) {
                self.inputs[index].pipeline = None;
                return Err(err);
            }
        }

        if !capture {
            if let Err(err) = self.start_main() {
                if let Some(pipeline) = self.inputs[index].pipeline.as_mut() {
                    if let Err(stop_err) = pipeline.stop(&mut self.endpoint) {
                        warn!(%stop_err, "Cannot stop input pipeline after main start failed");
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stop the input, and the main pipeline if nothing else plays
    ///
    /// The outer error means a STOP_PIPE failed and the input still runs.
    /// The inner result carries the first failed flush; by then every
    /// pipeline involved is already stopped.
    fn halt_input(&mut self, index: usize) -> Result<Result<()>> {
        let mut flushed = Ok(());
        if let Some(pipeline) = self.inputs[index].pipeline.as_mut() {
            pipeline.stop(&mut self.endpoint)?;
            flushed = pipeline.flush(&mut self.endpoint, self.flush);
        }
        if !self.inputs[index].is_capture()
            && !self.playback_active(Some(index))
            && self.main.is_started()
        {
            self.main.stop(&mut self.endpoint)?;
            let main_flushed = self.main.flush(&mut self.endpoint, self.flush);
            flushed = flushed.and(main_flushed);
        }
        Ok(flushed)
    }

    fn set_state(&mut self, id: InputId, target: StreamState) -> Result<()> {
        let index = self.input_index(id)?;
        if !self.inputs[index].check_transition(target)? {
            debug!(processor = %self.id, input = %id, state = %target, "Already in requested state");
            return Ok(());
        }

        let from = self.inputs[index].state;
        let mut outcome = Ok(());
        match target {
            StreamState::Play => self.play_input(index)?,
            StreamState::Stop => outcome = self.halt_input(index)?,
            StreamState::Pause | StreamState::Disable | StreamState::Uninit => {}
        }

        self.inputs[index].state = target;
        info!(processor = %self.id, input = %id, %from, to = %target, "Input state changed");
        if let Err(err) = &outcome {
            warn!(processor = %self.id, input = %id, %err, "Stopped without a clean flush");
        }
        outcome
    }

    fn input_add(&mut self, kind: InputKind) -> Result<InputId> {
        let max = self.config.pool.max_inputs;
        if self.inputs.len() >= max {
            return Err(DspError::no_resources(format!(
                "{} already has {max} inputs",
                self.id
            )));
        }
        let slot = match kind {
            InputKind::Capture => None,
            InputKind::Playback => (0..max).find(|s| self.inputs.iter().all(|w| w.slot != Some(*s))),
        };

        let id = InputId(self.next_input);
        self.next_input += 1;
        self.inputs.push(InputWorkload::new(id, kind, slot));
        debug!(processor = %self.id, input = %id, ?kind, ?slot, "Input added");
        Ok(id)
    }

    fn input_remove(&mut self, id: InputId) -> Result<()> {
        let index = self.input_index(id)?;
        let mut first_err: Option<DspError> = None;
        let mut record = |result: Result<()>| {
            if let Err(err) = result {
                warn!(%err, "Input teardown step failed");
                first_err.get_or_insert(err);
            }
        };

        if let Some(mut pipeline) = self.inputs[index].pipeline.take() {
            record(pipeline.stop(&mut self.endpoint));
            record(pipeline.flush(&mut self.endpoint, self.flush));
            record(pipeline.free(&mut self.endpoint));
            record(pipeline.delete());
        }

        let input = self.inputs.remove(index);
        if !input.is_capture() && !self.playback_active(None) {
            record(self.stop_main());
        }
        if let Some(slot) = input.slot {
            record(self.push_slot(slot));
        }

        info!(processor = %self.id, input = %id, "Input removed");
        first_err.map_or(Ok(()), Err)
    }

    fn input_set_data_format(&mut self, id: InputId, format: StreamFormat) -> Result<()> {
        let index = self.input_index(id)?;
        format.validate()?;

        let input = &self.inputs[index];
        if !matches!(
            input.state,
            StreamState::Uninit | StreamState::Disable | StreamState::Stop
        ) {
            return Err(DspError::invalid(format!(
                "{id} is in {}, format can only change while stopped",
                input.state
            )));
        }
        if input.is_capture() && format.format != AudioFormat::Pcm {
            return Err(DspError::invalid(format!(
                "capture {id} must be PCM, not {}",
                format.format
            )));
        }
        if format.format.needs_decoder() {
            DecoderConfig::for_format(format.format)?;
        }

        // the decode pipeline was built for the old format
        if let Some(mut pipeline) = self.inputs[index].pipeline.take() {
            pipeline.free(&mut self.endpoint)?;
            pipeline.delete()?;
        }

        let input = &mut self.inputs[index];
        input.format = Some(format);
        if matches!(input.state, StreamState::Uninit | StreamState::Disable) {
            input.state = StreamState::Stop;
        }
        let slot = input.slot;
        debug!(processor = %self.id, input = %id, format = %format.format, rate = format.sample_rate, "Input format set");

        match slot {
            Some(slot) => self.push_slot(slot),
            None => Ok(()),
        }
    }

    fn input_job_available(&mut self, id: InputId, bytes: u32) -> Result<()> {
        let index = self.input_index(id)?;
        let input = &self.inputs[index];
        if input.state != StreamState::Play {
            return Err(DspError::invalid(format!(
                "{id} is in {}, data is only accepted while playing",
                input.state
            )));
        }

        let target = input.pipeline.as_ref().unwrap_or(&self.main);
        let handle = target
            .handle()
            .ok_or_else(|| DspError::invalid(format!("{id} has no firmware pipeline")))?;
        let mut body = PayloadWriter::new();
        body.u32(id.0).u32(bytes);
        self.endpoint.post(
            IpcMessage::new(Command::InputJobAvailable, target.pipe_type())
                .with_handle(handle)
                .with_body(body.finish()),
        )?;
        Ok(())
    }

    fn input_stream_info(&mut self, id: InputId) -> Result<StreamInfo> {
        let index = self.input_index(id)?;
        let pipeline = self.inputs[index]
            .pipeline
            .as_ref()
            .filter(|p| p.pipe_type() == PipelineType::Decode)
            .ok_or_else(|| DspError::invalid(format!("{id} has no decode pipeline")))?;
        let handle = pipeline
            .handle()
            .ok_or_else(|| DspError::invalid(format!("{id} decode pipeline is not allocated")))?;

        let reply = self.endpoint.wait_reply(
            IpcMessage::new(Command::GetStreamInfo, PipelineType::Decode).with_handle(handle),
        )?;
        let mut reader = reply.reader();
        Ok(StreamInfo {
            sample_rate: reader.u32()?,
            channel_count: reader.u32()?,
            format_code: reader.u32()?,
            bitrate: reader.u32()?,
        })
    }

    fn output_add(&mut self, channel_count: u8, sample_rate: u32) -> Result<OutputId> {
        if channel_count == 0 || channel_count > MAX_CHANNELS {
            return Err(DspError::invalid(format!(
                "unsupported output channel count {channel_count}"
            )));
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(DspError::invalid(format!(
                "unsupported output sample rate {sample_rate} Hz"
            )));
        }
        let max = self.config.pool.max_outputs;
        let slot = (0..max)
            .find(|s| self.outputs.iter().all(|o| o.slot != *s))
            .ok_or_else(|| {
                DspError::no_resources(format!("{} already has {max} outputs", self.id))
            })?;

        let id = OutputId(self.next_output);
        self.next_output += 1;
        let reconfig_post_proc_pipe = self.main.is_configured();
        self.outputs.push(OutputWorkload {
            id,
            slot,
            enabled: false,
            channel_count,
            sample_rate,
            reconfig_post_proc_pipe,
        });
        debug!(processor = %self.id, output = %id, slot, reconfig_post_proc_pipe, "Output added");
        Ok(id)
    }

    fn output_enable(&mut self, id: OutputId) -> Result<()> {
        let index = self.output_index(id)?;
        if self.outputs[index].enabled {
            return Ok(());
        }

        self.outputs[index].enabled = true;
        if let Err(err) = self.reconfigure() {
            self.outputs[index].enabled = false;
            return Err(err);
        }
        self.outputs[index].reconfig_post_proc_pipe = false;
        info!(processor = %self.id, output = %id, "Output enabled");
        Ok(())
    }

    fn output_disable(&mut self, id: OutputId) -> Result<()> {
        let index = self.output_index(id)?;
        if !self.outputs[index].enabled {
            return Ok(());
        }
        self.outputs[index].enabled = false;
        info!(processor = %self.id, output = %id, "Output disabled");
        self.reconfigure()
    }

    fn output_remove(&mut self, id: OutputId) -> Result<()> {
        let index = self.output_index(id)?;
        let output = self.outputs.remove(index);
        info!(processor = %self.id, output = %id, "Output removed");
        if output.enabled {
            self.reconfigure()
        } else {
            Ok(())
        }
    }

    fn switch_clock(&mut self, hz: u32) -> Result<()> {
        if hz == 0 {
            return Err(DspError::invalid("clock frequency must be non-zero"));
        }
        let mut body = PayloadWriter::new();
        body.u32(hz);
        let mut message =
            IpcMessage::new(Command::SwitchClock, PipelineType::Main).with_body(body.finish());
        if let Some(handle) = self.main.handle() {
            message = message.with_handle(handle);
        }
        self.endpoint.wait_reply(message)?;
        info!(processor = %self.id, hz, "Clock switched");
        Ok(())
    }

    /// Tear everything down, continuing past failures
    fn close(&mut self) -> Result<()> {
        let mut first_err: Option<DspError> = None;

        let inputs: Vec<InputId> = self.inputs.iter().map(|w| w.id).collect();
        for id in inputs {
            if let Err(err) = self.input_remove(id) {
                first_err.get_or_insert(err);
            }
        }
        let outputs: Vec<OutputId> = self.outputs.iter().map(|o| o.id).collect();
        for id in outputs {
            if let Err(err) = self.output_remove(id) {
                first_err.get_or_insert(err);
            }
        }

        // reconfigure on output removal may already have stopped or
        // released the pipeline; go by its flags
        if self.main.is_started() {
            if let Err(err) = self.main.stop(&mut self.endpoint) {
                first_err.get_or_insert(err);
            }
        }
        if self.main.handle().is_some() {
            if let Err(err) = self.main.flush(&mut self.endpoint, self.flush) {
                first_err.get_or_insert(err);
            }
            if let Err(err) = self.main.free(&mut self.endpoint) {
                first_err.get_or_insert(err);
            }
        }
        self.rebuild_main();
        self.closed = true;

        info!(processor = %self.id, "Processor closed");
        first_err.map_or(Ok(()), Err)
    }
}

/// One audio-processing instance handed out by a `ProcessorPool`
pub struct ProcessorContext {
    id: ProcessorId,
    is_global: bool,
    state: Mutex<ContextState>,
}

impl fmt::Debug for ProcessorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorContext")
            .field("id", &self.id)
            .field("is_global", &self.is_global)
            .finish_non_exhaustive()
    }
}

impl ProcessorContext {
    pub(crate) fn new(
        id: ProcessorId,
        is_global: bool,
        transport: Arc<IpcTransport>,
        config: &DspConfig,
    ) -> Result<Self> {
        let layout = MainLayout::new(config);
        let main = Pipeline::create(layout.stage_count, PipelineType::Main)?;
        let mut state = ContextState {
            id,
            endpoint: IpcEndpoint::new(transport, config.reply_timeout()),
            config: config.clone(),
            flush: FlushPolicy::from(&config.ipc),
            layout,
            main,
            inputs: Vec::new(),
            outputs: Vec::new(),
            next_input: 1,
            next_output: 1,
            master_volume: GAIN_0_DB,
            channel_volume: [GAIN_0_DB; MIX_OUTPUT_CHANNELS],
            muted: false,
            closed: false,
        };
        state.refresh_main_params()?;

        Ok(Self {
            id,
            is_global,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_open<T>(&self, op: impl FnOnce(&mut ContextState) -> Result<T>) -> Result<T> {
        let mut state = self.lock();
        state.ensure_open()?;
        op(&mut state)
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn is_global(&self) -> bool {
        self.is_global
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn close(&self) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        state.close()
    }

    // ===== Inputs =====

    /// Attach a playback input; it starts in `UNINIT`
    pub fn input_add(&self) -> Result<InputId> {
        self.with_open(|s| s.input_add(InputKind::Playback))
    }

    /// Attach a capture input, which runs its own capture pipeline
    pub fn capture_add(&self) -> Result<InputId> {
        self.with_open(|s| s.input_add(InputKind::Capture))
    }

    pub fn input_remove(&self, id: InputId) -> Result<()> {
        self.with_open(|s| s.input_remove(id))
    }

    pub fn input_set_data_format(&self, id: InputId, format: StreamFormat) -> Result<()> {
        self.with_open(|s| s.input_set_data_format(id, format))
    }

    pub fn input_set_state(&self, id: InputId, state: StreamState) -> Result<()> {
        self.with_open(|s| s.set_state(id, state))
    }

    /// Tell the firmware `bytes` of new data are queued for `id`
    pub fn input_job_available(&self, id: InputId, bytes: u32) -> Result<()> {
        self.with_open(|s| s.input_job_available(id, bytes))
    }

    pub fn input_stream_info(&self, id: InputId) -> Result<StreamInfo> {
        self.with_open(|s| s.input_stream_info(id))
    }

    /// Samples rendered for `id`, as published in the timestamp window
    pub fn input_timestamp(&self, id: InputId) -> Result<u64> {
        self.with_open(|s| {
            let index = s.input_index(id)?;
            let slot = s.inputs[index]
                .slot
                .ok_or_else(|| DspError::invalid(format!("{id} has no mixer slot")))?;
            Ok(s.endpoint.transport().mailbox().read_timestamp(slot)?)
        })
    }

    pub fn input_state(&self, id: InputId) -> Result<StreamState> {
        let state = self.lock();
        let index = state.input_index(id)?;
        Ok(state.inputs[index].state)
    }

    pub fn input_format(&self, id: InputId) -> Result<Option<StreamFormat>> {
        let state = self.lock();
        let index = state.input_index(id)?;
        Ok(state.inputs[index].stream_format())
    }

    pub fn input_pipeline_status(&self, id: InputId) -> Result<Option<PipelineStatus>> {
        let state = self.lock();
        let index = state.input_index(id)?;
        Ok(state.inputs[index].pipeline.as_ref().map(Pipeline::status))
    }

    pub fn inputs(&self) -> Vec<InputId> {
        self.lock().inputs.iter().map(|w| w.id).collect()
    }

    // ===== Outputs =====

    pub fn output_add(&self, channel_count: u8, sample_rate: u32) -> Result<OutputId> {
        self.with_open(|s| s.output_add(channel_count, sample_rate))
    }

    pub fn output_enable(&self, id: OutputId) -> Result<()> {
        self.with_open(|s| s.output_enable(id))
    }

    pub fn output_disable(&self, id: OutputId) -> Result<()> {
        self.with_open(|s| s.output_disable(id))
    }

    pub fn output_remove(&self, id: OutputId) -> Result<()> {
        self.with_open(|s| s.output_remove(id))
    }

    pub fn output(&self, id: OutputId) -> Result<OutputWorkload> {
        let state = self.lock();
        let index = state.output_index(id)?;
        Ok(state.outputs[index].clone())
    }

    pub fn outputs(&self) -> Vec<OutputId> {
        self.lock().outputs.iter().map(|o| o.id).collect()
    }

    // ===== Volume =====

    pub fn set_master_volume(&self, tenths_db: i16) -> Result<()> {
        validate_volume(tenths_db)?;
        self.with_open(|s| {
            s.master_volume = tenths_db;
            s.push_mixer()
        })
    }

    /// Trim one output channel (0 = left, 1 = right)
    pub fn set_channel_volume(&self, channel: usize, tenths_db: i16) -> Result<()> {
        if channel >= MIX_OUTPUT_CHANNELS {
            return Err(DspError::invalid(format!(
                "channel {channel} out of range (0..{MIX_OUTPUT_CHANNELS})"
            )));
        }
        validate_volume(tenths_db)?;
        self.with_open(|s| {
            s.channel_volume[channel] = tenths_db;
            s.push_mixer()
        })
    }

    pub fn mute(&self) -> Result<()> {
        self.with_open(|s| {
            s.muted = true;
            s.push_mixer()
        })
    }

    pub fn unmute(&self) -> Result<()> {
        self.with_open(|s| {
            s.muted = false;
            s.push_mixer()
        })
    }

    pub fn master_volume(&self) -> i16 {
        self.lock().master_volume
    }

    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    /// Gain table the mixer currently applies to `id`
    pub fn input_mix_config(&self, id: InputId) -> Result<MixConfig> {
        let state = self.lock();
        let index = state.input_index(id)?;
        let slot = state.inputs[index]
            .slot
            .ok_or_else(|| DspError::invalid(format!("{id} has no mixer slot")))?;
        Ok(state.mix_table(slot))
    }

    // ===== Firmware =====

    pub fn switch_clock(&self, hz: u32) -> Result<()> {
        self.with_open(|s| s.switch_clock(hz))
    }

    pub fn main_status(&self) -> PipelineStatus {
        self.lock().main.status()
    }

    /// In-use stage indices of the main pipeline
    pub fn main_active_stages(&self) -> Vec<usize> {
        self.lock().main.active_stages()
    }

    /// Whether the last blocking request got any reply
    pub fn reply_arrived(&self) -> bool {
        self.lock().endpoint.reply_arrived()
    }
}
