//! Pipeline model and firmware round trips
//!
//! ## Lifecycle
//!
//! ```text
//! create ──► enable_stage* ──► configure ──► start ⇄ stop ──► flush ──► free
//!                               │  ALLOC_PIPE (first time)
//!                               │  connect
//!                               └► CONFIG_PIPE
//! ```
//!
//! A pipeline is only ever started after a successful `CONFIG_PIPE`. When
//! `CONFIG_PIPE` or `START_PIPE` fails the firmware pipeline is released,
//! and callers drop the host object; nothing half configured survives.

use crate::stage::{PortRef, Stage, StageBehavior, StageKind, StageParams};
use soc_audio_core::config::MAX_STAGES;
use soc_audio_core::{DspError, FirmwareHandle, IpcSettings, PipelineType, Result};
use soc_audio_ipc::{Command, IpcEndpoint, IpcError, IpcMessage, PayloadWriter};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How `FLUSH_PIPE` absorbs transient firmware errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl From<&IpcSettings> for FlushPolicy {
    fn from(settings: &IpcSettings) -> Self {
        Self {
            retries: settings.flush_retries,
            delay: Duration::from_millis(settings.flush_retry_delay_ms),
        }
    }
}

/// Flags and handle of a pipeline, for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatus {
    pub pipe_type: PipelineType,
    pub handle: Option<FirmwareHandle>,
    pub configured: bool,
    pub started: bool,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pipe_type: PipelineType,
    stages: Vec<Stage>,
    handle: Option<FirmwareHandle>,
    configured: bool,
    started: bool,
}

impl Pipeline {
    /// Empty pipeline with `stage_count` unused slots
    pub fn create(stage_count: usize, pipe_type: PipelineType) -> Result<Self> {
        if stage_count == 0 || stage_count > MAX_STAGES {
            return Err(DspError::invalid(format!(
                "pipeline needs 1..={MAX_STAGES} stages, got {stage_count}"
            )));
        }
        Ok(Self {
            pipe_type,
            stages: vec![Stage::default(); stage_count],
            handle: None,
            configured: false,
            started: false,
        })
    }

    /// Release the host object; the firmware pipeline must be freed first
    pub fn delete(self) -> Result<()> {
        if let Some(handle) = self.handle {
            return Err(DspError::invalid(format!(
                "pipeline {handle} is still allocated in firmware"
            )));
        }
        Ok(())
    }

    pub fn pipe_type(&self) -> PipelineType {
        self.pipe_type
    }

    pub fn handle(&self) -> Option<FirmwareHandle> {
        self.handle
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            pipe_type: self.pipe_type,
            handle: self.handle,
            configured: self.configured,
            started: self.started,
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Stage> {
        let count = self.stages.len();
        self.stages
            .get_mut(index)
            .ok_or_else(|| DspError::invalid(format!("stage {index} out of range (0..{count})")))
    }

    /// Mark a slot in use and seed its parameters
    pub fn enable_stage(&mut self, index: usize, params: StageParams) -> Result<()> {
        let stage = self.slot_mut(index)?;
        stage.in_use = true;
        stage.params = Some(params);
        stage.sources.clear();
        Ok(())
    }

    /// Take a slot out of the dataflow; its parameters are kept
    pub fn disable_stage(&mut self, index: usize) -> Result<()> {
        let stage = self.slot_mut(index)?;
        stage.in_use = false;
        stage.sources.clear();
        Ok(())
    }

    /// Replace the parameters of a slot without touching its in-use flag
    pub fn set_params(&mut self, index: usize, params: StageParams) -> Result<()> {
        self.slot_mut(index)?.params = Some(params);
        Ok(())
    }

    /// Indices of in-use stages, in array order
    pub fn active_stages(&self) -> Vec<usize> {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, stage)| stage.in_use)
            .map(|(index, _)| index)
            .collect()
    }

    pub fn find_stage(&self, kind: StageKind) -> Option<usize> {
        self.stages.iter().position(|s| s.kind() == Some(kind))
    }

    /// Wire every in-use stage to the open outputs of the stages before it
    ///
    /// Unused slots are skipped, so optional stages compress out of the
    /// chain. A stage consumes the most recently produced ports, which
    /// makes a plain chain connect each stage to the previous in-use one
    /// and lets a mixer collect one port from each input branch. Every
    /// port produced must be consumed. Returns the active chain.
    pub fn connect(&mut self) -> Result<Vec<usize>> {
        let mut open: Vec<PortRef> = Vec::new();
        let mut chain = Vec::new();

        for index in 0..self.stages.len() {
            let stage = &self.stages[index];
            if !stage.in_use {
                continue;
            }
            let Some(params) = &stage.params else {
                return Err(DspError::invalid(format!(
                    "stage {index} is in use without parameters"
                )));
            };

            let needed = usize::from(params.inputs_count());
            if open.len() < needed {
                return Err(DspError::invalid(format!(
                    "{} stage {index} needs {needed} inputs, only {} upstream",
                    params.kind(),
                    open.len()
                )));
            }
            let sources = open.split_off(open.len() - needed);
            for port in (0..params.outputs_count()).rev() {
                open.push(PortRef { stage: index, port });
            }

            self.stages[index].sources = sources;
            chain.push(index);
        }

        if !open.is_empty() {
            return Err(DspError::invalid(format!(
                "{} stage outputs left unconnected",
                open.len()
            )));
        }

        debug!(pipe_type = ?self.pipe_type, stages = chain.len(), "Connected pipeline");
        Ok(chain)
    }

    fn encode_stage(index: usize, stage: &Stage, out: &mut PayloadWriter) {
        let Some(params) = &stage.params else {
            return;
        };
        out.u8(index as u8)
            .u8(params.kind().code())
            .u8(params.inputs_count())
            .u8(params.outputs_count());
        for source in &stage.sources {
            out.u8(source.stage as u8).u8(source.port);
        }
        let mut body = PayloadWriter::new();
        params.encode(&mut body);
        out.u16(body.len() as u16).bytes(&body.finish());
    }

    /// `CONFIG_PIPE` body: every active stage with its connections
    pub fn config_payload(&self) -> Vec<u8> {
        let active = self.active_stages();
        let mut out = PayloadWriter::new();
        out.u8(self.stages.len() as u8).u8(active.len() as u8);
        for index in active {
            Self::encode_stage(index, &self.stages[index], &mut out);
        }
        out.finish()
    }

    fn message(&self, command: Command) -> Result<IpcMessage> {
        let handle = self.handle.ok_or_else(|| {
            DspError::invalid(format!("{command} needs an allocated pipeline"))
        })?;
        Ok(IpcMessage::new(command, self.pipe_type).with_handle(handle))
    }

    /// `ALLOC_PIPE` unless a firmware handle is already held
    pub fn alloc(&mut self, endpoint: &mut IpcEndpoint) -> Result<FirmwareHandle> {
        if let Some(handle) = self.handle {
            return Ok(handle);
        }
        let mut body = PayloadWriter::new();
        body.u8(self.stages.len() as u8);
        let reply = endpoint.wait_reply(
            IpcMessage::new(Command::AllocPipe, self.pipe_type).with_body(body.finish()),
        )?;

        let handle = FirmwareHandle::new(reply.handle)?;
        self.handle = Some(handle);
        debug!(pipe_type = ?self.pipe_type, %handle, "Pipeline allocated");
        Ok(handle)
    }

    /// Connect and send `CONFIG_PIPE`, allocating first if needed
    ///
    /// On failure the firmware pipeline is freed; the caller is expected
    /// to drop or rebuild this object.
    pub fn configure(&mut self, endpoint: &mut IpcEndpoint) -> Result<()> {
        self.connect()?;
        self.alloc(endpoint)?;

        let message = self.message(Command::ConfigPipe)?.with_body(self.config_payload());
        if let Err(err) = endpoint.wait_reply(message) {
            warn!(pipe_type = ?self.pipe_type, %err, "CONFIG_PIPE failed, tearing down");
            self.teardown(endpoint);
            return Err(err.into());
        }

        self.configured = true;
        debug!(pipe_type = ?self.pipe_type, handle = ?self.handle, "Pipeline configured");
        Ok(())
    }

    /// `START_PIPE`; only legal once configured
    pub fn start(&mut self, endpoint: &mut IpcEndpoint) -> Result<()> {
        if !self.configured {
            return Err(DspError::invalid("cannot start an unconfigured pipeline"));
        }
        if self.started {
            return Ok(());
        }

        let message = self.message(Command::StartPipe)?;
        if let Err(err) = endpoint.wait_reply(message) {
            warn!(pipe_type = ?self.pipe_type, %err, "START_PIPE failed, tearing down");
            self.teardown(endpoint);
            return Err(err.into());
        }

        self.started = true;
        info!(pipe_type = ?self.pipe_type, handle = ?self.handle, "Pipeline started");
        Ok(())
    }

    /// `STOP_PIPE` if running
    pub fn stop(&mut self, endpoint: &mut IpcEndpoint) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        endpoint.wait_reply(self.message(Command::StopPipe)?)?;
        self.started = false;
        info!(pipe_type = ?self.pipe_type, handle = ?self.handle, "Pipeline stopped");
        Ok(())
    }

    /// `FLUSH_PIPE`, retried on firmware errors
    ///
    /// A flush can race DMA completions still in flight, which the
    /// firmware reports as an error; those are retried after a short
    /// sleep. Timeouts are not retried.
    pub fn flush(&mut self, endpoint: &mut IpcEndpoint, policy: FlushPolicy) -> Result<()> {
        if self.handle.is_none() {
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            match endpoint.wait_reply(self.message(Command::FlushPipe)?) {
                Ok(_) => return Ok(()),
                Err(IpcError::Firmware { code, .. }) if attempt < policy.retries => {
                    attempt += 1;
                    debug!(code, attempt, "FLUSH_PIPE rejected, retrying");
                    thread::sleep(policy.delay);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// `FREE_PIPE`; the host object returns to its unallocated state
    pub fn free(&mut self, endpoint: &mut IpcEndpoint) -> Result<()> {
        if self.handle.is_none() {
            return Ok(());
        }
        let message = self.message(Command::FreePipe)?;
        let outcome = endpoint.wait_reply(message);

        // firmware state is unknown after a failed free; never reuse the handle
        let handle = self.handle.take();
        self.configured = false;
        self.started = false;
        debug!(pipe_type = ?self.pipe_type, ?handle, "Pipeline freed");
        outcome.map(|_| ()).map_err(Into::into)
    }

    /// Send a single stage's parameters to a configured pipeline
    pub fn configure_stage(&self, endpoint: &mut IpcEndpoint, index: usize) -> Result<()> {
        let stage = self
            .stage(index)
            .ok_or_else(|| DspError::invalid(format!("stage {index} out of range")))?;
        let mut body = PayloadWriter::new();
        Self::encode_stage(index, stage, &mut body);
        endpoint.wait_reply(self.message(Command::StageConfigure)?.with_body(body.finish()))?;
        Ok(())
    }

    /// Best-effort release after a failed round trip
    fn teardown(&mut self, endpoint: &mut IpcEndpoint) {
        if let Err(err) = self.free(endpoint) {
            warn!(pipe_type = ?self.pipe_type, %err, "Free after failure also failed");
        }
    }
}
