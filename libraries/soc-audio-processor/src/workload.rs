//! Input and output workloads
//!
//! ```text
//!  UNINIT ──format──► STOP ⇄ PAUSE ⇄ PLAY
//!    │                 ▲               │
//!    └──► DISABLE      └───────────────┘
//! ```
//!
//! `DISABLE` is only reachable while no format has been set. Every other
//! target needs a format.

use crate::pipeline::Pipeline;
use serde::{Deserialize, Serialize};
use soc_audio_core::{AudioFormat, DspError, Result, StreamFormat};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamState {
    #[default]
    Uninit,
    Disable,
    Stop,
    Pause,
    Play,
}

impl StreamState {
    /// Counts towards keeping the main pipeline running
    pub fn is_active(self) -> bool {
        matches!(self, Self::Play | Self::Pause)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninit => "UNINIT",
            Self::Disable => "DISABLE",
            Self::Stop => "STOP",
            Self::Pause => "PAUSE",
            Self::Play => "PLAY",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputId(pub u32);

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputId(pub u32);

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output#{}", self.0)
    }
}

/// Whether an input plays back into the mixer or records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputKind {
    Playback,
    Capture,
}

/// One stream feeding a processor
#[derive(Debug)]
pub struct InputWorkload {
    pub(crate) id: InputId,
    pub(crate) kind: InputKind,
    pub(crate) state: StreamState,
    pub(crate) format: Option<StreamFormat>,
    /// Main pipeline input slot; capture inputs have none
    pub(crate) slot: Option<usize>,
    /// Decode or capture pipeline, built on first play
    pub(crate) pipeline: Option<Pipeline>,
}

impl InputWorkload {
    pub(crate) fn new(id: InputId, kind: InputKind, slot: Option<usize>) -> Self {
        Self {
            id,
            kind,
            state: StreamState::Uninit,
            format: None,
            slot,
            pipeline: None,
        }
    }

    pub fn id(&self) -> InputId {
        self.id
    }

    pub fn kind(&self) -> InputKind {
        self.kind
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn format(&self) -> AudioFormat {
        self.format.map_or(AudioFormat::Invalid, |f| f.format)
    }

    pub fn stream_format(&self) -> Option<StreamFormat> {
        self.format
    }

    pub fn is_capture(&self) -> bool {
        self.kind == InputKind::Capture
    }

    /// Decoded playback or capture both run their own firmware pipeline
    pub fn needs_pipeline(&self) -> bool {
        self.is_capture() || self.format().needs_decoder()
    }

    /// Gate a `set_state` request
    ///
    /// `Ok(false)` means the workload is already there and nothing needs
    /// to happen.
    pub fn check_transition(&self, target: StreamState) -> Result<bool> {
        if self.state == target {
            return Ok(false);
        }
        match target {
            StreamState::Uninit => Err(DspError::invalid(format!(
                "{} cannot return to {target}",
                self.id
            ))),
            StreamState::Disable if self.format.is_some() => Err(DspError::invalid(format!(
                "{} already has a format and cannot be disabled",
                self.id
            ))),
            StreamState::Disable => Ok(true),
            _ if self.format.is_none() => Err(DspError::invalid(format!(
                "{} has no format, cannot enter {target}",
                self.id
            ))),
            _ => Ok(true),
        }
    }
}

/// One rendering destination of a processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputWorkload {
    pub(crate) id: OutputId,
    /// Position among the main pipeline's output stage groups
    pub(crate) slot: usize,
    pub(crate) enabled: bool,
    pub(crate) channel_count: u8,
    pub(crate) sample_rate: u32,
    /// Added while the main pipeline was configured; the next enable
    /// has to rebuild the post-mix stages
    pub(crate) reconfig_post_proc_pipe: bool,
}

impl OutputWorkload {
    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn reconfig_post_proc_pipe(&self) -> bool {
        self.reconfig_post_proc_pipe
    }
}
