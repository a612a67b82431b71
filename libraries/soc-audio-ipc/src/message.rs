//! IPC message ids, requests, replies and payload helpers
//!
//! Every request payload starts with a `u32` token chosen by the transport;
//! the firmware echoes it at the start of the matching `_DONE` reply,
//! followed by an `i32` result code and any returned data. A token of `0`
//! marks a fire-and-forget request nobody waits for.

use crate::error::{IpcError, Result};
use soc_audio_core::{FirmwareHandle, PipelineType};
use std::fmt;

/// Bit that turns a request id into its `_DONE` reply id
pub const DONE_FLAG: u8 = 0x40;

/// Result code the firmware uses for success
pub const RESULT_OK: i32 = 0;

/// Requests the host can send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    AllocPipe,
    FreePipe,
    ConfigPipe,
    StartPipe,
    StopPipe,
    FlushPipe,
    PausePipe,
    ResumePipe,
    StageConfigure,
    StageGetParams,
    GetStreamInfo,
    InputJobAvailable,
    OutputJobAvailable,
    SwitchClock,
    GetFirmwareVersion,
    EnableTimestamps,
    SetDebugLevel,
    ProfileDump,
    CheckpointDump,
    QueryCapabilities,
    SetLatency,
    SetSyncMode,
    GetPipeState,
    ResetStatistics,
    GetStatistics,
    SetEventMask,
    Ping,
}

impl Command {
    pub const ALL: [Command; 27] = [
        Self::AllocPipe,
        Self::FreePipe,
        Self::ConfigPipe,
        Self::StartPipe,
        Self::StopPipe,
        Self::FlushPipe,
        Self::PausePipe,
        Self::ResumePipe,
        Self::StageConfigure,
        Self::StageGetParams,
        Self::GetStreamInfo,
        Self::InputJobAvailable,
        Self::OutputJobAvailable,
        Self::SwitchClock,
        Self::GetFirmwareVersion,
        Self::EnableTimestamps,
        Self::SetDebugLevel,
        Self::ProfileDump,
        Self::CheckpointDump,
        Self::QueryCapabilities,
        Self::SetLatency,
        Self::SetSyncMode,
        Self::GetPipeState,
        Self::ResetStatistics,
        Self::GetStatistics,
        Self::SetEventMask,
        Self::Ping,
    ];

    /// Request id on the wire (1-based, below `DONE_FLAG`)
    pub fn code(self) -> u8 {
        match self {
            Self::AllocPipe => 0x01,
            Self::FreePipe => 0x02,
            Self::ConfigPipe => 0x03,
            Self::StartPipe => 0x04,
            Self::StopPipe => 0x05,
            Self::FlushPipe => 0x06,
            Self::PausePipe => 0x07,
            Self::ResumePipe => 0x08,
            Self::StageConfigure => 0x09,
            Self::StageGetParams => 0x0A,
            Self::GetStreamInfo => 0x0B,
            Self::InputJobAvailable => 0x0C,
            Self::OutputJobAvailable => 0x0D,
            Self::SwitchClock => 0x0E,
            Self::GetFirmwareVersion => 0x0F,
            Self::EnableTimestamps => 0x10,
            Self::SetDebugLevel => 0x11,
            Self::ProfileDump => 0x12,
            Self::CheckpointDump => 0x13,
            Self::QueryCapabilities => 0x14,
            Self::SetLatency => 0x15,
            Self::SetSyncMode => 0x16,
            Self::GetPipeState => 0x17,
            Self::ResetStatistics => 0x18,
            Self::GetStatistics => 0x19,
            Self::SetEventMask => 0x1A,
            Self::Ping => 0x1B,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|cmd| cmd.code() == code)
    }

    /// Replies to these never wake a waiter
    pub fn is_fire_and_forget(self) -> bool {
        matches!(
            self,
            Self::InputJobAvailable
                | Self::OutputJobAvailable
                | Self::ProfileDump
                | Self::CheckpointDump
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::AllocPipe => "ALLOC_PIPE",
            Self::FreePipe => "FREE_PIPE",
            Self::ConfigPipe => "CONFIG_PIPE",
            Self::StartPipe => "START_PIPE",
            Self::StopPipe => "STOP_PIPE",
            Self::FlushPipe => "FLUSH_PIPE",
            Self::PausePipe => "PAUSE_PIPE",
            Self::ResumePipe => "RESUME_PIPE",
            Self::StageConfigure => "STAGE_CONFIGURE",
            Self::StageGetParams => "STAGE_GET_PARAMS",
            Self::GetStreamInfo => "GET_STREAM_INFO",
            Self::InputJobAvailable => "INPUT_JOB_AVAILABLE",
            Self::OutputJobAvailable => "OUTPUT_JOB_AVAILABLE",
            Self::SwitchClock => "SWITCH_CLOCK",
            Self::GetFirmwareVersion => "GET_FW_VERSION",
            Self::EnableTimestamps => "ENABLE_TIMESTAMPS",
            Self::SetDebugLevel => "SET_DEBUG_LEVEL",
            Self::ProfileDump => "PROFILE_DUMP",
            Self::CheckpointDump => "CHECKPOINT_DUMP",
            Self::QueryCapabilities => "QUERY_CAPABILITIES",
            Self::SetLatency => "SET_LATENCY",
            Self::SetSyncMode => "SET_SYNC_MODE",
            Self::GetPipeState => "GET_PIPE_STATE",
            Self::ResetStatistics => "RESET_STATISTICS",
            Self::GetStatistics => "GET_STATISTICS",
            Self::SetEventMask => "SET_EVENT_MASK",
            Self::Ping => "PING",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unsolicited messages from the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Firmware finished booting
    FwInitComplete,
    /// Stream event (end of stream, underrun, ...)
    Event,
    /// Firmware left a message in the checkpoint window
    MailboxHasMsg,
}

impl NotificationKind {
    pub fn code(self) -> u8 {
        match self {
            Self::FwInitComplete => 0x80,
            Self::Event => 0x81,
            Self::MailboxHasMsg => 0x82,
        }
    }
}

/// Full 8-bit message id space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Request(Command),
    Done(Command),
    Notification(NotificationKind),
}

impl MessageId {
    pub fn code(self) -> u8 {
        match self {
            Self::Request(cmd) => cmd.code(),
            Self::Done(cmd) => cmd.code() | DONE_FLAG,
            Self::Notification(kind) => kind.code(),
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        let id = match code {
            0x80 => Some(Self::Notification(NotificationKind::FwInitComplete)),
            0x81 => Some(Self::Notification(NotificationKind::Event)),
            0x82 => Some(Self::Notification(NotificationKind::MailboxHasMsg)),
            c if c & 0x80 != 0 => None,
            c if c & DONE_FLAG != 0 => Command::from_code(c & !DONE_FLAG).map(Self::Done),
            c => Command::from_code(c).map(Self::Request),
        };
        id.ok_or(IpcError::UnknownMessage(code))
    }
}

/// A request waiting to be dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcMessage {
    pub command: Command,
    pub handle: Option<FirmwareHandle>,
    pub pipe_type: PipelineType,
    pub body: Vec<u8>,
}

impl IpcMessage {
    pub fn new(command: Command, pipe_type: PipelineType) -> Self {
        Self {
            command,
            handle: None,
            pipe_type,
            body: Vec::new(),
        }
    }

    /// Address an allocated firmware pipeline
    pub fn with_handle(mut self, handle: FirmwareHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

/// A decoded `_DONE` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub command: Command,
    pub token: u32,
    pub result: i32,
    /// Raw handle field of the reply header
    pub handle: u8,
    pub data: Vec<u8>,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.result == RESULT_OK
    }

    pub fn reader(&self) -> PayloadReader<'_> {
        PayloadReader::new(&self.data)
    }
}

/// A decoded unsolicited notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub handle: u8,
    pub data: Vec<u8>,
}

impl Notification {
    /// First data word, the event code for `NotificationKind::Event`
    pub fn event_code(&self) -> Option<u32> {
        PayloadReader::new(&self.data).u32().ok()
    }
}

/// Little-endian payload builder
#[derive(Debug, Default, Clone)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian payload cursor
#[derive(Debug)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self.data.get(self.pos..end).ok_or(IpcError::Truncated {
            needed: N,
            available: self.remaining(),
        })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Everything not consumed yet
    pub fn rest(self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}
