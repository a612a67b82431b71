//! In-process firmware simulator
//!
//! Stands in for the coprocessor in tests: it implements `DspLink`, decodes
//! every message rung through the doorbell, records it, and answers with a
//! `_DONE` reply through the receive window and the interrupt handle, the
//! same path a real mailbox interrupt takes.

use crate::error::{IpcError, Result};
use crate::header::MessageHeader;
use crate::mailbox::{Mailbox, Window, MAILBOX_SIZE};
use crate::message::{
    Command, MessageId, NotificationKind, PayloadReader, PayloadWriter, DONE_FLAG, RESULT_OK,
};
use crate::transport::{DspLink, InterruptHandle, IpcTransport};
use soc_audio_core::HeapRegion;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Result code for a failed pipe allocation
pub const RESULT_NO_PIPES: i32 = -12;

/// Result code for injected failures
pub const RESULT_FAILED: i32 = -1;

/// Firmware version reported by `GET_FW_VERSION`
pub const SIM_FIRMWARE_VERSION: u32 = 0x0003_0201;

/// A message the simulator pulled out of the send window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub command: Command,
    pub handle: u8,
    pub pipe_type: u8,
    pub token: u32,
    pub body: Vec<u8>,
}

/// What `GET_STREAM_INFO` answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimStreamInfo {
    pub sample_rate: u32,
    pub channel_count: u32,
    pub format_code: u32,
    pub bitrate: u32,
}

impl Default for SimStreamInfo {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channel_count: 2,
            format_code: 0,
            bitrate: 0,
        }
    }
}

#[derive(Default)]
struct SimState {
    log: Vec<ReceivedMessage>,
    failures: HashMap<Command, i32>,
    transient: HashMap<Command, (u32, i32)>,
    silenced: HashSet<Command>,
    busy: bool,
    silent_boot: bool,
    allocated: HashSet<u8>,
    booted_at: Option<u32>,
    stream_info: SimStreamInfo,
}

impl SimState {
    /// Decide the reply: `None` means the firmware stays silent
    fn respond(&mut self, command: Command, handle: u8) -> Option<(i32, u8, Vec<u8>)> {
        if self.silenced.contains(&command) {
            return None;
        }
        if let Some((remaining, code)) = self.transient.get_mut(&command) {
            if *remaining > 0 {
                *remaining -= 1;
                return Some((*code, handle, Vec::new()));
            }
        }
        if let Some(&code) = self.failures.get(&command) {
            return Some((code, handle, Vec::new()));
        }

        let mut data = PayloadWriter::new();
        match command {
            Command::AllocPipe => match (1..=15u8).find(|h| !self.allocated.contains(h)) {
                Some(new_handle) => {
                    self.allocated.insert(new_handle);
                    return Some((RESULT_OK, new_handle, Vec::new()));
                }
                None => return Some((RESULT_NO_PIPES, 0, Vec::new())),
            },
            Command::FreePipe => {
                self.allocated.remove(&handle);
            }
            Command::GetStreamInfo => {
                let info = self.stream_info;
                data.u32(info.sample_rate)
                    .u32(info.channel_count)
                    .u32(info.format_code)
                    .u32(info.bitrate);
            }
            Command::GetFirmwareVersion => {
                data.u32(SIM_FIRMWARE_VERSION);
            }
            _ => {}
        }
        Some((RESULT_OK, handle, data.finish()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct FirmwareSimulator {
    mailbox: Mailbox,
    state: Mutex<SimState>,
    irq: Mutex<Option<InterruptHandle>>,
    receive_window: Mutex<()>,
}

impl FirmwareSimulator {
    pub fn new(mailbox: Mailbox) -> Arc<Self> {
        Arc::new(Self {
            mailbox,
            state: Mutex::new(SimState::default()),
            irq: Mutex::new(None),
            receive_window: Mutex::new(()),
        })
    }

    /// Simulator wired to a fresh transport over a heap-backed mailbox
    pub fn with_transport() -> Result<(Arc<Self>, Arc<IpcTransport>)> {
        let mailbox = Mailbox::new(Arc::new(HeapRegion::new(MAILBOX_SIZE)))?;
        let sim = Self::new(mailbox.clone());
        let transport = Arc::new(IpcTransport::new(mailbox, sim.clone())?);
        sim.attach(transport.interrupt_handle());
        Ok((sim, transport))
    }

    /// Route replies into the transport's interrupt path
    pub fn attach(&self, irq: InterruptHandle) {
        *lock(&self.irq) = Some(irq);
    }

    /// Every later `command` fails with `code`
    pub fn fail(&self, command: Command, code: i32) {
        lock(&self.state).failures.insert(command, code);
    }

    /// The next `times` `command`s fail with `code`
    pub fn fail_times(&self, command: Command, times: u32, code: i32) {
        lock(&self.state).transient.insert(command, (times, code));
    }

    /// Never answer `command`
    pub fn silence(&self, command: Command) {
        lock(&self.state).silenced.insert(command);
    }

    /// Restore normal behaviour for every command
    pub fn heal(&self) {
        let mut state = lock(&self.state);
        state.failures.clear();
        state.transient.clear();
        state.silenced.clear();
    }

    pub fn set_busy(&self, busy: bool) {
        lock(&self.state).busy = busy;
    }

    /// Do not send `FW_INIT_COMPLETE` when the core starts
    pub fn set_silent_boot(&self, silent: bool) {
        lock(&self.state).silent_boot = silent;
    }

    pub fn set_stream_info(&self, info: SimStreamInfo) {
        lock(&self.state).stream_info = info;
    }

    pub fn set_timestamp(&self, slot: usize, value: u64) -> Result<()> {
        self.mailbox.write_timestamp(slot, value)
    }

    pub fn booted_at(&self) -> Option<u32> {
        lock(&self.state).booted_at
    }

    pub fn messages(&self) -> Vec<ReceivedMessage> {
        lock(&self.state).log.clone()
    }

    pub fn commands(&self) -> Vec<Command> {
        lock(&self.state).log.iter().map(|m| m.command).collect()
    }

    pub fn count(&self, command: Command) -> usize {
        lock(&self.state)
            .log
            .iter()
            .filter(|m| m.command == command)
            .count()
    }

    pub fn clear_log(&self) {
        lock(&self.state).log.clear();
    }

    /// Firmware handles currently allocated
    pub fn allocated_handles(&self) -> usize {
        lock(&self.state).allocated.len()
    }

    /// Raise a stream event notification
    pub fn notify_event(&self, handle: u8, code: u32) -> Result<()> {
        let mut data = PayloadWriter::new();
        data.u32(code);
        self.deliver(
            NotificationKind::Event.code(),
            handle,
            0,
            false,
            &data.finish(),
        )
    }

    fn deliver(&self, id: u8, handle: u8, pipe_type: u8, done: bool, payload: &[u8]) -> Result<()> {
        let irq = lock(&self.irq).clone().ok_or(IpcError::Disconnected)?;
        let _window = lock(&self.receive_window);
        let header = MessageHeader {
            message_id: id,
            fw_handle: handle,
            pipe_type,
            payload_size: 0,
            done,
            busy: true,
        };
        self.mailbox.write_message(Window::Receive, header, payload)?;
        irq.on_interrupt()
    }
}

impl DspLink for FirmwareSimulator {
    fn is_busy(&self) -> bool {
        lock(&self.state).busy
    }

    fn ring_doorbell(&self) -> Result<()> {
        let (header, payload) = self.mailbox.read_message(Window::Send)?;
        self.mailbox.clear_busy(Window::Send)?;

        let command = match MessageId::from_code(header.message_id)? {
            MessageId::Request(command) => command,
            _ => return Err(IpcError::UnknownMessage(header.message_id)),
        };
        let mut reader = PayloadReader::new(&payload);
        let token = reader.u32()?;
        let received = ReceivedMessage {
            command,
            handle: header.fw_handle,
            pipe_type: header.pipe_type,
            token,
            body: reader.rest().to_vec(),
        };
        debug!(%command, token, handle = header.fw_handle, "Simulator received message");

        let response = {
            let mut state = lock(&self.state);
            state.log.push(received);
            state.respond(command, header.fw_handle)
        };

        let Some((result, handle, data)) = response else {
            return Ok(());
        };
        let mut reply = PayloadWriter::new();
        reply.u32(token).i32(result).bytes(&data);
        // the request was consumed; a lost reply is the waiter's timeout
        if let Err(err) = self.deliver(
            command.code() | DONE_FLAG,
            handle,
            header.pipe_type,
            true,
            &reply.finish(),
        ) {
            warn!(%command, token, %err, "Simulator could not deliver reply");
        }
        Ok(())
    }

    fn start_core(&self, entry_point: u32) -> Result<()> {
        let silent = {
            let mut state = lock(&self.state);
            state.booted_at = Some(entry_point);
            state.silent_boot
        };
        if silent {
            return Ok(());
        }

        let mut data = PayloadWriter::new();
        data.u32(SIM_FIRMWARE_VERSION);
        self.deliver(
            NotificationKind::FwInitComplete.code(),
            0,
            0,
            false,
            &data.finish(),
        )
    }
}
