//! Shared-memory mailbox
//!
//! The mailbox is split into four disjoint, statically sized windows:
//!
//! ```text
//! 0x000 ┌──────────────┐ send       host → DSP   header word + payload
//! 0x400 ├──────────────┤ receive    DSP → host   header word + payload
//! 0x800 ├──────────────┤ timestamp  DSP → host   u64 per input stage
//! 0xC00 ├──────────────┤ checkpoint DSP → host   id + value words
//! 0x1000└──────────────┘
//! ```
//!
//! Only the transport writes the send window and only the codec here
//! touches the region directly.

use crate::error::{IpcError, Result};
use crate::header::{self, HeaderField, MessageHeader};
use soc_audio_core::MemoryRegion;
use std::sync::Arc;

/// Total bytes the mailbox occupies in shared SRAM
pub const MAILBOX_SIZE: usize = 0x1000;

const WINDOW_SIZE: usize = 0x400;
const HEADER_SIZE: usize = 4;

/// Largest payload a message window carries
pub const MAX_PAYLOAD: usize = WINDOW_SIZE - HEADER_SIZE;

/// Timestamp slots available (one `u64` each)
pub const TIMESTAMP_SLOTS: usize = WINDOW_SIZE / 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Send,
    Receive,
    Timestamp,
    Checkpoint,
}

impl Window {
    pub const fn offset(self) -> usize {
        match self {
            Self::Send => 0x000,
            Self::Receive => 0x400,
            Self::Timestamp => 0x800,
            Self::Checkpoint => 0xC00,
        }
    }

    pub const fn size(self) -> usize {
        WINDOW_SIZE
    }
}

/// Last progress marker the firmware published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub id: u32,
    pub value: u32,
}

/// Codec over the shared mailbox region
#[derive(Clone)]
pub struct Mailbox {
    region: Arc<dyn MemoryRegion>,
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("size", &self.region.size())
            .finish()
    }
}

impl Mailbox {
    /// Wrap a mapped region; it must be large enough for all windows
    pub fn new(region: Arc<dyn MemoryRegion>) -> Result<Self> {
        region.check_bounds(0, MAILBOX_SIZE)?;
        Ok(Self { region })
    }

    /// Copy header and payload into a message window
    ///
    /// The payload goes first so the header word, which carries the busy
    /// bit, only becomes visible once the payload is in place.
    pub fn write_message(
        &self,
        window: Window,
        mut header: MessageHeader,
        payload: &[u8],
    ) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(IpcError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        header.payload_size = payload.len() as u16;
        let word = header.encode()?;

        self.region.write(window.offset() + HEADER_SIZE, payload)?;
        self.region.write_u32(window.offset(), word)?;
        Ok(())
    }

    /// Copy header and payload out of a message window
    pub fn read_message(&self, window: Window) -> Result<(MessageHeader, Vec<u8>)> {
        let header = self.read_header(window)?;
        let size = usize::from(header.payload_size);
        if size > MAX_PAYLOAD {
            return Err(IpcError::PayloadTooLarge {
                size,
                max: MAX_PAYLOAD,
            });
        }

        let mut payload = vec![0u8; size];
        self.region.read(window.offset() + HEADER_SIZE, &mut payload)?;
        Ok((header, payload))
    }

    pub fn read_header(&self, window: Window) -> Result<MessageHeader> {
        Ok(MessageHeader::decode(self.region.read_u32(window.offset())?))
    }

    /// True while the firmware has not consumed the last sent message
    pub fn is_busy(&self, window: Window) -> Result<bool> {
        let word = self.region.read_u32(window.offset())?;
        Ok(header::get_field(word, HeaderField::Busy) == 1)
    }

    /// Hand a window back to its producer
    pub fn clear_busy(&self, window: Window) -> Result<()> {
        let word = self.region.read_u32(window.offset())?;
        let word = header::set_field(word, HeaderField::Busy, 0)?;
        self.region.write_u32(window.offset(), word)?;
        Ok(())
    }

    /// Rendered-sample counter the firmware keeps for one input stage
    pub fn read_timestamp(&self, slot: usize) -> Result<u64> {
        let offset = self.timestamp_offset(slot)?;
        let mut bytes = [0u8; 8];
        self.region.read(offset, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn write_timestamp(&self, slot: usize, value: u64) -> Result<()> {
        let offset = self.timestamp_offset(slot)?;
        self.region.write(offset, &value.to_le_bytes())?;
        Ok(())
    }

    fn timestamp_offset(&self, slot: usize) -> Result<usize> {
        if slot >= TIMESTAMP_SLOTS {
            return Err(IpcError::PayloadTooLarge {
                size: (slot + 1) * 8,
                max: Window::Timestamp.size(),
            });
        }
        Ok(Window::Timestamp.offset() + slot * 8)
    }

    pub fn read_checkpoint(&self) -> Result<Checkpoint> {
        let base = Window::Checkpoint.offset();
        Ok(Checkpoint {
            id: self.region.read_u32(base)?,
            value: self.region.read_u32(base + 4)?,
        })
    }

    pub fn write_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        let base = Window::Checkpoint.offset();
        self.region.write_u32(base, checkpoint.id)?;
        self.region.write_u32(base + 4, checkpoint.value)?;
        Ok(())
    }
}
