//! Bit-packed 32-bit IPC header
//!
//! ```text
//!  31   30   29 ............ 16 15 .. 12 11 .. 8 7 ........ 0
//! busy done     payload size      type   handle  message id
//! ```

use crate::error::{IpcError, Result};

/// One bit-field of the header word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderField {
    MessageId,
    FirmwareHandle,
    PipeType,
    PayloadSize,
    Done,
    Busy,
}

impl HeaderField {
    pub const ALL: [HeaderField; 6] = [
        Self::MessageId,
        Self::FirmwareHandle,
        Self::PipeType,
        Self::PayloadSize,
        Self::Done,
        Self::Busy,
    ];

    pub const fn shift(self) -> u32 {
        match self {
            Self::MessageId => 0,
            Self::FirmwareHandle => 8,
            Self::PipeType => 12,
            Self::PayloadSize => 16,
            Self::Done => 30,
            Self::Busy => 31,
        }
    }

    pub const fn width(self) -> u32 {
        match self {
            Self::MessageId => 8,
            Self::FirmwareHandle | Self::PipeType => 4,
            Self::PayloadSize => 14,
            Self::Done | Self::Busy => 1,
        }
    }

    /// Largest value the field holds
    pub const fn max(self) -> u32 {
        (1 << self.width()) - 1
    }

    /// Bits the field occupies within the word
    pub const fn mask(self) -> u32 {
        self.max() << self.shift()
    }
}

/// Replace one field of `word`, leaving every other bit untouched
pub fn set_field(word: u32, field: HeaderField, value: u32) -> Result<u32> {
    if value > field.max() {
        return Err(IpcError::FieldOverflow { field, value });
    }
    Ok((word & !field.mask()) | (value << field.shift()))
}

/// Extract one field of `word`
pub fn get_field(word: u32, field: HeaderField) -> u32 {
    (word & field.mask()) >> field.shift()
}

/// Decoded header word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub message_id: u8,
    pub fw_handle: u8,
    pub pipe_type: u8,
    pub payload_size: u16,
    pub done: bool,
    pub busy: bool,
}

impl MessageHeader {
    /// Pack into the wire word, rejecting values wider than their field
    pub fn encode(&self) -> Result<u32> {
        let mut word = 0;
        word = set_field(word, HeaderField::MessageId, self.message_id.into())?;
        word = set_field(word, HeaderField::FirmwareHandle, self.fw_handle.into())?;
        word = set_field(word, HeaderField::PipeType, self.pipe_type.into())?;
        word = set_field(word, HeaderField::PayloadSize, self.payload_size.into())?;
        word = set_field(word, HeaderField::Done, self.done.into())?;
        set_field(word, HeaderField::Busy, self.busy.into())
    }

    /// Unpack a wire word; every bit pattern is a valid header
    pub fn decode(word: u32) -> Self {
        Self {
            message_id: get_field(word, HeaderField::MessageId) as u8,
            fw_handle: get_field(word, HeaderField::FirmwareHandle) as u8,
            pipe_type: get_field(word, HeaderField::PipeType) as u8,
            payload_size: get_field(word, HeaderField::PayloadSize) as u16,
            done: get_field(word, HeaderField::Done) == 1,
            busy: get_field(word, HeaderField::Busy) == 1,
        }
    }
}
