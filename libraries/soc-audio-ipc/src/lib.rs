//! SoC Audio IPC
//!
//! Host side of the message channel to the audio DSP firmware.
//!
//! - **Header codec**: the packed 32-bit mailbox header word
//! - **Mailbox**: send, receive, timestamp and checkpoint windows over a
//!   shared memory region
//! - **Transport**: dispatch list, dispatcher thread, token-matched replies
//!   and notification fan-out
//! - **Endpoint**: the blocking `wait_reply` view a processor context uses
//!
//! # Example
//!
//! ```rust
//! use soc_audio_ipc::{HeaderField, MessageHeader};
//!
//! let header = MessageHeader {
//!     message_id: 0x03,
//!     fw_handle: 2,
//!     payload_size: 12,
//!     busy: true,
//!     ..Default::default()
//! };
//! let word = header.encode().unwrap();
//! assert_eq!(soc_audio_ipc::header::get_field(word, HeaderField::FirmwareHandle), 2);
//! assert_eq!(MessageHeader::decode(word), header);
//! ```

#![forbid(unsafe_code)]

mod endpoint;
mod error;
pub mod header;
pub mod mailbox;
pub mod message;
mod transport;

#[cfg(feature = "test-utils")]
pub mod sim;

pub use endpoint::IpcEndpoint;
pub use error::{IpcError, Result};
pub use header::{HeaderField, MessageHeader};
pub use mailbox::{Checkpoint, Mailbox, Window, MAILBOX_SIZE, MAX_PAYLOAD};
pub use message::{
    Command, IpcMessage, MessageId, Notification, NotificationKind, PayloadReader, PayloadWriter,
    Reply, DONE_FLAG, RESULT_OK,
};
pub use transport::{DspLink, InterruptHandle, IpcTransport};
