//! Per-context view of the transport
//!
//! Each processor context owns one endpoint and only uses it while holding
//! its own lock, which keeps at most one request in flight per context.

use crate::error::{IpcError, Result};
use crate::message::{IpcMessage, Reply};
use crate::transport::IpcTransport;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct IpcEndpoint {
    transport: Arc<IpcTransport>,
    timeout: Duration,
    reply_arrived: bool,
    last_reply: Option<Reply>,
}

impl IpcEndpoint {
    pub fn new(transport: Arc<IpcTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            reply_arrived: false,
            last_reply: None,
        }
    }

    /// Send `message` and block for its reply using the default timeout
    pub fn wait_reply(&mut self, message: IpcMessage) -> Result<Reply> {
        self.wait_reply_timeout(message, self.timeout)
    }

    /// Send `message` and block for its reply
    ///
    /// Succeeds only if the reply arrived in time *and* reports success.
    /// On timeout the reply-arrived flag stays unset.
    pub fn wait_reply_timeout(&mut self, message: IpcMessage, timeout: Duration) -> Result<Reply> {
        self.reply_arrived = false;
        self.last_reply = None;

        let command = message.command;
        let reply = self.transport.request(message, timeout)?;
        self.reply_arrived = true;
        self.last_reply = Some(reply.clone());

        if !reply.is_success() {
            debug!(%command, code = reply.result, "Firmware reported failure");
            return Err(IpcError::Firmware {
                command,
                code: reply.result,
            });
        }
        Ok(reply)
    }

    /// Queue `message` without waiting for a reply
    pub fn post(&self, message: IpcMessage) -> Result<()> {
        self.transport.post(message)
    }

    pub fn reply_arrived(&self) -> bool {
        self.reply_arrived
    }

    pub fn last_reply(&self) -> Option<&Reply> {
        self.last_reply.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport(&self) -> &Arc<IpcTransport> {
        &self.transport
    }
}
