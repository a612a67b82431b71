//! Asynchronous IPC transport
//!
//! ## Architecture
//!
//! ```text
//!  caller threads              dispatcher thread            interrupt path
//!       │                             │                           │
//!       │ request(msg, timeout)       │                           │
//!       │──push──► dispatch list      │                           │
//!       │──kick──────────────────────►│ pop while DSP not busy    │
//!       │                             │ write send window         │
//!       │                             │ ring doorbell             │
//!       │                             │                           │ on_interrupt()
//!       │                             │                           │ read receive window
//!       │◄────────── reply (matched by token) ────────────────────│
//! ```
//!
//! Every blocking request registers a one-shot channel under a fresh token.
//! The interrupt handler looks the token up in the pending table; when the
//! waiter has already given up the entry is gone and the reply is dropped,
//! so a late reply never touches state that has been torn down.

use crate::error::{IpcError, Result};
use crate::header::MessageHeader;
use crate::mailbox::{Mailbox, Window, MAX_PAYLOAD};
use crate::message::{Command, IpcMessage, MessageId, Notification, PayloadReader, Reply};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// How often the dispatcher re-checks a non-empty list without being kicked
const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Bytes the token takes ahead of every request body
const TOKEN_SIZE: usize = 4;

/// Reject a body that can never fit the send window
fn check_size(message: &IpcMessage) -> Result<()> {
    let size = TOKEN_SIZE + message.body.len();
    if size > MAX_PAYLOAD {
        return Err(IpcError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD,
        });
    }
    Ok(())
}

/// Hardware side of the transport, provided by the bus layer
pub trait DspLink: Send + Sync {
    /// True while the coprocessor cannot accept a new message
    fn is_busy(&self) -> bool;

    /// Tell the coprocessor a message is waiting in the send window
    fn ring_doorbell(&self) -> Result<()>;

    /// Release the coprocessor from reset at `entry_point`
    fn start_core(&self, entry_point: u32) -> Result<()>;
}

/// A message plus the token its reply will carry
#[derive(Debug, Clone)]
struct Envelope {
    token: u32,
    message: IpcMessage,
}

enum Kick {
    Dispatch,
    Shutdown,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    mailbox: Mailbox,
    link: Arc<dyn DspLink>,
    queue: Mutex<VecDeque<Envelope>>,
    pending: Mutex<HashMap<u32, Sender<Result<Reply>>>>,
    subscribers: Mutex<Vec<Sender<Notification>>>,
    next_token: AtomicU32,
}

impl Shared {
    fn next_token(&self) -> u32 {
        loop {
            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            if token != 0 {
                return token;
            }
        }
    }

    fn link_busy(&self) -> bool {
        if self.link.is_busy() {
            return true;
        }
        match self.mailbox.is_busy(Window::Send) {
            Ok(busy) => busy,
            Err(err) => {
                error!(%err, "Cannot read send window state");
                true
            }
        }
    }

    /// Drain the dispatch list while the coprocessor accepts messages
    fn dispatch_pending(&self) {
        loop {
            if self.link_busy() {
                trace!("DSP busy, deferring dispatch");
                break;
            }

            let Some(envelope) = lock(&self.queue).pop_front() else {
                break;
            };

            if let Err(err) = self.send(&envelope) {
                // the firmware never saw it, so the window is still ours
                if let Err(err) = self.mailbox.clear_busy(Window::Send) {
                    error!(%err, "Cannot release send window");
                }
                if matches!(
                    err,
                    IpcError::PayloadTooLarge { .. } | IpcError::FieldOverflow { .. }
                ) {
                    error!(
                        command = %envelope.message.command,
                        token = envelope.token,
                        %err,
                        "Message can never be sent, dropped"
                    );
                    self.fail(envelope.token, err);
                    continue;
                }
                warn!(
                    command = %envelope.message.command,
                    token = envelope.token,
                    %err,
                    "Send failed, message stays queued"
                );
                lock(&self.queue).push_front(envelope);
                break;
            }
        }
    }

    /// Hand `err` to the waiter on `token`, if anyone still waits
    fn fail(&self, token: u32, err: IpcError) {
        if token == 0 {
            return;
        }
        if let Some(waiter) = lock(&self.pending).remove(&token) {
            let _ = waiter.try_send(Err(err));
        }
    }

    fn send(&self, envelope: &Envelope) -> Result<()> {
        let message = &envelope.message;
        let header = MessageHeader {
            message_id: MessageId::Request(message.command).code(),
            fw_handle: message.handle.map_or(0, |h| h.raw()),
            pipe_type: message.pipe_type.code(),
            payload_size: 0,
            done: false,
            busy: true,
        };

        let mut payload = Vec::with_capacity(4 + message.body.len());
        payload.extend_from_slice(&envelope.token.to_le_bytes());
        payload.extend_from_slice(&message.body);

        self.mailbox.write_message(Window::Send, header, &payload)?;
        debug!(
            command = %message.command,
            token = envelope.token,
            handle = header.fw_handle,
            bytes = payload.len(),
            "Dispatching IPC message"
        );
        self.link.ring_doorbell()
    }

    fn handle_receive_window(&self) -> Result<()> {
        let (header, payload) = self.mailbox.read_message(Window::Receive)?;
        let id = MessageId::from_code(header.message_id);
        // the window is ours to release whatever it held
        self.mailbox.clear_busy(Window::Receive)?;

        match id? {
            MessageId::Done(command) => self.complete(command, header.fw_handle, &payload),
            MessageId::Notification(kind) => {
                let notification = Notification {
                    kind,
                    handle: header.fw_handle,
                    data: payload,
                };
                debug!(?kind, handle = header.fw_handle, "Firmware notification");
                lock(&self.subscribers).retain(|tx| tx.send(notification.clone()).is_ok());
                Ok(())
            }
            MessageId::Request(command) => {
                warn!(%command, "Request id found in receive window");
                Err(IpcError::UnknownMessage(header.message_id))
            }
        }
    }

    fn complete(&self, command: Command, handle: u8, payload: &[u8]) -> Result<()> {
        let mut reader = PayloadReader::new(payload);
        let token = reader.u32()?;
        let result = reader.i32()?;
        let reply = Reply {
            command,
            token,
            result,
            handle,
            data: reader.rest().to_vec(),
        };

        if token == 0 || command.is_fire_and_forget() {
            trace!(%command, result, "Reply needs no waiter");
            return Ok(());
        }

        match lock(&self.pending).remove(&token) {
            Some(waiter) => {
                // waiter may have timed out between lookup and send
                let _ = waiter.try_send(Ok(reply));
            }
            None => {
                warn!(%command, token, result, "Late reply for abandoned request dropped");
            }
        }
        Ok(())
    }
}

/// Cloneable entry point for the interrupt path
///
/// Holds only a weak reference, so a registered callback never keeps a
/// shut-down transport alive.
#[derive(Clone)]
pub struct InterruptHandle {
    shared: Weak<Shared>,
    kick_tx: Sender<Kick>,
}

impl InterruptHandle {
    /// Service a mailbox interrupt
    ///
    /// Never blocks on a processor context; it only fills the pending
    /// waiter's channel and wakes the dispatcher, since the send window may
    /// have been freed.
    pub fn on_interrupt(&self) -> Result<()> {
        let shared = self.shared.upgrade().ok_or(IpcError::Disconnected)?;
        let outcome = shared.handle_receive_window();
        if let Err(err) = &outcome {
            warn!(%err, "Dropped malformed message from firmware");
        }
        let _ = self.kick_tx.try_send(Kick::Dispatch);
        outcome
    }
}

/// Command queue to the DSP firmware
pub struct IpcTransport {
    shared: Arc<Shared>,
    kick_tx: Sender<Kick>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IpcTransport {
    /// Create the transport and spawn its dispatcher thread
    pub fn new(mailbox: Mailbox, link: Arc<dyn DspLink>) -> Result<Self> {
        let shared = Arc::new(Shared {
            mailbox,
            link,
            queue: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            next_token: AtomicU32::new(1),
        });

        let (kick_tx, kick_rx) = unbounded::<Kick>();
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("dsp-ipc-dispatch".to_string())
            .spawn(move || Self::dispatcher_thread(&worker_shared, &kick_rx))
            .map_err(|e| IpcError::Link(format!("cannot spawn dispatcher: {e}")))?;

        Ok(Self {
            shared,
            kick_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn dispatcher_thread(shared: &Shared, kick_rx: &Receiver<Kick>) {
        debug!("IPC dispatcher started");
        loop {
            match kick_rx.recv_timeout(DISPATCH_POLL_INTERVAL) {
                Ok(Kick::Dispatch) => shared.dispatch_pending(),
                Ok(Kick::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if !lock(&shared.queue).is_empty() {
                        shared.dispatch_pending();
                    }
                }
            }
        }
        debug!("IPC dispatcher exiting");
    }

    /// Handle for the bus layer's interrupt callback
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            shared: Arc::downgrade(&self.shared),
            kick_tx: self.kick_tx.clone(),
        }
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.shared.mailbox
    }

    pub fn link(&self) -> &Arc<dyn DspLink> {
        &self.shared.link
    }

    /// Receive every unsolicited notification from now on
    pub fn subscribe(&self) -> Receiver<Notification> {
        let (tx, rx) = unbounded();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Queue a message nobody waits on
    pub fn post(&self, message: IpcMessage) -> Result<()> {
        check_size(&message)?;
        self.enqueue(Envelope { token: 0, message });
        Ok(())
    }

    fn enqueue(&self, envelope: Envelope) {
        trace!(command = %envelope.message.command, token = envelope.token, "Queueing IPC message");
        lock(&self.shared.queue).push_back(envelope);
        let _ = self.kick_tx.send(Kick::Dispatch);
    }

    /// Queue a message and block until its reply arrives or `timeout` elapses
    ///
    /// The reply is returned whatever its result code; interpreting the
    /// code is the caller's business.
    pub fn request(&self, message: IpcMessage, timeout: Duration) -> Result<Reply> {
        check_size(&message)?;
        let command = message.command;
        let token = self.shared.next_token();
        let (reply_tx, reply_rx) = bounded::<Result<Reply>>(1);

        lock(&self.shared.pending).insert(token, reply_tx);
        self.enqueue(Envelope { token, message });

        match reply_rx.recv_timeout(timeout) {
            Ok(Ok(reply)) => {
                debug!(%command, token, result = reply.result, "Reply received");
                Ok(reply)
            }
            Ok(Err(err)) => Err(err),
            Err(RecvTimeoutError::Timeout) => self.abandon(command, token, &reply_rx, timeout),
            Err(RecvTimeoutError::Disconnected) => {
                lock(&self.shared.pending).remove(&token);
                Err(IpcError::Disconnected)
            }
        }
    }

    /// Give up on `token` once its wait has expired
    ///
    /// A reply that landed between the expiry and the pending entry being
    /// removed still wins.
    fn abandon(
        &self,
        command: Command,
        token: u32,
        reply_rx: &Receiver<Result<Reply>>,
        timeout: Duration,
    ) -> Result<Reply> {
        let waiting = lock(&self.shared.pending).remove(&token).is_some();
        if !waiting {
            if let Ok(outcome) = reply_rx.try_recv() {
                debug!(%command, token, "Reply arrived as the wait expired");
                return outcome;
            }
        }

        // never sent: drop it so it cannot take effect later
        let mut queue = lock(&self.shared.queue);
        let before = queue.len();
        queue.retain(|envelope| envelope.token != token);
        let unsent = queue.len() != before;
        drop(queue);

        if unsent {
            warn!(%command, token, ?timeout, "IPC request timed out before dispatch");
        } else {
            warn!(
                %command,
                token,
                ?timeout,
                "IPC request timed out after dispatch, firmware may still apply it"
            );
        }
        Err(IpcError::Timeout {
            command,
            after: timeout,
        })
    }

    /// Messages still waiting for the coprocessor
    pub fn queued(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Requests still waiting for a reply
    pub fn outstanding(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Stop the dispatcher; queued messages are discarded
    pub fn shutdown(&self) {
        let _ = self.kick_tx.send(Kick::Shutdown);
        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                error!("IPC dispatcher panicked");
            }
        }
        let dropped = {
            let mut queue = lock(&self.shared.queue);
            let n = queue.len();
            queue.clear();
            n
        };
        // wakes every waiter with Disconnected
        lock(&self.shared.pending).clear();
        if dropped > 0 {
            warn!(dropped, "IPC transport shut down with queued messages");
        }
    }
}

impl Drop for IpcTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
