//! Processor pool
//!
//! Boots the firmware and hands out processor contexts. A fixed number of
//! slots exist; the global context is shared and reference counted, every
//! other open takes a slot of its own.

use crate::context::{ProcessorContext, ProcessorId};
use soc_audio_core::config::MAX_PROCESSORS;
use soc_audio_core::{DspConfig, DspError, PipelineType, Result};
use soc_audio_firmware::{FirmwareLoader, LoadReport};
use soc_audio_ipc::{Command, IpcEndpoint, IpcMessage, IpcTransport, NotificationKind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a successful boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    pub load: LoadReport,
    pub firmware_version: u32,
}

struct Slot {
    context: Arc<ProcessorContext>,
    ref_count: usize,
}

#[derive(Default)]
struct PoolState {
    slots: Vec<Option<Slot>>,
    global: Option<usize>,
    boot: Option<BootReport>,
}

pub struct ProcessorPool {
    transport: Arc<IpcTransport>,
    config: DspConfig,
    state: Mutex<PoolState>,
}

impl ProcessorPool {
    pub fn new(transport: Arc<IpcTransport>, config: DspConfig) -> Result<Self> {
        config.validate()?;
        let slots = config.pool.max_processors.min(MAX_PROCESSORS);
        let mut state = PoolState::default();
        state.slots.resize_with(slots, || None);

        Ok(Self {
            transport,
            config,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &DspConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<IpcTransport> {
        &self.transport
    }

    /// Load `image`, release the core and wait for `FW_INIT_COMPLETE`
    pub fn boot(&self, loader: &FirmwareLoader, image: &[u8]) -> Result<BootReport> {
        // subscribe before the core runs so the first notification is seen
        let notifications = self.transport.subscribe();

        let load = loader.load_bytes(image)?;
        self.transport.link().start_core(load.entry_point)?;
        info!(entry_point = format_args!("{:#010x}", load.entry_point), "DSP core released");

        let timeout = self.config.reply_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match notifications.recv_timeout(remaining) {
                Ok(n) if n.kind == NotificationKind::FwInitComplete => break,
                Ok(n) => debug!(kind = ?n.kind, "Ignoring notification while booting"),
                Err(_) => {
                    warn!(?timeout, "Firmware never reported init complete");
                    return Err(DspError::Timeout {
                        message: "FW_INIT_COMPLETE".to_string(),
                        after: timeout,
                    });
                }
            }
        }

        let mut endpoint = IpcEndpoint::new(Arc::clone(&self.transport), timeout);
        let reply =
            endpoint.wait_reply(IpcMessage::new(Command::GetFirmwareVersion, PipelineType::Main))?;
        let firmware_version = reply.reader().u32()?;

        let report = BootReport {
            load,
            firmware_version,
        };
        self.lock().boot = Some(report);
        info!(
            version = format_args!("{firmware_version:#010x}"),
            modules = load.modules,
            "Firmware booted"
        );
        Ok(report)
    }

    pub fn is_booted(&self) -> bool {
        self.lock().boot.is_some()
    }

    pub fn boot_report(&self) -> Option<BootReport> {
        self.lock().boot
    }

    /// Open a processor context
    ///
    /// A global open returns the existing global context when there is
    /// one, bumping its reference count.
    pub fn open_processor(&self, is_global: bool) -> Result<Arc<ProcessorContext>> {
        let mut state = self.lock();
        if state.boot.is_none() {
            return Err(DspError::invalid("firmware has not been booted"));
        }

        if is_global {
            if let Some(index) = state.global {
                if let Some(slot) = state.slots[index].as_mut() {
                    slot.ref_count += 1;
                    debug!(processor = index, ref_count = slot.ref_count, "Global processor shared");
                    return Ok(Arc::clone(&slot.context));
                }
            }
        }

        let index = state
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| {
                DspError::no_resources(format!(
                    "all {} processor slots are in use",
                    state.slots.len()
                ))
            })?;

        let context = Arc::new(ProcessorContext::new(
            ProcessorId(index),
            is_global,
            Arc::clone(&self.transport),
            &self.config,
        )?);
        state.slots[index] = Some(Slot {
            context: Arc::clone(&context),
            ref_count: 1,
        });
        if is_global {
            state.global = Some(index);
        }

        info!(processor = index, is_global, "Processor opened");
        Ok(context)
    }

    /// Drop one reference; the last one tears the context down
    pub fn close_processor(&self, context: &Arc<ProcessorContext>) -> Result<()> {
        let index = context.id().0;
        let released = {
            let mut state = self.lock();
            let slot = state
                .slots
                .get_mut(index)
                .and_then(Option::as_mut)
                .filter(|slot| Arc::ptr_eq(&slot.context, context))
                .ok_or_else(|| DspError::not_found("processor", context.id()))?;

            slot.ref_count -= 1;
            if slot.ref_count > 0 {
                debug!(processor = index, ref_count = slot.ref_count, "Processor still referenced");
                return Ok(());
            }
            if state.global == Some(index) {
                state.global = None;
            }
            state.slots[index].take()
        };

        // firmware round trips run outside the pool lock
        match released {
            Some(slot) => {
                info!(processor = index, "Closing processor");
                slot.context.close()
            }
            None => Ok(()),
        }
    }

    /// Contexts currently open
    pub fn open_count(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn ref_count(&self, id: ProcessorId) -> usize {
        self.lock()
            .slots
            .get(id.0)
            .and_then(Option::as_ref)
            .map_or(0, |slot| slot.ref_count)
    }
}
