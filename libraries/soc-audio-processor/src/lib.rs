//! SoC Audio Processor
//!
//! Audio-processing instances running on the DSP coprocessor.
//!
//! ```text
//!  ProcessorPool ──boot──► FirmwareLoader + FW_INIT_COMPLETE
//!       │
//!       └─open──► ProcessorContext (one lock, one request in flight)
//!                    ├─ inputs ──► [decode / capture pipeline]
//!                    ├─ main pipeline: inputs ─► mixer ─► interleaver ─► outputs
//!                    └─ IpcEndpoint ──► IpcTransport ──► mailbox
//! ```
//!
//! - **Stages**: typed parameters per processing step, codec parameters
//!   behind cargo features
//! - **Pipelines**: fixed-capacity stage arrays, connection and the
//!   firmware round trips that allocate, configure, start, stop, flush and
//!   free them
//! - **Gain engine**: per-input mix tables in tenths of a decibel
//! - **Workloads**: the input state machine and output bookkeeping
//!
//! # Example
//!
//! ```rust
//! use soc_audio_processor::{compute_mix_config, GAIN_0_DB, GAIN_MUTE};
//!
//! let stereo = compute_mix_config(GAIN_0_DB, 2, 2);
//! assert_eq!(stereo.gain(0, 0), GAIN_0_DB);
//! assert_eq!(stereo.gain(0, 1), GAIN_MUTE);
//! ```

#![forbid(unsafe_code)]

mod context;
pub mod mix;
pub mod pipeline;
mod pool;
pub mod stage;
mod workload;

pub use context::{ProcessorContext, ProcessorId, StreamInfo};
pub use mix::{
    compute_mix_config, gain_index, MixConfig, GAIN_0_DB, GAIN_MAX, GAIN_MUTE, HALF_GAIN_OFFSET,
};
pub use pipeline::{FlushPolicy, Pipeline, PipelineStatus};
pub use pool::{BootReport, ProcessorPool};
pub use stage::{DecoderConfig, StageBehavior, StageKind, StageParams};
pub use workload::{InputId, InputKind, InputWorkload, OutputId, OutputWorkload, StreamState};
