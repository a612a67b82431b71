//! DSP stack configuration
//!
//! Values come from (lowest to highest precedence): built-in defaults, an
//! optional TOML file, and `SOC_AUDIO_*` environment variables, e.g.
//! `SOC_AUDIO_IPC__REPLY_TIMEOUT_MS=2000`.

use crate::error::{DspError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Hard ceiling on processor contexts; the pool never grows past this
pub const MAX_PROCESSORS: usize = 4;

/// Hard ceiling on inputs attached to one processor
pub const MAX_INPUTS: usize = 8;

/// Hard ceiling on outputs attached to one processor
pub const MAX_OUTPUTS: usize = 4;

/// Stage slots available in one pipeline
pub const MAX_STAGES: usize = 32;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DspConfig {
    #[serde(default)]
    pub ipc: IpcSettings,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IpcSettings {
    /// How long a blocking request waits for its reply
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// Extra attempts for `FLUSH_PIPE` after a firmware error
    #[serde(default = "default_flush_retries")]
    pub flush_retries: u32,

    #[serde(default = "default_flush_retry_delay_ms")]
    pub flush_retry_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PoolSettings {
    #[serde(default = "default_max_processors")]
    pub max_processors: usize,

    #[serde(default = "default_max_inputs")]
    pub max_inputs: usize,

    #[serde(default = "default_max_outputs")]
    pub max_outputs: usize,
}

/// Stage-enable switches for the main pipeline layout
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineSettings {
    /// Insert a sample-rate converter behind every input stage
    #[serde(default = "default_true")]
    pub input_src: bool,

    /// Insert a downmix stage in front of every output stage
    #[serde(default = "default_true")]
    pub output_downmix: bool,

    /// Rate the mixer runs at
    #[serde(default = "default_mix_rate")]
    pub mix_sample_rate: u32,
}

impl DspConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        if let Some(path) = path {
            settings = settings.add_source(config::File::from(path).required(true));
        }

        settings = settings.add_source(
            config::Environment::with_prefix("SOC_AUDIO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: DspConfig = settings.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            reply_timeout_ms = config.ipc.reply_timeout_ms,
            max_processors = config.pool.max_processors,
            "Loaded DSP configuration"
        );
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.ipc.reply_timeout_ms == 0 {
            return Err(DspError::Config("ipc.reply_timeout_ms must be > 0".into()));
        }

        let pool = &self.pool;
        if pool.max_processors == 0 || pool.max_processors > MAX_PROCESSORS {
            return Err(DspError::Config(format!(
                "pool.max_processors must be within 1..={MAX_PROCESSORS}"
            )));
        }
        if pool.max_inputs == 0 || pool.max_inputs > MAX_INPUTS {
            return Err(DspError::Config(format!(
                "pool.max_inputs must be within 1..={MAX_INPUTS}"
            )));
        }
        if pool.max_outputs == 0 || pool.max_outputs > MAX_OUTPUTS {
            return Err(DspError::Config(format!(
                "pool.max_outputs must be within 1..={MAX_OUTPUTS}"
            )));
        }

        if self.main_stage_count() > MAX_STAGES {
            return Err(DspError::Config(format!(
                "main pipeline needs {} stages, capacity is {MAX_STAGES}",
                self.main_stage_count()
            )));
        }

        if !(8_000..=192_000).contains(&self.pipeline.mix_sample_rate) {
            return Err(DspError::Config(format!(
                "pipeline.mix_sample_rate {} out of range",
                self.pipeline.mix_sample_rate
            )));
        }

        Ok(())
    }

    /// Number of stage slots the main pipeline layout occupies
    pub fn main_stage_count(&self) -> usize {
        let per_input = if self.pipeline.input_src { 2 } else { 1 };
        let per_output = if self.pipeline.output_downmix { 2 } else { 1 };

        // inputs, mixer, interleaver, outputs
        self.pool.max_inputs * per_input + 2 + self.pool.max_outputs * per_output
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.ipc.reply_timeout_ms)
    }

    pub fn flush_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ipc.flush_retry_delay_ms)
    }
}

// Default values
fn default_reply_timeout_ms() -> u64 {
    5_000
}

fn default_flush_retries() -> u32 {
    5
}

fn default_flush_retry_delay_ms() -> u64 {
    2
}

fn default_max_processors() -> usize {
    2
}

fn default_max_inputs() -> usize {
    4
}

fn default_max_outputs() -> usize {
    4
}

fn default_mix_rate() -> u32 {
    48_000
}

fn default_true() -> bool {
    true
}

impl Default for IpcSettings {
    fn default() -> Self {
        Self {
            reply_timeout_ms: default_reply_timeout_ms(),
            flush_retries: default_flush_retries(),
            flush_retry_delay_ms: default_flush_retry_delay_ms(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_processors: default_max_processors(),
            max_inputs: default_max_inputs(),
            max_outputs: default_max_outputs(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            input_src: default_true(),
            output_downmix: default_true(),
            mix_sample_rate: default_mix_rate(),
        }
    }
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            ipc: IpcSettings::default(),
            pool: PoolSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}
