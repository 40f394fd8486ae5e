//! Configuration for snapshot storage and the streaming pipeline
//!
//! [`SnapshotConfig`] carries the states directory used for slot files, the
//! size limits of the scratch and output buffers, and the tuning knobs of the
//! streaming compressor. It can be built in code, read from a JSON file, or
//! overlaid from the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::slot::DEFAULT_SLOT_COUNT;
use crate::{Result, SnapshotError};

const ONE_MIB: usize = 1024 * 1024;

/// Uncompressed states are never expected to exceed this size.
pub const DEFAULT_MAX_STATE_SIZE: usize = 300 * ONE_MIB;
/// Compressed states are usually a bit under this size.
pub const DEFAULT_INITIAL_COMPRESSED_SIZE: usize = 32 * ONE_MIB;
pub const DEFAULT_INITIAL_SCRATCH_SIZE: usize = 32 * ONE_MIB;
pub const DEFAULT_GROWTH_STEP: usize = 4 * ONE_MIB;
pub const DEFAULT_LOAD_FIRST_WINDOW: usize = ONE_MIB;
pub const DEFAULT_LOAD_WINDOW_STEP: usize = 4 * ONE_MIB;

/// Environment variable overriding [`SnapshotConfig::states_dir`].
pub const ENV_STATES_DIR: &str = "SAVESTATE_DIR";
/// Environment variable overriding [`SnapshotConfig::max_state_size`], in MiB.
pub const ENV_MAX_STATE_MB: &str = "SAVESTATE_MAX_STATE_MB";

/// Configuration for the snapshot engine and the streaming pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Directory holding slot files
    pub states_dir: PathBuf,
    /// Number of slots per program and movie
    pub slot_count: u32,
    /// Hard limit on the uncompressed state size
    pub max_state_size: usize,
    /// Scratch bytes reserved when the pipeline is created
    pub initial_scratch_size: usize,
    /// Starting size of the compressed output buffer
    pub initial_compressed_size: usize,
    /// Growth increment of the compressed output buffer
    pub compressed_growth_step: usize,
    /// Compressed bytes handed to the decompressor in its first step
    pub load_first_window: usize,
    /// Widening of the decompressor input window per step
    pub load_window_step: usize,
    /// zstd level of the streaming pipeline
    pub stream_level: i32,
    /// zstd level of slot files
    pub slot_level: i32,
    /// zstd worker threads of the streaming compressor, 0 to compress inline
    pub compression_workers: u32,
    /// Sleep between polls once spinning has not made progress
    pub idle_sleep_micros: u64,
}

impl SnapshotConfig {
    /// Default configuration storing slots under `./states`
    pub fn default_local() -> Self {
        SnapshotConfig {
            states_dir: PathBuf::from("states"),
            slot_count: DEFAULT_SLOT_COUNT,
            max_state_size: DEFAULT_MAX_STATE_SIZE,
            initial_scratch_size: DEFAULT_INITIAL_SCRATCH_SIZE,
            initial_compressed_size: DEFAULT_INITIAL_COMPRESSED_SIZE,
            compressed_growth_step: DEFAULT_GROWTH_STEP,
            load_first_window: DEFAULT_LOAD_FIRST_WINDOW,
            load_window_step: DEFAULT_LOAD_WINDOW_STEP,
            stream_level: 1,
            slot_level: zstd::DEFAULT_COMPRESSION_LEVEL,
            compression_workers: (num_cpus::get() / 2) as u32,
            idle_sleep_micros: 20,
        }
    }

    /// Default configuration storing slots under `states_dir`
    pub fn with_states_dir<P: AsRef<Path>>(states_dir: P) -> Self {
        SnapshotConfig {
            states_dir: states_dir.as_ref().to_path_buf(),
            ..Self::default_local()
        }
    }

    /// Small buffers for tests and tools that handle tiny states
    pub fn compact() -> Self {
        SnapshotConfig {
            max_state_size: 64 * ONE_MIB,
            initial_scratch_size: ONE_MIB,
            initial_compressed_size: 64 * 1024,
            compressed_growth_step: 64 * 1024,
            load_first_window: 16 * 1024,
            load_window_step: 64 * 1024,
            ..Self::default_local()
        }
    }

    pub fn with_max_state_size(mut self, max_state_size: usize) -> Self {
        self.max_state_size = max_state_size;
        self.initial_scratch_size = self.initial_scratch_size.min(max_state_size);
        self
    }

    /// Read a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let config: SnapshotConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `SAVESTATE_DIR` and `SAVESTATE_MAX_STATE_MB` from the environment
    pub fn from_env(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var(ENV_STATES_DIR) {
            self.states_dir = PathBuf::from(dir);
        }
        if let Ok(mb) = std::env::var(ENV_MAX_STATE_MB) {
            let mb: usize = mb.trim().parse().map_err(|_| {
                SnapshotError::validation(format!("{ENV_MAX_STATE_MB} must be a number, got '{mb}'"))
            })?;
            self = self.with_max_state_size(mb.saturating_mul(ONE_MIB));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_micros(self.idle_sleep_micros)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 || self.slot_count > 99 {
            return Err(SnapshotError::validation(
                "slot_count must be between 1 and 99",
            ));
        }
        if self.max_state_size == 0 {
            return Err(SnapshotError::validation("max_state_size must be positive"));
        }
        if self.initial_scratch_size > self.max_state_size {
            return Err(SnapshotError::validation(
                "initial_scratch_size cannot exceed max_state_size",
            ));
        }
        if self.initial_compressed_size == 0 || self.compressed_growth_step == 0 {
            return Err(SnapshotError::validation(
                "compressed buffer sizes must be positive",
            ));
        }
        if self.load_first_window == 0 || self.load_window_step == 0 {
            return Err(SnapshotError::validation(
                "load window sizes must be positive",
            ));
        }
        let levels = zstd::compression_level_range();
        for (name, level) in [("stream_level", self.stream_level), ("slot_level", self.slot_level)] {
            if !levels.contains(&level) {
                return Err(SnapshotError::validation(format!(
                    "{name} {level} is outside the zstd range {}..={}",
                    levels.start(),
                    levels.end()
                )));
            }
        }
        Ok(())
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self::default_local()
    }
}
