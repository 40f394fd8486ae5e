/*!
Streaming snapshot pipeline.

Saves and loads states to and from caller-provided memory while overlapping
serialization with compression. Each operation uses exactly two threads: the
caller, which runs the [`StateCodec`], and one scoped worker, which runs the
zstd stream. The two sides share a scratch region and talk only through an
atomic progress cursor.

Buffers and zstd contexts are allocated once per pipeline and reused; a second
operation started while one is running fails with
[`SnapshotError::OperationInProgress`] instead of waiting.

The produced bytes are a bare zstd frame that records the state size, with no
container header. Slot files written by [`crate::SnapshotEngine`] use the same
frame format after their header.
*/

mod cursor;
mod load;
mod save;
mod scratch;

use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info};
use zstd::stream::raw::{CParameter, Decoder, Encoder};

use crate::codec::StateCodec;
use crate::config::SnapshotConfig;
#[cfg(feature = "metrics")]
use crate::observability::{MetricsTimer, SnapshotMetrics, OP_STREAM_LOAD, OP_STREAM_SAVE};
use crate::{Result, SnapshotError};

use load::frame_content_size;

/// Buffers and codec contexts reused across operations.
struct PipelineBuffers {
    /// Uncompressed state region. Grows on demand, never shrinks.
    scratch: Vec<u8>,
    /// Output of the last completed save, exactly one frame long.
    compressed: Vec<u8>,
    /// Set while `compressed` holds a frame that `finish_save` may hand out.
    pending_save: bool,
    encoder: Encoder<'static>,
    decoder: Decoder<'static>,
}

impl PipelineBuffers {
    fn reserve_scratch(&mut self, needed: usize) {
        if self.scratch.len() < needed {
            debug!(
                from = self.scratch.len(),
                to = needed,
                "Growing pipeline scratch region"
            );
            self.scratch.resize(needed, 0);
        }
    }
}

/// Two-thread streaming save/load of emulator state.
///
/// # Example
/// ```rust
/// use savestate_core::{RawState, SnapshotConfig, StreamingPipeline};
///
/// let pipeline = StreamingPipeline::new(SnapshotConfig::compact())?;
/// let state = RawState::pattern(256 * 1024);
///
/// let mut buffer = vec![0u8; 512 * 1024];
/// let len = pipeline.save_to_buffer(&state, &mut buffer)?;
///
/// let mut restored = RawState::default();
/// pipeline.load_from_buffer(&mut restored, &buffer[..len])?;
/// assert_eq!(restored, state);
/// # Ok::<(), savestate_core::SnapshotError>(())
/// ```
pub struct StreamingPipeline {
    config: SnapshotConfig,
    buffers: Mutex<PipelineBuffers>,
}

impl StreamingPipeline {
    /// Create a pipeline, allocating its scratch region and zstd contexts
    ///
    /// # Errors
    /// * `SnapshotError::Validation` - If the configuration is inconsistent
    /// * `SnapshotError::Compression` - If the zstd contexts cannot be set up
    pub fn new(config: SnapshotConfig) -> Result<Self> {
        config.validate()?;

        let mut encoder = Encoder::new(config.stream_level).map_err(|e| {
            SnapshotError::compression(format!("Failed to create stream encoder: {e}"))
        })?;
        if config.compression_workers > 0 {
            encoder
                .set_parameter(CParameter::NbWorkers(config.compression_workers))
                .map_err(|e| {
                    SnapshotError::compression(format!(
                        "Failed to enable {} compression workers: {e}",
                        config.compression_workers
                    ))
                })?;
        }
        let decoder = Decoder::new().map_err(|e| {
            SnapshotError::decompression(format!("Failed to create stream decoder: {e}"))
        })?;

        let buffers = PipelineBuffers {
            scratch: vec![0; config.initial_scratch_size],
            compressed: Vec::with_capacity(config.initial_compressed_size),
            pending_save: false,
            encoder,
            decoder,
        };

        debug!(
            scratch = config.initial_scratch_size,
            workers = config.compression_workers,
            level = config.stream_level,
            "Streaming pipeline ready"
        );

        Ok(Self {
            config,
            buffers: Mutex::new(buffers),
        })
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Current size of the scratch region
    pub fn scratch_capacity(&self) -> Result<usize> {
        let buffers = self.lock()?;
        Ok(buffers.scratch.len())
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, PipelineBuffers>> {
        self.buffers
            .try_lock()
            .ok_or(SnapshotError::OperationInProgress)
    }

    /// Serialize and compress `state`, retaining the result for
    /// [`StreamingPipeline::finish_save`]
    ///
    /// # Returns
    /// The exact compressed length
    ///
    /// # Errors
    /// * `SnapshotError::SizeLimitExceeded` - If the state is larger than
    ///   `max_state_size` (checked before any worker starts) or writes more than
    ///   it declared
    /// * `SnapshotError::Serialize` - If the codec fails
    /// * `SnapshotError::Compression` - If the zstd stream fails
    /// * `SnapshotError::OperationInProgress` - If another operation is running
    pub fn start_save<S: StateCodec + ?Sized>(&self, state: &S) -> Result<usize> {
        let mut buffers = self.lock()?;

        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start(OP_STREAM_SAVE);

        let result = self.save_locked(&mut buffers, state);

        #[cfg(feature = "metrics")]
        timer.finish_with(&result);

        result
    }

    fn save_locked<S: StateCodec + ?Sized>(
        &self,
        buffers: &mut PipelineBuffers,
        state: &S,
    ) -> Result<usize> {
        buffers.pending_save = false;

        let size = state
            .serialized_size()
            .map_err(|e| SnapshotError::Serialize(format!("Failed to size state: {e}")))?;
        if size > self.config.max_state_size {
            return Err(SnapshotError::SizeLimitExceeded {
                size,
                limit: self.config.max_state_size,
            });
        }
        buffers.reserve_scratch(size);

        let started = Instant::now();
        let PipelineBuffers {
            scratch,
            compressed,
            encoder,
            ..
        } = &mut *buffers;
        let outcome = save::run(
            state,
            size,
            &mut scratch[..size],
            compressed,
            encoder,
            &self.config,
        )?;
        buffers.pending_save = true;

        #[cfg(feature = "metrics")]
        {
            let metrics = SnapshotMetrics::global();
            metrics.record_sizes(size, outcome.compressed_len);
            metrics.record_buffer_growths(outcome.growths);
        }

        info!(
            state_bytes = size,
            compressed_bytes = outcome.compressed_len,
            output_growths = outcome.growths,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Streamed state save"
        );
        Ok(outcome.compressed_len)
    }

    /// Copy the frame retained by the last [`StreamingPipeline::start_save`]
    /// into `destination`
    ///
    /// # Returns
    /// The number of bytes written
    ///
    /// # Errors
    /// * `SnapshotError::SizeLimitExceeded` - If `destination` is too small;
    ///   the retained frame stays available for another attempt
    /// * `SnapshotError::Validation` - If no completed save is pending
    pub fn finish_save(&self, destination: &mut [u8]) -> Result<usize> {
        let buffers = self.lock()?;
        copy_retained(&buffers, destination)
    }

    /// Compress `state` straight into `destination`
    ///
    /// # Returns
    /// The compressed length
    pub fn save_to_buffer<S: StateCodec + ?Sized>(
        &self,
        state: &S,
        destination: &mut [u8],
    ) -> Result<usize> {
        let mut buffers = self.lock()?;

        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start(OP_STREAM_SAVE);

        let result = self
            .save_locked(&mut buffers, state)
            .and_then(|_| copy_retained(&buffers, destination));

        #[cfg(feature = "metrics")]
        timer.finish_with(&result);

        result
    }

    /// Compress `state` into a freshly allocated vector
    pub fn save_to_vec<S: StateCodec + ?Sized>(&self, state: &S) -> Result<Vec<u8>> {
        let mut buffers = self.lock()?;

        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start(OP_STREAM_SAVE);

        let result = self.save_locked(&mut buffers, state).map(|_| {
            buffers.pending_save = false;
            buffers.compressed.clone()
        });

        #[cfg(feature = "metrics")]
        timer.finish_with(&result);

        result
    }

    /// Decompress `source` and rebuild `state` from it
    ///
    /// The scratch region is sized from the frame's recorded content size when
    /// present, otherwise from `max_state_size`.
    ///
    /// # Errors
    /// * `SnapshotError::SizeLimitExceeded` - If the recorded size exceeds
    ///   `max_state_size` (checked before any worker starts)
    /// * `SnapshotError::Decompression` - If `source` is not a valid frame
    /// * `SnapshotError::CorruptState` - If the codec cannot rebuild the state
    /// * `SnapshotError::OperationInProgress` - If another operation is running
    pub fn load_from_buffer<S: StateCodec + ?Sized>(
        &self,
        state: &mut S,
        source: &[u8],
    ) -> Result<()> {
        let mut buffers = self.lock()?;

        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start(OP_STREAM_LOAD);

        let result = self.load_locked(&mut buffers, state, source);

        #[cfg(feature = "metrics")]
        timer.finish_with(&result);

        result
    }

    fn load_locked<S: StateCodec + ?Sized>(
        &self,
        buffers: &mut PipelineBuffers,
        state: &mut S,
        source: &[u8],
    ) -> Result<()> {
        let limit = self.config.max_state_size;
        let needed = match frame_content_size(source)? {
            Some(size) if size > limit as u64 => {
                return Err(SnapshotError::SizeLimitExceeded {
                    size: usize::try_from(size).unwrap_or(usize::MAX),
                    limit,
                })
            }
            Some(size) => size as usize,
            None => limit,
        };
        buffers.reserve_scratch(needed);

        let started = Instant::now();
        let PipelineBuffers {
            scratch, decoder, ..
        } = &mut *buffers;
        let decompressed = load::run(state, source, &mut scratch[..needed], decoder, &self.config)?;

        info!(
            compressed_bytes = source.len(),
            state_bytes = decompressed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Streamed state load"
        );
        Ok(())
    }
}

fn copy_retained(buffers: &PipelineBuffers, destination: &mut [u8]) -> Result<usize> {
    if !buffers.pending_save {
        return Err(SnapshotError::validation("No completed save to copy out"));
    }
    let frame = &buffers.compressed;
    if destination.len() < frame.len() {
        return Err(SnapshotError::SizeLimitExceeded {
            size: frame.len(),
            limit: destination.len(),
        });
    }
    destination[..frame.len()].copy_from_slice(frame);
    Ok(frame.len())
}
