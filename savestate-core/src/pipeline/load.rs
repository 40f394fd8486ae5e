//! Load direction: a worker decompresses into scratch while the caller
//! deserializes from the published prefix.

use std::panic;
use std::thread;

use tracing::trace;
use zstd::stream::raw::{Decoder, InBuffer, Operation, OutBuffer};

use super::cursor::{IdleWait, ProgressCursor};
use super::scratch::{self, ScratchSource, ScratchWriter};
use crate::codec::StateCodec;
use crate::config::SnapshotConfig;
use crate::{Result, SnapshotError};

/// Declared decompressed size of the frame at the start of `source`.
///
/// `Ok(None)` when the frame does not record it.
pub(crate) fn frame_content_size(source: &[u8]) -> Result<Option<u64>> {
    zstd::zstd_safe::get_frame_content_size(source)
        .map_err(|_| SnapshotError::decompression("Compressed state is not a zstd frame"))
}

/// Decompress `source` through `scratch` into `state`.
///
/// A failure of the decompression worker takes precedence over whatever the
/// codec reported, since a codec fed a broken stream fails for that reason.
pub(crate) fn run<S: StateCodec + ?Sized>(
    state: &mut S,
    source: &[u8],
    scratch: &mut [u8],
    decoder: &mut Decoder<'static>,
    config: &SnapshotConfig,
) -> Result<usize> {
    decoder
        .reinit()
        .map_err(|e| SnapshotError::decompression(format!("Failed to reset decoder: {e}")))?;

    let cursor = ProgressCursor::new();
    let (writer, reader) = scratch::split(scratch, &cursor);

    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("savestate-decompress".into())
            .spawn_scoped(scope, move || decompress(writer, source, decoder, config))
            .map_err(|e| {
                SnapshotError::decompression(format!("Failed to spawn decompression worker: {e}"))
            })?;

        let mut input = ScratchSource::new(reader, IdleWait::new(config.idle_sleep()));
        let restored = state.deserialize(&mut input);
        let consumed = input.position();

        let decompressed = worker
            .join()
            .unwrap_or_else(|payload| panic::resume_unwind(payload))?;

        restored.map_err(|e| SnapshotError::corrupt_state(e.to_string()))?;
        trace!(decompressed, consumed, "Streamed state consumed");
        Ok(decompressed)
    })
}

fn decompress(
    mut writer: ScratchWriter<'_>,
    source: &[u8],
    decoder: &mut Decoder<'static>,
    config: &SnapshotConfig,
) -> Result<usize> {
    match feed(&mut writer, source, decoder, config) {
        Ok(()) => Ok(writer.close()),
        Err(e) => {
            writer.fail();
            Err(e)
        }
    }
}

/// Run the decoder over a window of `source` that starts small and widens by
/// a fixed step every iteration, so the first bytes reach the consumer early.
fn feed(
    writer: &mut ScratchWriter<'_>,
    source: &[u8],
    decoder: &mut Decoder<'static>,
    config: &SnapshotConfig,
) -> Result<()> {
    let mut consumed = 0;
    let mut window_end = config.load_first_window.max(1).min(source.len());

    loop {
        let (hint, used, produced, room) = {
            let spare = writer.spare();
            let room = spare.len();
            let mut out = OutBuffer::around(spare);
            let mut input = InBuffer::around(&source[consumed..window_end]);

            let hint = decoder.run(&mut input, &mut out).map_err(|e| {
                SnapshotError::decompression(format!("Failed to decompress state: {e}"))
            })?;
            (hint, input.pos(), out.pos(), room)
        };

        consumed += used;
        writer.commit(produced);

        if consumed == source.len() && hint == 0 {
            return Ok(());
        }

        if used == 0 && produced == 0 && window_end == source.len() {
            if room == 0 {
                // at least one byte more than the region holds
                return Err(SnapshotError::SizeLimitExceeded {
                    size: writer.capacity() + 1,
                    limit: writer.capacity(),
                });
            }
            return Err(SnapshotError::decompression(format!(
                "Compressed state ends early after {} of {} bytes",
                consumed,
                source.len()
            )));
        }

        window_end = (window_end + config.load_window_step.max(1)).min(source.len());
    }
}
