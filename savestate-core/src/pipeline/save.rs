//! Save direction: the caller serializes into scratch while a worker
//! compresses whatever has been published so far.

use std::panic;
use std::thread;

use tracing::trace;
use zstd::stream::raw::{Encoder, InBuffer, Operation, OutBuffer};

use super::cursor::{CursorStatus, IdleWait, ProgressCursor};
use super::scratch::{self, ScratchReader, ScratchSink};
use crate::codec::StateCodec;
use crate::config::SnapshotConfig;
use crate::{Result, SnapshotError};

/// Result of one streamed save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SaveOutcome {
    pub compressed_len: usize,
    pub growths: usize,
}

/// Serialize `state` (exactly `size` bytes) through `scratch` into `output`.
///
/// `scratch` must be exactly `size` bytes long. On success `output` holds one
/// complete zstd frame and nothing else.
pub(crate) fn run<S: StateCodec + ?Sized>(
    state: &S,
    size: usize,
    scratch: &mut [u8],
    output: &mut Vec<u8>,
    encoder: &mut Encoder<'static>,
    config: &SnapshotConfig,
) -> Result<SaveOutcome> {
    debug_assert_eq!(scratch.len(), size);

    encoder
        .reinit()
        .map_err(|e| SnapshotError::compression(format!("Failed to reset encoder: {e}")))?;
    encoder
        .set_pledged_src_size(Some(size as u64))
        .map_err(|e| SnapshotError::compression(format!("Failed to pledge state size: {e}")))?;

    let cursor = ProgressCursor::new();
    let (writer, reader) = scratch::split(scratch, &cursor);

    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("savestate-compress".into())
            .spawn_scoped(scope, move || compress(reader, encoder, output, config))
            .map_err(|e| {
                SnapshotError::compression(format!("Failed to spawn compression worker: {e}"))
            })?;

        let mut sink = ScratchSink::new(writer);
        let serialized = state.serialize(&mut sink);
        let overflow = sink.overflow();
        let writer = sink.into_writer();

        let produced = match (serialized, overflow) {
            (Ok(()), _) if writer.filled() == size => {
                writer.close();
                Ok(())
            }
            (Ok(()), _) => {
                let written = writer.filled();
                writer.fail();
                Err(SnapshotError::Serialize(format!(
                    "state declared {size} bytes but wrote {written}"
                )))
            }
            (Err(_), Some(needed)) => {
                writer.fail();
                Err(SnapshotError::SizeLimitExceeded {
                    size: needed,
                    limit: size,
                })
            }
            (Err(e), None) => {
                writer.fail();
                Err(SnapshotError::Serialize(e.to_string()))
            }
        };

        let compressed = worker
            .join()
            .unwrap_or_else(|payload| panic::resume_unwind(payload));

        produced?;
        compressed
    })
}

fn compress(
    reader: ScratchReader<'_>,
    encoder: &mut Encoder<'static>,
    output: &mut Vec<u8>,
    config: &SnapshotConfig,
) -> Result<SaveOutcome> {
    let mut out = GrowableOutput::new(
        output,
        config.initial_compressed_size,
        config.compressed_growth_step,
    );
    let idle = IdleWait::new(config.idle_sleep());
    let mut consumed = 0;

    loop {
        let status = reader.status();
        let published = reader.published();

        if consumed < published.len() {
            out.compress(encoder, &published[consumed..])?;
            consumed = published.len();
            idle.reset();
            continue;
        }

        match status {
            CursorStatus::Open => idle.wait(),
            CursorStatus::Closed => break,
            CursorStatus::Failed => {
                return Err(SnapshotError::compression(
                    "state serialization stopped before completion",
                ))
            }
        }
    }

    let compressed_len = out.finish(encoder)?;
    Ok(SaveOutcome {
        compressed_len,
        growths: out.growths,
    })
}

/// Output region that grows by a fixed step whenever the encoder fills it.
///
/// The length only increases while compressing; the final truncation to the
/// frame length happens once the frame is complete.
struct GrowableOutput<'a> {
    buf: &'a mut Vec<u8>,
    written: usize,
    step: usize,
    growths: usize,
}

impl<'a> GrowableOutput<'a> {
    fn new(buf: &'a mut Vec<u8>, initial: usize, step: usize) -> Self {
        buf.clear();
        buf.resize(initial.max(1), 0);
        Self {
            buf,
            written: 0,
            step: step.max(1),
            growths: 0,
        }
    }

    fn ensure_space(&mut self) {
        if self.written == self.buf.len() {
            let grown = self.buf.len() + self.step;
            trace!(from = self.buf.len(), to = grown, "Growing compressed output buffer");
            self.buf.resize(grown, 0);
            self.growths += 1;
        }
    }

    fn compress(&mut self, encoder: &mut Encoder<'static>, chunk: &[u8]) -> Result<()> {
        let mut input = InBuffer::around(chunk);
        while input.pos() < chunk.len() {
            self.ensure_space();
            let mut out = OutBuffer::around_pos(&mut self.buf[..], self.written);
            encoder
                .run(&mut input, &mut out)
                .map_err(|e| SnapshotError::compression(format!("Failed to compress state: {e}")))?;
            self.written = out.pos();
        }
        Ok(())
    }

    fn finish(&mut self, encoder: &mut Encoder<'static>) -> Result<usize> {
        loop {
            self.ensure_space();
            let mut out = OutBuffer::around_pos(&mut self.buf[..], self.written);
            let remaining = encoder
                .finish(&mut out, true)
                .map_err(|e| SnapshotError::compression(format!("Failed to end frame: {e}")))?;
            self.written = out.pos();
            if remaining == 0 {
                break;
            }
        }
        self.buf.truncate(self.written);
        Ok(self.written)
    }
}
