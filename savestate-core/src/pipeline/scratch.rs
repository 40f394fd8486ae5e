//! Scratch region split between one writer and one reader.
//!
//! The writer owns everything at or above the published position; the reader
//! may look at everything below it. Published bytes are never written again,
//! so the two halves never touch the same byte concurrently.

use std::io::{self, Read, Write};
use std::marker::PhantomData;
use std::ptr::NonNull;

use super::cursor::{CursorStatus, IdleWait, ProgressCursor};

/// Split `buf` into its writing and reading halves, synchronized by `cursor`.
///
/// `cursor` must be fresh: position zero and open.
pub(crate) fn split<'a>(
    buf: &'a mut [u8],
    cursor: &'a ProgressCursor,
) -> (ScratchWriter<'a>, ScratchReader<'a>) {
    debug_assert_eq!(cursor.position(), 0);
    let len = buf.len();
    let ptr = NonNull::new(buf.as_mut_ptr()).unwrap_or(NonNull::dangling());
    (
        ScratchWriter {
            ptr,
            len,
            filled: 0,
            finished: false,
            cursor,
            _buf: PhantomData,
        },
        ScratchReader {
            ptr,
            cursor,
            _buf: PhantomData,
        },
    )
}

/// Writing half: fills the region front to back and publishes progress.
///
/// Dropping a writer that was neither closed nor failed, for instance while
/// unwinding out of a panicking codec, fails the cursor.
pub(crate) struct ScratchWriter<'a> {
    ptr: NonNull<u8>,
    len: usize,
    filled: usize,
    finished: bool,
    cursor: &'a ProgressCursor,
    _buf: PhantomData<&'a mut [u8]>,
}

// SAFETY: the writer only touches bytes at or above `filled`, which the reader
// never sees until they are published.
unsafe impl Send for ScratchWriter<'_> {}

impl<'a> ScratchWriter<'a> {
    pub(crate) fn capacity(&self) -> usize {
        self.len
    }

    pub(crate) fn filled(&self) -> usize {
        self.filled
    }

    /// Unpublished tail of the region.
    pub(crate) fn spare(&mut self) -> &mut [u8] {
        // SAFETY: `filled <= len`, and the range `filled..len` is exclusively
        // owned by the writer until `commit` publishes it.
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(self.filled), self.len - self.filled)
        }
    }

    /// Publish the first `n` bytes of [`ScratchWriter::spare`].
    pub(crate) fn commit(&mut self, n: usize) {
        assert!(n <= self.len - self.filled, "commit past end of scratch region");
        self.filled += n;
        self.cursor.publish(self.filled);
    }

    /// Copy `data` in and publish it. Fails without writing if it does not fit.
    pub(crate) fn append(&mut self, data: &[u8]) -> bool {
        let spare = self.spare();
        if data.len() > spare.len() {
            return false;
        }
        spare[..data.len()].copy_from_slice(data);
        self.commit(data.len());
        true
    }

    /// Mark the data complete. Returns the number of bytes published.
    pub(crate) fn close(mut self) -> usize {
        self.cursor.close();
        self.finished = true;
        self.filled
    }

    /// Mark the data incomplete; the reader stops waiting for more.
    pub(crate) fn fail(mut self) {
        self.cursor.fail();
        self.finished = true;
    }
}

impl Drop for ScratchWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cursor.fail();
        }
    }
}

/// Reading half: sees the published prefix of the region.
pub(crate) struct ScratchReader<'a> {
    ptr: NonNull<u8>,
    cursor: &'a ProgressCursor,
    _buf: PhantomData<&'a [u8]>,
}

// SAFETY: the reader only hands out bytes below the published position, which
// the writer never modifies again.
unsafe impl Send for ScratchReader<'_> {}

impl<'a> ScratchReader<'a> {
    pub(crate) fn status(&self) -> CursorStatus {
        self.cursor.status()
    }

    /// All bytes published so far.
    ///
    /// Check [`ScratchReader::status`] before calling this: a `Closed` status
    /// observed first guarantees the returned prefix is complete.
    pub(crate) fn published(&self) -> &[u8] {
        let end = self.cursor.position();
        // SAFETY: `end` was published with release ordering after the bytes
        // were written and we loaded it with acquire ordering; bytes below it
        // are immutable for the rest of the borrow of the region.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), end) }
    }
}

/// [`Write`] adapter the state codec serializes into.
///
/// Every write is bounds-checked against the region; the first write that does
/// not fit is refused and recorded.
pub(crate) struct ScratchSink<'a> {
    writer: ScratchWriter<'a>,
    overflow: Option<usize>,
}

impl<'a> ScratchSink<'a> {
    pub(crate) fn new(writer: ScratchWriter<'a>) -> Self {
        Self {
            writer,
            overflow: None,
        }
    }

    /// Size the state would have needed when a write was refused.
    pub(crate) fn overflow(&self) -> Option<usize> {
        self.overflow
    }

    pub(crate) fn into_writer(self) -> ScratchWriter<'a> {
        self.writer
    }
}

impl Write for ScratchSink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.writer.append(data) {
            return Ok(data.len());
        }
        self.overflow = Some(self.writer.filled() + data.len());
        Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!(
                "state write of {} bytes at offset {} exceeds the {} byte scratch region",
                data.len(),
                self.writer.filled(),
                self.writer.capacity()
            ),
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// [`Read`] adapter the state codec deserializes from.
///
/// A read of `n` bytes waits until `n` bytes past the current position are
/// published, or until the writer closes, in which case whatever is left is
/// returned. A failed writer turns into an I/O error.
pub(crate) struct ScratchSource<'a> {
    reader: ScratchReader<'a>,
    pos: usize,
    idle: IdleWait,
}

impl<'a> ScratchSource<'a> {
    pub(crate) fn new(reader: ScratchReader<'a>, idle: IdleWait) -> Self {
        Self {
            reader,
            pos: 0,
            idle,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }
}

impl Read for ScratchSource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let status = self.reader.status();
            let available = &self.reader.published()[self.pos..];

            if available.len() >= buf.len() || status == CursorStatus::Closed {
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                self.pos += n;
                self.idle.reset();
                return Ok(n);
            }
            if status == CursorStatus::Failed {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "decompression stopped before the state was complete",
                ));
            }
            self.idle.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_writer_publishes_to_reader() {
        let mut buf = vec![0u8; 16];
        let cursor = ProgressCursor::new();
        let (mut writer, reader) = split(&mut buf, &cursor);

        assert!(reader.published().is_empty());
        assert!(writer.append(b"abcd"));
        assert_eq!(reader.published(), b"abcd");

        writer.spare()[..2].copy_from_slice(b"ef");
        writer.commit(2);
        assert_eq!(reader.published(), b"abcdef");

        assert!(!writer.append(&[0; 11]));
        assert_eq!(writer.filled(), 6);
        assert_eq!(writer.close(), 6);
        assert_eq!(reader.status(), CursorStatus::Closed);
    }

    #[test]
    fn test_sink_records_overflow() {
        let mut buf = vec![0u8; 8];
        let cursor = ProgressCursor::new();
        let (writer, reader) = split(&mut buf, &cursor);
        let mut sink = ScratchSink::new(writer);

        sink.write_all(b"123456").unwrap();
        let err = sink.write_all(b"789").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
        assert_eq!(sink.overflow(), Some(9));
        assert_eq!(reader.published(), b"123456");
    }

    #[test]
    fn test_source_waits_for_enough_bytes() {
        let mut buf = vec![0u8; 1024];
        let cursor = ProgressCursor::new();
        let (mut writer, reader) = split(&mut buf, &cursor);

        thread::scope(|scope| {
            scope.spawn(move || {
                for chunk in (0..1024u32).map(|i| [(i % 256) as u8]) {
                    assert!(writer.append(&chunk));
                }
                writer.close();
            });

            let mut source = ScratchSource::new(reader, IdleWait::new(Duration::from_micros(5)));
            let mut block = [0u8; 100];
            for round in 0..10 {
                // a full block is always delivered while the writer is still open
                assert_eq!(source.read(&mut block).unwrap(), 100);
                assert_eq!(block[0], ((round * 100) % 256) as u8);
            }
            let mut rest = Vec::new();
            source.read_to_end(&mut rest).unwrap();
            assert_eq!(rest.len(), 24);
            assert_eq!(source.position(), 1024);
        });
    }

    #[test]
    fn test_dropped_writer_fails_cursor() {
        let mut buf = vec![0u8; 8];
        let cursor = ProgressCursor::new();
        let (mut writer, reader) = split(&mut buf, &cursor);
        assert!(writer.append(b"abc"));
        drop(writer);

        assert_eq!(reader.status(), CursorStatus::Failed);
        assert_eq!(reader.published(), b"abc");
    }

    #[test]
    fn test_closed_writer_stays_closed_after_drop() {
        let mut buf = vec![0u8; 8];
        let cursor = ProgressCursor::new();
        let (writer, reader) = split(&mut buf, &cursor);
        assert_eq!(writer.close(), 0);
        assert_eq!(reader.status(), CursorStatus::Closed);
    }

    #[test]
    fn test_source_reports_failed_writer() {
        let mut buf = vec![0u8; 8];
        let cursor = ProgressCursor::new();
        let (mut writer, reader) = split(&mut buf, &cursor);
        assert!(writer.append(b"ab"));
        writer.fail();

        let mut source = ScratchSource::new(reader, IdleWait::new(Duration::from_micros(5)));
        let mut two = [0u8; 2];
        assert_eq!(source.read(&mut two).unwrap(), 2);
        assert!(source.read(&mut two).is_err());
    }
}
