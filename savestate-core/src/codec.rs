/*!
State codec abstraction.

The snapshot machinery never looks inside the machine state. It only needs
something that can write the whole state to a byte sink in one sequential pass
and rebuild it from a byte source. Emulator cores implement [`StateCodec`] for
their top level system object.
*/

use std::io::{self, Read, Write};

use serde::{de::DeserializeOwned, Serialize};

/// Serialize and deserialize a complete machine state.
///
/// Implementations must be deterministic about size: `serialize` writes exactly
/// [`StateCodec::serialized_size`] bytes. The streaming pipeline declares that
/// size up front and rejects states that would not fit before any work starts.
///
/// `deserialize` must leave `self` untouched when it fails.
pub trait StateCodec {
    /// Exact number of bytes `serialize` will write
    fn serialized_size(&self) -> io::Result<usize>;

    /// Write the state to `sink` in a single sequential pass
    fn serialize(&self, sink: &mut dyn Write) -> io::Result<()>;

    /// Rebuild the state from `source`
    fn deserialize(&mut self, source: &mut dyn Read) -> io::Result<()>;
}

/// Opaque state bytes, encoded as a little endian length prefix plus payload.
///
/// Useful for hosts that already have a serialized state blob, and for tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawState {
    pub bytes: Vec<u8>,
}

impl RawState {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// A state of `len` bytes holding a repeating `0, 1, .., 250` pattern.
    pub fn pattern(len: usize) -> Self {
        Self::new((0..len).map(|i| (i % 251) as u8).collect())
    }
}

impl StateCodec for RawState {
    fn serialized_size(&self) -> io::Result<usize> {
        Ok(8 + self.bytes.len())
    }

    fn serialize(&self, sink: &mut dyn Write) -> io::Result<()> {
        sink.write_all(&(self.bytes.len() as u64).to_le_bytes())?;
        sink.write_all(&self.bytes)
    }

    fn deserialize(&mut self, source: &mut dyn Read) -> io::Result<()> {
        let mut len = [0u8; 8];
        source.read_exact(&mut len)?;
        let len = usize::try_from(u64::from_le_bytes(len))
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "state length overflow"))?;

        // grow with the data instead of trusting the prefix for the allocation
        let mut bytes = Vec::new();
        let read = source.take(len as u64).read_to_end(&mut bytes)?;
        if read != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("state truncated: {read} of {len} bytes"),
            ));
        }
        self.bytes = bytes;
        Ok(())
    }
}

/// Adapter giving any serde type a JSON encoded state.
///
/// The size is measured with a counting pass over the serializer, so the value
/// is serialized twice per save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonState<T> {
    pub value: T,
}

impl<T> JsonState<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Serialize + DeserializeOwned> StateCodec for JsonState<T> {
    fn serialized_size(&self) -> io::Result<usize> {
        let mut counter = ByteCounter::default();
        serde_json::to_writer(&mut counter, &self.value)?;
        Ok(counter.count())
    }

    fn serialize(&self, sink: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(sink, &self.value)?;
        Ok(())
    }

    fn deserialize(&mut self, source: &mut dyn Read) -> io::Result<()> {
        self.value = serde_json::from_reader(source)?;
        Ok(())
    }
}

/// Writer that discards data and counts the bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteCounter {
    count: usize,
}

impl ByteCounter {
    pub fn count(&self) -> usize {
        self.count
    }
}

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.count += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer appending to a `Vec` but refusing to grow past `limit` bytes.
///
/// Writes that would cross the limit fail without writing anything and set
/// [`BoundedWriter::overflowed`].
#[derive(Debug)]
pub struct BoundedWriter<'a> {
    buf: &'a mut Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl<'a> BoundedWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>, limit: usize) -> Self {
        Self {
            buf,
            limit,
            overflowed: false,
        }
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }
}

impl Write for BoundedWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() + data.len() > self.limit {
            self.overflowed = true;
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("state exceeds {} bytes", self.limit),
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
