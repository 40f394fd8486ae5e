/*!
Synchronous slot engine that orchestrates slot saves and loads.

This module contains the whole-buffer path: the state is serialized into
memory, compressed in one call and written behind a container header. Loading
validates the header before the payload or the state codec is touched.
*/

use tracing::{debug, info, warn};

use crate::codec::{BoundedWriter, StateCodec};
use crate::compression::{CompressionAdapter, ZstdCompressor};
use crate::config::{SnapshotConfig, DEFAULT_MAX_STATE_SIZE};
use crate::format::{validate_header, HeaderStatus, SnapshotHeader, HEADER_SIZE};
#[cfg(feature = "metrics")]
use crate::observability::{MetricsTimer, SnapshotMetrics, OP_SLOT_LOAD, OP_SLOT_SAVE};
use crate::slot::{SlotInfo, SlotKey, DEFAULT_SLOT_COUNT};
use crate::storage::{LocalFileStorage, StorageAdapter};
use crate::version::{BuildInfo, RevisionTable};
use crate::{Result, SnapshotError};

/// Result of verifying a slot without restoring it
#[derive(Debug, Clone, PartialEq)]
pub struct SlotVerification {
    pub info: SlotInfo,
    /// Size of the decompressed state in bytes
    pub state_bytes: usize,
}

/// Main engine for slot save and load operations
///
/// The engine owns the build metadata it stamps into new slots and checks old
/// slots against. Storage and compression are pluggable adapters.
///
/// # Example
/// ```rust
/// use savestate_core::{RawState, SlotKey, SnapshotEngine, LocalFileStorage, ZstdCompressor};
///
/// # let dir = tempfile::tempdir()?;
/// let engine = SnapshotEngine::new(LocalFileStorage::with_base_dir(dir.path()), ZstdCompressor::new());
/// let key = SlotKey::new(0x0004_0000_0005_5D00, 1);
///
/// let state = RawState::pattern(4096);
/// engine.save_slot(&state, &key)?;
///
/// let mut restored = RawState::default();
/// let status = engine.load_slot(&mut restored, &key)?;
/// assert!(status.is_exact());
/// assert_eq!(restored, state);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct SnapshotEngine<S, C>
where
    S: StorageAdapter,
    C: CompressionAdapter,
{
    storage: S,
    compressor: C,
    build: BuildInfo,
    revisions: RevisionTable,
    max_state_size: usize,
    slot_count: u32,
}

impl<S, C> SnapshotEngine<S, C>
where
    S: StorageAdapter,
    C: CompressionAdapter,
{
    /// Create a new engine stamping slots with the running build
    ///
    /// # Arguments
    /// * `storage` - The storage adapter slot files are written through
    /// * `compressor` - The compression adapter for slot payloads
    pub fn new(storage: S, compressor: C) -> Self {
        Self {
            storage,
            compressor,
            build: BuildInfo::current(),
            revisions: RevisionTable::new(),
            max_state_size: DEFAULT_MAX_STATE_SIZE,
            slot_count: DEFAULT_SLOT_COUNT,
        }
    }

    pub fn with_build(mut self, build: BuildInfo) -> Self {
        self.build = build;
        self
    }

    /// Names for revisions of released builds, used in mismatch reports
    pub fn with_revisions(mut self, revisions: RevisionTable) -> Self {
        self.revisions = revisions;
        self
    }

    pub fn with_max_state_size(mut self, max_state_size: usize) -> Self {
        self.max_state_size = max_state_size;
        self
    }

    pub fn with_slot_count(mut self, slot_count: u32) -> Self {
        self.slot_count = slot_count;
        self
    }

    pub fn build(&self) -> &BuildInfo {
        &self.build
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Save `state` into the slot named by `key`, replacing any previous content
    ///
    /// # Returns
    /// Information about the written slot
    ///
    /// # Errors
    /// * `SnapshotError::SlotOutOfRange` - If the slot number is not valid
    /// * `SnapshotError::SizeLimitExceeded` - If the state is larger than the limit
    /// * `SnapshotError::Serialize` - If the codec fails
    /// * `SnapshotError::Compression` - If compression fails
    /// * `SnapshotError::Storage` - If the slot file cannot be written
    pub fn save_slot<T: StateCodec + ?Sized>(&self, state: &T, key: &SlotKey) -> Result<SlotInfo> {
        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start(OP_SLOT_SAVE);

        let result = self.save_slot_inner(state, key);

        #[cfg(feature = "metrics")]
        timer.finish_with(&result);

        result
    }

    fn save_slot_inner<T: StateCodec + ?Sized>(
        &self,
        state: &T,
        key: &SlotKey,
    ) -> Result<SlotInfo> {
        key.check_range(self.slot_count)?;

        let size = state
            .serialized_size()
            .map_err(|e| SnapshotError::Serialize(format!("Failed to size state: {e}")))?;
        if size > self.max_state_size {
            return Err(SnapshotError::SizeLimitExceeded {
                size,
                limit: self.max_state_size,
            });
        }

        let mut raw = Vec::with_capacity(size);
        let mut writer = BoundedWriter::new(&mut raw, self.max_state_size);
        if let Err(e) = state.serialize(&mut writer) {
            if writer.overflowed() {
                return Err(SnapshotError::SizeLimitExceeded {
                    size: self.max_state_size + 1,
                    limit: self.max_state_size,
                });
            }
            return Err(SnapshotError::Serialize(e.to_string()));
        }

        let payload = self.compressor.compress(&raw)?;
        let header = SnapshotHeader::new(key.program_id, &self.build);
        let path = key.file_name();

        self.storage
            .save_parts(&[&header.to_bytes()[..], &payload[..]], &path)?;

        #[cfg(feature = "metrics")]
        SnapshotMetrics::global().record_sizes(raw.len(), payload.len());

        info!(
            slot = %key,
            state_bytes = raw.len(),
            compressed_bytes = payload.len(),
            algorithm = self.compressor.algorithm_name(),
            "Saved state to slot"
        );

        Ok(SlotInfo {
            key: *key,
            created_at: header.created(),
            status: HeaderStatus::Ok,
            build_name: Some(self.build.name.clone()),
            path,
            size_bytes: (HEADER_SIZE + payload.len()) as u64,
        })
    }

    /// Restore `state` from the slot named by `key`
    ///
    /// The header is validated before anything else: a corrupt or foreign
    /// slot never reaches the codec. A slot from another revision is still
    /// loaded and reported through the returned status.
    ///
    /// # Errors
    /// * `SnapshotError::Storage` - If the slot file cannot be read
    /// * `SnapshotError::Corrupt` - If the header is truncated or has a bad magic
    /// * `SnapshotError::WrongProgram` - If the slot belongs to another program
    /// * `SnapshotError::SizeLimitExceeded` - If the state is larger than the limit
    /// * `SnapshotError::CorruptState` - If the payload cannot be decompressed
    ///   or the codec cannot rebuild the state
    pub fn load_slot<T: StateCodec + ?Sized>(
        &self,
        state: &mut T,
        key: &SlotKey,
    ) -> Result<HeaderStatus> {
        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start(OP_SLOT_LOAD);

        let result = self.load_slot_inner(state, key);

        #[cfg(feature = "metrics")]
        timer.finish_with(&result);

        result
    }

    fn load_slot_inner<T: StateCodec + ?Sized>(
        &self,
        state: &mut T,
        key: &SlotKey,
    ) -> Result<HeaderStatus> {
        key.check_range(self.slot_count)?;

        let path = key.file_name();
        let data = self.storage.load(&path)?;
        let (_, status) = validate_header(&data, key.program_id, &self.build, &self.revisions)?;

        let raw = self.decompress_payload(&data[HEADER_SIZE..])?;
        state
            .deserialize(&mut &raw[..])
            .map_err(|e| SnapshotError::corrupt_state(e.to_string()))?;

        info!(
            slot = %key,
            state_bytes = raw.len(),
            exact_revision = status.is_exact(),
            "Loaded state from slot"
        );
        Ok(status)
    }

    fn decompress_payload(&self, payload: &[u8]) -> Result<Vec<u8>> {
        self.compressor
            .decompress(payload, self.max_state_size)
            .map_err(|e| match e {
                SnapshotError::Decompression(msg) => SnapshotError::CorruptState(msg),
                other => other,
            })
    }

    /// Read and validate the header of one slot
    ///
    /// # Errors
    /// * `SnapshotError::Storage` - If the slot file is missing or unreadable
    /// * `SnapshotError::Corrupt` - If the file is shorter than a header or has a bad magic
    /// * `SnapshotError::WrongProgram` - If the slot belongs to another program
    pub fn read_slot_info(&self, key: &SlotKey) -> Result<SlotInfo> {
        key.check_range(self.slot_count)?;

        let path = key.file_name();
        let size_bytes = self.storage.size(&path)?;
        if size_bytes < HEADER_SIZE as u64 {
            return Err(SnapshotError::corrupt(format!(
                "slot file is {size_bytes} bytes, shorter than the {HEADER_SIZE} byte header"
            )));
        }

        let head = self.storage.load_head(&path, HEADER_SIZE)?;
        let (header, status) =
            validate_header(&head, key.program_id, &self.build, &self.revisions)?;

        let build_name = match &status {
            HeaderStatus::Ok => header.build_name.clone().or_else(|| Some(self.build.name.clone())),
            HeaderStatus::RevisionMismatch { origin, .. } => origin.name().map(str::to_string),
        };

        Ok(SlotInfo {
            key: *key,
            created_at: header.created(),
            status,
            build_name,
            path,
            size_bytes,
        })
    }

    /// Enumerate the usable slots of a program (and movie, `0` for none)
    ///
    /// Slots that are missing, shorter than a header, unreadable, or that
    /// fail header validation are skipped and logged.
    pub fn list_slots(&self, program_id: u64, movie_id: u64) -> Vec<SlotInfo> {
        (1..=self.slot_count)
            .filter_map(|slot| {
                let key = SlotKey::new(program_id, slot).with_movie(movie_id);
                if !self.storage.exists(&key.file_name()) {
                    debug!(slot = %key, "Slot is empty");
                    return None;
                }
                match self.read_slot_info(&key) {
                    Ok(info) => Some(info),
                    Err(e) => {
                        warn!(slot = %key, error = %e, "Skipping unusable slot");
                        None
                    }
                }
            })
            .collect()
    }

    /// Validate a slot end to end without restoring it
    ///
    /// Checks the header and decompresses the whole payload.
    pub fn verify_slot(&self, key: &SlotKey) -> Result<SlotVerification> {
        let info = self.read_slot_info(key)?;
        let data = self.storage.load(&info.path)?;
        let payload = data
            .get(HEADER_SIZE..)
            .ok_or_else(|| SnapshotError::corrupt("slot file shrank while verifying"))?;
        let raw = self.decompress_payload(payload)?;

        Ok(SlotVerification {
            info,
            state_bytes: raw.len(),
        })
    }

    /// Check if the slot file exists
    pub fn slot_exists(&self, key: &SlotKey) -> bool {
        self.storage.exists(&key.file_name())
    }

    /// Delete a slot file. Deleting an empty slot succeeds.
    pub fn delete_slot(&self, key: &SlotKey) -> Result<()> {
        key.check_range(self.slot_count)?;
        self.storage.delete(&key.file_name())?;
        info!(slot = %key, "Deleted slot");
        Ok(())
    }
}

/// Create a slot engine from configuration
///
/// Creates an engine with:
/// - Local file storage rooted at `config.states_dir`
/// - Zstd compression at `config.slot_level`
///
/// # Example
/// ```rust
/// use savestate_core::{create_default_engine, SnapshotConfig};
///
/// let engine = create_default_engine(&SnapshotConfig::default_local())?;
/// assert_eq!(engine.slot_count(), 10);
/// # Ok::<(), savestate_core::SnapshotError>(())
/// ```
pub fn create_default_engine(
    config: &SnapshotConfig,
) -> Result<SnapshotEngine<LocalFileStorage, ZstdCompressor>> {
    config.validate()?;

    Ok(SnapshotEngine::new(
        LocalFileStorage::with_base_dir(&config.states_dir),
        ZstdCompressor::with_level(config.slot_level),
    )
    .with_max_state_size(config.max_state_size)
    .with_slot_count(config.slot_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawState;
    use crate::compression::NoCompression;
    use crate::format::build_header;
    use crate::storage::MemoryStorage;
    use crate::version::{BuildOrigin, Revision, REVISION_LEN};
    use std::cell::Cell;
    use std::io::{self, Read, Write};

    const PROGRAM: u64 = 0x0004_0000_0005_5D00;

    fn build(rev_byte: u8, name: &str) -> BuildInfo {
        BuildInfo::new(Revision::from_bytes([rev_byte; REVISION_LEN]), name)
    }

    fn create_test_engine() -> SnapshotEngine<MemoryStorage, ZstdCompressor> {
        SnapshotEngine::new(MemoryStorage::new(), ZstdCompressor::new()).with_build(build(1, "Build 1"))
    }

    /// Codec recording whether it was asked to deserialize.
    #[derive(Default)]
    struct WatchedState {
        inner: RawState,
        deserialize_calls: Cell<usize>,
    }

    impl StateCodec for WatchedState {
        fn serialized_size(&self) -> io::Result<usize> {
            self.inner.serialized_size()
        }

        fn serialize(&self, sink: &mut dyn Write) -> io::Result<()> {
            self.inner.serialize(sink)
        }

        fn deserialize(&mut self, source: &mut dyn Read) -> io::Result<()> {
            self.deserialize_calls.set(self.deserialize_calls.get() + 1);
            self.inner.deserialize(source)
        }
    }

    #[test]
    fn test_slot_roundtrip() {
        let engine = create_test_engine();
        let key = SlotKey::new(PROGRAM, 3);
        let state = RawState::pattern(100_000);

        let info = engine.save_slot(&state, &key).unwrap();
        assert!(engine.slot_exists(&key));
        assert_eq!(info.path, "0004000000055D00.03.cst");
        assert_eq!(info.status, HeaderStatus::Ok);
        assert_eq!(info.build_name.as_deref(), Some("Build 1"));
        assert!(info.size_bytes < 100_000);

        let stored = engine.storage().get(&info.path).unwrap();
        assert_eq!(stored.len() as u64, info.size_bytes);
        assert_eq!(&stored[..4], b"CST\x1b");

        let mut restored = RawState::default();
        let status = engine.load_slot(&mut restored, &key).unwrap();
        assert_eq!(status, HeaderStatus::Ok);
        assert_eq!(restored, state);
    }

    #[test]
    fn test_movie_slots_are_separate() {
        let engine = create_test_engine();
        let plain = SlotKey::new(PROGRAM, 1);
        let movie = SlotKey::new(PROGRAM, 1).with_movie(0x42);

        engine.save_slot(&RawState::pattern(10), &plain).unwrap();
        assert!(engine.slot_exists(&plain));
        assert!(!engine.slot_exists(&movie));

        engine.save_slot(&RawState::pattern(20), &movie).unwrap();
        let mut restored = RawState::default();
        engine.load_slot(&mut restored, &movie).unwrap();
        assert_eq!(restored.bytes.len(), 20);
    }

    #[test]
    fn test_corrupted_magic_never_reaches_codec() {
        let engine = create_test_engine();
        let key = SlotKey::new(PROGRAM, 1);
        engine.save_slot(&RawState::pattern(1000), &key).unwrap();

        let path = key.file_name();
        let mut stored = engine.storage().get(&path).unwrap();
        stored[0] = b'X';
        engine.storage().put(&path, stored);

        let mut state = WatchedState::default();
        let err = engine.load_slot(&mut state, &key).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt(_)));
        assert_eq!(state.deserialize_calls.get(), 0);
    }

    #[test]
    fn test_foreign_program_rejected() {
        let engine = create_test_engine();
        let key = SlotKey::new(PROGRAM, 2);
        let foreign = build_header(0x1234, engine.build());
        engine.storage().put(&key.file_name(), foreign.to_vec());

        let mut state = WatchedState::default();
        let err = engine.load_slot(&mut state, &key).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::WrongProgram {
                expected: PROGRAM,
                found: 0x1234
            }
        ));
        assert_eq!(state.deserialize_calls.get(), 0);
    }

    #[test]
    fn test_revision_mismatch_still_loads() {
        let storage = MemoryStorage::new();
        let key = SlotKey::new(PROGRAM, 4);
        let state = RawState::pattern(5000);

        // an older build saves, the current one loads
        let old = SnapshotEngine::new(storage.clone(), NoCompression::new())
            .with_build(build(9, "Build 9"));
        old.save_slot(&state, &key).unwrap();

        let current = SnapshotEngine::new(storage, NoCompression::new()).with_build(build(1, "Build 1"));
        let mut restored = RawState::default();
        let status = current.load_slot(&mut restored, &key).unwrap();

        assert_eq!(
            status,
            HeaderStatus::RevisionMismatch {
                revision: Revision::from_bytes([9; REVISION_LEN]),
                origin: BuildOrigin::Embedded("Build 9".to_string()),
            }
        );
        assert_eq!(restored, state);
    }

    #[test]
    fn test_revision_table_names_old_slots() {
        let storage = MemoryStorage::new();
        let key = SlotKey::new(PROGRAM, 1);

        // slots from builds that predate the name field only carry a revision
        let mut header = SnapshotHeader::new(PROGRAM, &build(7, "ignored"));
        header.build_name = None;
        let payload = zstd::bulk::compress(&[0u8; 8], 1).unwrap();
        storage.put(&key.file_name(), [&header.to_bytes()[..], &payload[..]].concat());

        let engine = SnapshotEngine::new(storage, ZstdCompressor::new())
            .with_build(build(1, "Build 1"))
            .with_revisions(
                RevisionTable::new().with_entry(Revision::from_bytes([7; REVISION_LEN]), "1.0"),
            );

        let info = engine.read_slot_info(&key).unwrap();
        assert_eq!(info.build_name.as_deref(), Some("1.0"));
        assert!(matches!(
            info.status,
            HeaderStatus::RevisionMismatch {
                origin: BuildOrigin::Known(_),
                ..
            }
        ));
    }

    #[test]
    fn test_corrupt_payload_is_corrupt_state() {
        let engine = create_test_engine();
        let key = SlotKey::new(PROGRAM, 5);
        let header = build_header(PROGRAM, engine.build());
        engine
            .storage()
            .put(&key.file_name(), [&header[..], &b"not a zstd frame"[..]].concat());

        let mut state = WatchedState::default();
        let err = engine.load_slot(&mut state, &key).unwrap_err();
        assert!(matches!(err, SnapshotError::CorruptState(_)));
        assert_eq!(state.deserialize_calls.get(), 0);
    }

    #[test]
    fn test_undecodable_state_is_corrupt_state() {
        let engine = create_test_engine();
        let key = SlotKey::new(PROGRAM, 5);
        let header = build_header(PROGRAM, engine.build());
        // length prefix claims more than is present
        let payload = zstd::bulk::compress(&[0xFF; 8], 1).unwrap();
        engine
            .storage()
            .put(&key.file_name(), [&header[..], &payload[..]].concat());

        let mut state = RawState::new(vec![1]);
        let err = engine.load_slot(&mut state, &key).unwrap_err();
        assert!(matches!(err, SnapshotError::CorruptState(_)));
        assert_eq!(state.bytes, vec![1]);
    }

    #[test]
    fn test_slot_range_checked() {
        let engine = create_test_engine().with_slot_count(3);
        let state = RawState::pattern(10);

        for slot in [0, 4] {
            let key = SlotKey::new(PROGRAM, slot);
            assert!(matches!(
                engine.save_slot(&state, &key),
                Err(SnapshotError::SlotOutOfRange { max: 3, .. })
            ));
        }
        assert!(engine.save_slot(&state, &SlotKey::new(PROGRAM, 3)).is_ok());
    }

    #[test]
    fn test_oversized_state_rejected() {
        let engine = create_test_engine().with_max_state_size(1000);
        let key = SlotKey::new(PROGRAM, 1);

        let err = engine.save_slot(&RawState::pattern(2000), &key).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::SizeLimitExceeded {
                size: 2008,
                limit: 1000
            }
        ));
        assert!(!engine.slot_exists(&key));
    }

    #[test]
    fn test_list_slots_skips_unusable() {
        let engine = create_test_engine();
        let state = RawState::pattern(64);

        engine.save_slot(&state, &SlotKey::new(PROGRAM, 1)).unwrap();
        engine.save_slot(&state, &SlotKey::new(PROGRAM, 4)).unwrap();
        engine.save_slot(&state, &SlotKey::new(PROGRAM, 1).with_movie(9)).unwrap();

        // short file
        engine
            .storage()
            .put(&SlotKey::new(PROGRAM, 2).file_name(), vec![0; 100]);
        // foreign program in this program's slot
        let foreign = build_header(0xBAD, engine.build());
        engine
            .storage()
            .put(&SlotKey::new(PROGRAM, 3).file_name(), foreign.to_vec());

        let slots: Vec<u32> = engine
            .list_slots(PROGRAM, 0)
            .into_iter()
            .map(|info| info.key.slot)
            .collect();
        assert_eq!(slots, vec![1, 4]);

        let movie_slots = engine.list_slots(PROGRAM, 9);
        assert_eq!(movie_slots.len(), 1);
        assert_eq!(movie_slots[0].key.movie_id, 9);
    }

    #[test]
    fn test_read_slot_info_short_file() {
        let engine = create_test_engine();
        let key = SlotKey::new(PROGRAM, 1);
        engine.storage().put(&key.file_name(), vec![0; 255]);

        assert!(matches!(
            engine.read_slot_info(&key),
            Err(SnapshotError::Corrupt(_))
        ));
    }

    #[test]
    fn test_verify_slot() {
        let engine = create_test_engine();
        let key = SlotKey::new(PROGRAM, 6);
        engine.save_slot(&RawState::pattern(777), &key).unwrap();

        let verification = engine.verify_slot(&key).unwrap();
        assert_eq!(verification.state_bytes, 785);
        assert_eq!(verification.info.key, key);
    }

    #[test]
    fn test_slot_deletion() {
        let engine = create_test_engine();
        let key = SlotKey::new(PROGRAM, 1);

        engine.save_slot(&RawState::pattern(10), &key).unwrap();
        assert!(engine.slot_exists(&key));

        engine.delete_slot(&key).unwrap();
        assert!(!engine.slot_exists(&key));
        assert!(engine.delete_slot(&key).is_ok());

        let mut state = RawState::default();
        assert!(matches!(
            engine.load_slot(&mut state, &key),
            Err(SnapshotError::Storage(_))
        ));
    }
}
