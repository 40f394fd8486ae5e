/*!
# Savestate Core Engine

Emulator state snapshot library.

This crate saves and restores complete emulated machine states with support for:

- A fixed 256-byte container header identifying the program and the build
  that wrote the snapshot, validated before any payload is trusted
- Numbered save slots on the local filesystem, compressed with zstd
- A two-thread streaming pipeline that overlaps serialization with
  compression when saving to or loading from caller memory

## Architecture

The machine state itself is opaque: emulator cores implement [`StateCodec`]
and the library only moves bytes. Slot storage and whole-buffer compression
are adapters behind the [`StorageAdapter`] and [`CompressionAdapter`] traits.

## Usage

```rust
use savestate_core::{create_default_engine, RawState, SlotKey, SnapshotConfig};

# let dir = tempfile::tempdir()?;
let config = SnapshotConfig::with_states_dir(dir.path());
let engine = create_default_engine(&config)?;

let key = SlotKey::new(0x0004_0000_0005_5D00, 1);
let state = RawState::pattern(64 * 1024);

// Save to slot 1
engine.save_slot(&state, &key)?;

// Restore it
let mut restored = RawState::default();
engine.load_slot(&mut restored, &key)?;
assert_eq!(restored, state);
# Ok::<(), savestate_core::SnapshotError>(())
```
*/

pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod format;
pub mod observability;
pub mod pipeline;
pub mod slot;
pub mod snapshot;
pub mod storage;
pub mod version;


pub use codec::{JsonState, RawState, StateCodec};
pub use compression::{CompressionAdapter, ZstdCompressor};
pub use config::SnapshotConfig;
pub use error::{Result, SnapshotError};
pub use format::{build_header, validate_header, HeaderStatus, SnapshotHeader, HEADER_SIZE};
pub use pipeline::StreamingPipeline;
pub use slot::{slot_path, SlotInfo, SlotKey};
pub use snapshot::{create_default_engine, SlotVerification, SnapshotEngine};
pub use storage::{LocalFileStorage, StorageAdapter};
pub use version::{BuildInfo, BuildOrigin, Revision, RevisionTable};
