/*!
Error types for the savestate core engine.
*/

use thiserror::Error;

/// Result type used throughout the savestate core.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors that can occur during snapshot operations.
///
/// Every variant except [`SnapshotError::Io`] and [`SnapshotError::Json`] maps to
/// one row of the snapshot error table: all of them abort the operation that
/// produced them. A revision mismatch is not an error; it is reported through
/// [`crate::format::HeaderStatus`].
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// I/O errors outside of slot storage (configuration files, caller buffers)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors while reading or writing configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad magic or truncated header
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    /// The snapshot was taken by a different program
    #[error("Snapshot belongs to program {found:016X}, expected {expected:016X}")]
    WrongProgram { expected: u64, found: u64 },

    /// Payload would not fit in the scratch buffer or the caller's buffer
    #[error("State of {size} bytes exceeds the {limit} byte limit")]
    SizeLimitExceeded { size: usize, limit: usize },

    /// The compression engine reported a failure
    #[error("Compression error: {0}")]
    Compression(String),

    /// The decompression engine reported a failure
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Slot path could not be created, opened, read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// The state codec failed while writing the machine state
    #[error("State serialization failed: {0}")]
    Serialize(String),

    /// The state codec could not rebuild the machine state
    #[error("Corrupt state: {0}")]
    CorruptState(String),

    /// Another save or load is running against the same instance
    #[error("A snapshot operation is already in progress")]
    OperationInProgress,

    /// Slot number outside 1..=slot_count
    #[error("Slot {slot} is out of range (1..={max})")]
    SlotOutOfRange { slot: u32, max: u32 },

    /// Invalid configuration or arguments
    #[error("Validation error: {0}")]
    Validation(String),
}

impl SnapshotError {
    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new decompression error
    pub fn decompression<S: Into<String>>(msg: S) -> Self {
        Self::Decompression(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new corrupt header error
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Create a new corrupt state error
    pub fn corrupt_state<S: Into<String>>(msg: S) -> Self {
        Self::CorruptState(msg.into())
    }

    /// Whether the error was caused by the snapshot contents rather than by the
    /// environment (storage, configuration, concurrent use).
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::Corrupt(_)
                | Self::WrongProgram { .. }
                | Self::Decompression(_)
                | Self::CorruptState(_)
        )
    }
}
