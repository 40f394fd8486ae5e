/*!
Save slot naming.

Slot files live in a single states directory and are named after the program,
the optional movie (input recording) and the slot number:

`{program_id:016X}[.movie{movie_id:016X}].{slot:02}.cst`
*/

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format::HeaderStatus;
use crate::{Result, SnapshotError};

/// Extension of slot files.
pub const SLOT_EXTENSION: &str = "cst";

/// Number of slots per program unless configured otherwise.
pub const DEFAULT_SLOT_COUNT: u32 = 10;

/// Identifies one save slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub program_id: u64,
    /// Movie being recorded or played back, `0` when none
    pub movie_id: u64,
    /// Slot number, starting at 1
    pub slot: u32,
}

impl SlotKey {
    pub fn new(program_id: u64, slot: u32) -> Self {
        Self {
            program_id,
            movie_id: 0,
            slot,
        }
    }

    pub fn with_movie(mut self, movie_id: u64) -> Self {
        self.movie_id = movie_id;
        self
    }

    /// Canonical file name of the slot.
    ///
    /// # Example
    /// ```rust
    /// use savestate_core::SlotKey;
    ///
    /// let key = SlotKey::new(0x0004000000055D00, 3);
    /// assert_eq!(key.file_name(), "0004000000055D00.03.cst");
    ///
    /// let key = key.with_movie(0xBEEF);
    /// assert_eq!(key.file_name(), "0004000000055D00.movie000000000000BEEF.03.cst");
    /// ```
    pub fn file_name(&self) -> String {
        if self.movie_id != 0 {
            format!(
                "{:016X}.movie{:016X}.{:02}.{SLOT_EXTENSION}",
                self.program_id, self.movie_id, self.slot
            )
        } else {
            format!(
                "{:016X}.{:02}.{SLOT_EXTENSION}",
                self.program_id, self.slot
            )
        }
    }

    /// Check that the slot number is within `1..=slot_count`.
    pub fn check_range(&self, slot_count: u32) -> Result<()> {
        if self.slot == 0 || self.slot > slot_count {
            return Err(SnapshotError::SlotOutOfRange {
                slot: self.slot,
                max: slot_count,
            });
        }
        Ok(())
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Full path of a slot file under `states_dir`. Pure, touches no files.
pub fn slot_path(states_dir: &Path, key: &SlotKey) -> String {
    states_dir.join(key.file_name()).to_string_lossy().into_owned()
}

/// Summary of an existing slot, as produced by slot enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    pub key: SlotKey,
    /// Creation time recorded in the header
    pub created_at: Option<DateTime<Utc>>,
    pub status: HeaderStatus,
    /// Name of the build that wrote the slot, when known
    pub build_name: Option<String>,
    /// Storage path relative to the states directory
    pub path: String,
    /// Size of the slot file in bytes, header included
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_file_name_without_movie() {
        let key = SlotKey::new(0x0004000000164800, 1);
        assert_eq!(key.file_name(), "0004000000164800.01.cst");
        assert_eq!(key.to_string(), key.file_name());
    }

    #[test]
    fn test_file_name_with_movie() {
        let key = SlotKey::new(0xAB, 10).with_movie(0x1122334455667788);
        assert_eq!(
            key.file_name(),
            "00000000000000AB.movie1122334455667788.10.cst"
        );
    }

    #[test]
    fn test_slot_path_is_deterministic() {
        let dir = PathBuf::from("states");
        let key = SlotKey::new(1, 2);
        assert_eq!(slot_path(&dir, &key), slot_path(&dir, &key));
        assert!(slot_path(&dir, &key).ends_with("0000000000000001.02.cst"));
        assert!(slot_path(&dir, &key).starts_with("states"));
    }

    #[test]
    fn test_slot_range() {
        assert!(SlotKey::new(1, 1).check_range(10).is_ok());
        assert!(SlotKey::new(1, 10).check_range(10).is_ok());
        assert!(matches!(
            SlotKey::new(1, 0).check_range(10),
            Err(SnapshotError::SlotOutOfRange { slot: 0, max: 10 })
        ));
        assert!(SlotKey::new(1, 11).check_range(10).is_err());
    }
}
