/*!
Snapshot container header: layout, encoding and validation.

A slot file is a fixed 256 byte header followed by a zstd compressed payload:

```text
0   magic "CST\x1B"
4   program id              u64 LE
12  source revision         20 bytes
32  creation time           u64 LE, seconds since the Unix epoch
40  build name              20 bytes, NUL padded
60  zero marker             u32 LE, build name is only meaningful when 0
64  reserved                192 bytes
256 payload
```
*/

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use crate::version::{BuildInfo, BuildOrigin, Revision, RevisionTable, REVISION_LEN};
use crate::{Result, SnapshotError};

/// Size of the encoded header. The payload always starts at this offset.
pub const HEADER_SIZE: usize = 256;

/// File type identifier at the start of every snapshot.
pub const HEADER_MAGIC: [u8; 4] = [b'C', b'S', b'T', 0x1B];

/// Capacity of the build name field, including its terminating NUL.
pub const BUILD_NAME_LEN: usize = 20;

const PROGRAM_ID_OFFSET: usize = 4;
const REVISION_OFFSET: usize = 12;
const TIME_OFFSET: usize = 32;
const BUILD_NAME_OFFSET: usize = 40;
const ZERO_MARKER_OFFSET: usize = 60;

/// Decoded snapshot header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Program (title) the snapshot belongs to
    pub program_id: u64,
    /// Source revision of the build that wrote the snapshot
    pub revision: Revision,
    /// Seconds since the Unix epoch
    pub created_at: u64,
    /// Build name, absent in snapshots from builds that did not record it
    pub build_name: Option<String>,
}

impl SnapshotHeader {
    /// Header for a snapshot taken now by `build`.
    pub fn new(program_id: u64, build: &BuildInfo) -> Self {
        Self {
            program_id,
            revision: build.revision,
            created_at: Utc::now().timestamp().max(0) as u64,
            build_name: Some(build.name.clone()),
        }
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Creation time, or `None` when the stored value is out of chrono's range.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.created_at)
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// Encode into the fixed 256 byte layout.
    ///
    /// Build names longer than 19 bytes are cut at a character boundary so the
    /// field always keeps a terminating NUL.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..4].copy_from_slice(&HEADER_MAGIC);
        bytes[PROGRAM_ID_OFFSET..REVISION_OFFSET].copy_from_slice(&self.program_id.to_le_bytes());
        bytes[REVISION_OFFSET..TIME_OFFSET].copy_from_slice(self.revision.as_bytes());
        bytes[TIME_OFFSET..BUILD_NAME_OFFSET].copy_from_slice(&self.created_at.to_le_bytes());

        if let Some(name) = &self.build_name {
            let mut len = name.len().min(BUILD_NAME_LEN - 1);
            while !name.is_char_boundary(len) {
                len -= 1;
            }
            bytes[BUILD_NAME_OFFSET..BUILD_NAME_OFFSET + len]
                .copy_from_slice(&name.as_bytes()[..len]);
        }
        // zero marker and reserved area stay zero
        bytes
    }

    /// Decode a header, checking only the magic and the length.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(SnapshotError::corrupt(format!(
                "header truncated to {} of {HEADER_SIZE} bytes",
                bytes.len()
            )));
        }
        if bytes[..4] != HEADER_MAGIC {
            return Err(SnapshotError::corrupt(format!(
                "bad magic {:02x?}",
                &bytes[..4]
            )));
        }

        let program_id = read_u64(bytes, PROGRAM_ID_OFFSET);
        let mut revision = [0u8; REVISION_LEN];
        revision.copy_from_slice(&bytes[REVISION_OFFSET..TIME_OFFSET]);
        let created_at = read_u64(bytes, TIME_OFFSET);

        let zero_marker = u32::from_le_bytes([
            bytes[ZERO_MARKER_OFFSET],
            bytes[ZERO_MARKER_OFFSET + 1],
            bytes[ZERO_MARKER_OFFSET + 2],
            bytes[ZERO_MARKER_OFFSET + 3],
        ]);
        let build_name = if zero_marker == 0 {
            let field = &bytes[BUILD_NAME_OFFSET..BUILD_NAME_OFFSET + BUILD_NAME_LEN];
            let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
            Some(String::from_utf8_lossy(&field[..end]).into_owned()).filter(|s| !s.is_empty())
        } else {
            None
        };

        Ok(Self {
            program_id,
            revision: Revision::from_bytes(revision),
            created_at,
            build_name,
        })
    }
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

/// Outcome of a successful header validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderStatus {
    /// Written by this exact revision
    Ok,
    /// Written by another revision of the same program; loading may still work
    RevisionMismatch {
        revision: Revision,
        origin: BuildOrigin,
    },
}

impl HeaderStatus {
    pub fn is_exact(&self) -> bool {
        matches!(self, HeaderStatus::Ok)
    }

    /// Name of the foreign build, when it could be resolved.
    pub fn build_name(&self) -> Option<&str> {
        match self {
            HeaderStatus::Ok => None,
            HeaderStatus::RevisionMismatch { origin, .. } => origin.name(),
        }
    }
}

/// Build the header bytes for a snapshot of `program_id` taken by `build`.
pub fn build_header(program_id: u64, build: &BuildInfo) -> [u8; HEADER_SIZE] {
    SnapshotHeader::new(program_id, build).to_bytes()
}

/// Validate header bytes against the running program and build.
///
/// Fatal problems are returned as errors: [`SnapshotError::Corrupt`] for a bad
/// magic or truncated input and [`SnapshotError::WrongProgram`] for a foreign
/// program id. A revision difference is reported as
/// [`HeaderStatus::RevisionMismatch`] and logged.
pub fn validate_header(
    bytes: &[u8],
    expected_program_id: u64,
    build: &BuildInfo,
    revisions: &RevisionTable,
) -> Result<(SnapshotHeader, HeaderStatus)> {
    let header = SnapshotHeader::parse(bytes)?;

    if header.program_id != expected_program_id {
        return Err(SnapshotError::WrongProgram {
            expected: expected_program_id,
            found: header.program_id,
        });
    }

    if header.revision == build.revision {
        return Ok((header, HeaderStatus::Ok));
    }

    let origin = revisions.resolve(&header.revision, header.build_name.as_deref());
    match origin.name() {
        Some(name) => warn!(
            revision = %header.revision,
            build = name,
            "Snapshot created from a different build"
        ),
        None => warn!(
            revision = %header.revision,
            "Snapshot created from a different revision"
        ),
    }

    let status = HeaderStatus::RevisionMismatch {
        revision: header.revision,
        origin,
    };
    Ok((header, status))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: u64 = 0x0004_0000_0005_5D00;

    fn build(rev_byte: u8, name: &str) -> BuildInfo {
        BuildInfo::new(Revision::from_bytes([rev_byte; REVISION_LEN]), name)
    }

    #[test]
    fn test_header_layout() {
        let header = SnapshotHeader::new(PROGRAM, &build(0xAB, "Nightly 2104")).with_created_at(
            1_700_000_000,
        );
        let bytes = header.to_bytes();

        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..4], b"CST\x1b");
        assert_eq!(&bytes[4..12], &PROGRAM.to_le_bytes());
        assert_eq!(&bytes[12..32], &[0xAB; 20]);
        assert_eq!(&bytes[32..40], &1_700_000_000u64.to_le_bytes());
        assert_eq!(&bytes[40..52], b"Nightly 2104");
        assert_eq!(&bytes[52..64], &[0u8; 12]);
        assert!(bytes[64..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_header_roundtrip_validates_ok() {
        let current = build(1, "Canary 7");
        let bytes = build_header(PROGRAM, &current);

        let (header, status) =
            validate_header(&bytes, PROGRAM, &current, &RevisionTable::new()).unwrap();
        assert_eq!(status, HeaderStatus::Ok);
        assert!(status.is_exact());
        assert_eq!(header.build_name.as_deref(), Some("Canary 7"));
        assert!(header.created().is_some());
    }

    #[test]
    fn test_long_build_name_is_truncated_with_nul() {
        let long = build(1, "a build name well over twenty bytes");
        let bytes = build_header(PROGRAM, &long);
        assert_eq!(bytes[40 + BUILD_NAME_LEN - 1], 0);

        let header = SnapshotHeader::parse(&bytes).unwrap();
        assert_eq!(header.build_name.as_deref(), Some("a build name well o"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 18 ASCII bytes followed by a two byte character straddling the cut
        let name = format!("{}é", "x".repeat(18));
        let bytes = build_header(PROGRAM, &build(1, &name));
        let header = SnapshotHeader::parse(&bytes).unwrap();
        assert_eq!(header.build_name.as_deref(), Some("x".repeat(18).as_str()));
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let current = build(1, "x");
        let mut bytes = build_header(PROGRAM, &current);
        bytes[0] = b'X';

        let err = validate_header(&bytes, PROGRAM, &current, &RevisionTable::new()).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt(_)));
    }

    #[test]
    fn test_truncated_header_is_corrupt() {
        let current = build(1, "x");
        let bytes = build_header(PROGRAM, &current);

        let err =
            validate_header(&bytes[..100], PROGRAM, &current, &RevisionTable::new()).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt(_)));
        assert!(validate_header(&[], PROGRAM, &current, &RevisionTable::new()).is_err());
    }

    #[test]
    fn test_foreign_program_is_wrong_program_regardless_of_revision() {
        let current = build(1, "x");
        for writer in [build(1, "x"), build(2, "y")] {
            let bytes = build_header(PROGRAM + 1, &writer);
            let err =
                validate_header(&bytes, PROGRAM, &current, &RevisionTable::new()).unwrap_err();
            assert!(matches!(
                err,
                SnapshotError::WrongProgram { expected: PROGRAM, found } if found == PROGRAM + 1
            ));
        }
    }

    #[test]
    fn test_revision_mismatch_uses_embedded_name() {
        let current = build(1, "Nightly 2");
        let bytes = build_header(PROGRAM, &build(2, "Nightly 1"));

        let (_, status) =
            validate_header(&bytes, PROGRAM, &current, &RevisionTable::new()).unwrap();
        assert_eq!(
            status,
            HeaderStatus::RevisionMismatch {
                revision: Revision::from_bytes([2; REVISION_LEN]),
                origin: BuildOrigin::Embedded("Nightly 1".to_string()),
            }
        );
        assert_eq!(status.build_name(), Some("Nightly 1"));
    }

    #[test]
    fn test_revision_mismatch_falls_back_to_table() {
        let current = build(1, "Nightly 2");
        let old_rev = Revision::from_bytes([3; REVISION_LEN]);
        let mut bytes = SnapshotHeader {
            program_id: PROGRAM,
            revision: old_rev,
            created_at: 0,
            build_name: None,
        }
        .to_bytes();
        // old builds left garbage in the name field and flagged it via the marker
        bytes[40..44].copy_from_slice(b"junk");
        bytes[60] = 1;

        let table = RevisionTable::new().with_entry(old_rev, "Canary 99");
        let (header, status) = validate_header(&bytes, PROGRAM, &current, &table).unwrap();
        assert_eq!(header.build_name, None);
        assert_eq!(status.build_name(), Some("Canary 99"));

        let (_, status) =
            validate_header(&bytes, PROGRAM, &current, &RevisionTable::new()).unwrap();
        assert!(matches!(
            status,
            HeaderStatus::RevisionMismatch {
                origin: BuildOrigin::Unknown,
                ..
            }
        ));
    }
}
