/*!
Build metadata embedded in snapshot headers.

Every snapshot records the source revision and build name of the program that
wrote it. On load, the recorded revision is compared with the running build and,
when they differ, resolved to a [`BuildOrigin`] so callers can tell the user
which build the snapshot came from.
*/

use std::collections::HashMap;
use std::fmt;

use crate::{Result, SnapshotError};

/// Length in bytes of a source revision hash.
pub const REVISION_LEN: usize = 20;

/// Source revision (a 20 byte commit hash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Revision([u8; REVISION_LEN]);

impl Revision {
    pub const fn from_bytes(bytes: [u8; REVISION_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a revision from its 40 character hex form.
    ///
    /// # Example
    /// ```rust
    /// use savestate_core::version::Revision;
    ///
    /// let rev = Revision::from_hex("0123456789abcdef0123456789abcdef01234567")?;
    /// assert_eq!(rev.to_hex(), "0123456789abcdef0123456789abcdef01234567");
    /// # Ok::<(), savestate_core::SnapshotError>(())
    /// ```
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let mut bytes = [0u8; REVISION_LEN];
        hex::decode_to_slice(hex_str.trim(), &mut bytes).map_err(|e| {
            SnapshotError::validation(format!("Invalid revision hash '{hex_str}': {e}"))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; REVISION_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Revision and human readable name of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub revision: Revision,
    pub name: String,
}

impl BuildInfo {
    pub fn new<S: Into<String>>(revision: Revision, name: S) -> Self {
        Self {
            revision,
            name: name.into(),
        }
    }

    /// Metadata of the running build.
    ///
    /// The revision comes from `SAVESTATE_SCM_REV` at compile time. Builds without
    /// it (local development) carry an all-zero revision.
    pub fn current() -> Self {
        let revision = option_env!("SAVESTATE_SCM_REV")
            .and_then(|rev| Revision::from_hex(rev).ok())
            .unwrap_or_default();
        Self::new(revision, concat!("savestate ", env!("CARGO_PKG_VERSION")))
    }
}

/// Where the name of a foreign build came from.
///
/// Older snapshots only carry a revision; newer ones also embed the build name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOrigin {
    /// Name stored in the snapshot header itself
    Embedded(String),
    /// Name looked up in the [`RevisionTable`]
    Known(String),
    /// Neither the header nor the table name this revision
    Unknown,
}

impl BuildOrigin {
    pub fn name(&self) -> Option<&str> {
        match self {
            BuildOrigin::Embedded(name) | BuildOrigin::Known(name) => Some(name),
            BuildOrigin::Unknown => None,
        }
    }
}

/// Mapping from released revisions to their build names.
#[derive(Debug, Clone, Default)]
pub struct RevisionTable {
    entries: HashMap<Revision, String>,
}

impl RevisionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry<S: Into<String>>(mut self, revision: Revision, name: S) -> Self {
        self.insert(revision, name);
        self
    }

    pub fn insert<S: Into<String>>(&mut self, revision: Revision, name: S) {
        self.entries.insert(revision, name.into());
    }

    pub fn lookup(&self, revision: &Revision) -> Option<&str> {
        self.entries.get(revision).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a foreign revision, preferring the name embedded in the header.
    pub fn resolve(&self, revision: &Revision, embedded_name: Option<&str>) -> BuildOrigin {
        match embedded_name {
            Some(name) if !name.is_empty() => BuildOrigin::Embedded(name.to_string()),
            _ => match self.lookup(revision) {
                Some(name) => BuildOrigin::Known(name.to_string()),
                None => BuildOrigin::Unknown,
            },
        }
    }
}

impl FromIterator<(Revision, String)> for RevisionTable {
    fn from_iter<I: IntoIterator<Item = (Revision, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
