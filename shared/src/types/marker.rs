//! Resumption marker for incremental log reading

use serde::{Deserialize, Serialize};

/// Identity of a rotated log file: its path plus modification time.
///
/// A file with the same name but a different modification time is a new
/// rotation, not the file seen last time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RotatedFile {
    pub path: String,

    /// Modification time in seconds since the Unix epoch
    pub modified: Option<i64>,
}

impl RotatedFile {
    pub fn new(path: impl Into<String>, modified: Option<i64>) -> Self {
        Self {
            path: path.into(),
            modified,
        }
    }

    /// Markers written before modification times were tracked carry `None`;
    /// those match on the path alone.
    pub fn same_file(&self, other: &RotatedFile) -> bool {
        if self.path != other.path {
            return false;
        }
        match (self.modified, other.modified) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// Where the previous run stopped for one host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeMarker {
    /// Last rotated (not yet compressed) file seen; `None` if the host had none
    pub rotated: Option<RotatedFile>,

    /// Bytes already consumed from the active log file
    pub bytes_read: u64,
}

impl ResumeMarker {
    pub fn new(rotated: Option<RotatedFile>, bytes_read: u64) -> Self {
        Self { rotated, bytes_read }
    }

    /// Whether `current` is the rotated file this marker was written against.
    pub fn same_rotation(&self, current: Option<&RotatedFile>) -> bool {
        match (self.rotated.as_ref(), current) {
            (None, None) => true,
            (Some(stored), Some(current)) => stored.same_file(current),
            _ => false,
        }
    }
}
