//! Snapshot directories living below a target root.
//!
//! Every snapshot is a directory named `<timestamp><SNAPSHOT_SUFFIX>`.
//! The timestamp format must sort lexicographically in chronological order,
//! since [`list_snapshots`] orders snapshots by name alone.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

mod lister;
mod namer;

pub use lister::{list_snapshots, SnapshotListError};
pub use namer::{InvalidNameFormat, SnapshotNamer, DEFAULT_TIMESTAMP_FORMAT};

/// Suffix marker distinguishing snapshot directories from unrelated entries.
pub const SNAPSHOT_SUFFIX: &str = "-backup";

/// File written into a snapshot once the sync finished successfully.
pub const COMPLETION_MARKER: &str = ".backup-complete";

/// A snapshot directory below a target root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    path: PathBuf,
    name: String,
    complete: bool,
}

impl Snapshot {
    pub(crate) fn new(path: PathBuf, name: String, complete: bool) -> Self {
        Self {
            path,
            name,
            complete,
        }
    }

    /// Absolute path of the snapshot directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name including the [`SNAPSHOT_SUFFIX`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The timestamp part of the name.
    pub fn timestamp_key(&self) -> &str {
        self.name
            .strip_suffix(SNAPSHOT_SUFFIX)
            .unwrap_or(&self.name)
    }

    /// Whether the snapshot carries the [`COMPLETION_MARKER`].
    ///
    /// Snapshots taken before markers were introduced are never complete.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Parses the creation time back out of the name.
    ///
    /// Returns [None] if the snapshot was named with a different format.
    pub fn date(&self, namer: &SnapshotNamer) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(self.timestamp_key(), namer.format()).ok()
    }
}
