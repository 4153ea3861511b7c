//! Rotation of hard-linked snapshots.
//!
//! One [BackupTask] is processed by [Rotation::run] in the stages
//! `validating → listing → syncing → pruning → done`. Any failing stage aborts
//! the task without retrying.

use std::io;
use std::path::PathBuf;

use derive_more::{Display, Error, From};

use crate::backends::SyncError;
use crate::snapshot::SnapshotListError;
use crate::util::retention::InvalidRetentionCount;

mod orchestrator;

pub use orchestrator::Rotation;

/// A backup of one source directory into snapshots below a target root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTask {
    /// Name used in messages.
    pub name: String,
    /// Directory whose contents are backed up.
    pub source_path: PathBuf,
    /// Directory holding the snapshots.
    pub target_root: PathBuf,
    /// Number of snapshots to keep.
    pub retention_count: usize,
    /// Patterns passed to the sync backend as excludes.
    pub excludes: Vec<String>,
}

/// Stage of a [Rotation] run.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum Stage {
    #[display("validating")]
    Validating,
    #[display("listing")]
    Listing,
    #[display("syncing")]
    Syncing,
    #[display("pruning")]
    Pruning,
    #[display("done")]
    Done,
    #[display("failed")]
    Failed,
}

/// Which path of a [BackupTask] is meant.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum PathRole {
    #[display("source")]
    Source,
    #[display("target")]
    Target,
}

#[derive(Debug, Display, Error, From)]
/// Errors on running a [BackupTask].
pub enum BackupError {
    /// Enumerating the existing snapshots failed.
    #[display("{_0}")]
    #[from]
    Listing(SnapshotListError),
    /// Source or target isn't an existing directory.
    #[display("Backup {role} path {} doesn't exist", path.display())]
    PathNotFound { role: PathRole, path: PathBuf },
    /// Resolving the absolute path of source or target failed.
    #[display("Resolving backup {role} path {} failed: {source}", path.display())]
    Resolve {
        role: PathRole,
        path: PathBuf,
        source: io::Error,
    },
    /// The target lies inside the source, so the backup would copy itself.
    #[display(
        "Backup target {} is inside the source {}",
        target_root.display(),
        source_path.display()
    )]
    NestedPath {
        source_path: PathBuf,
        target_root: PathBuf,
    },
    #[display("{_0}")]
    #[from]
    InvalidRetentionCount(InvalidRetentionCount),
    /// The snapshot for this minute already exists.
    #[display("Next backup destination already exists: {}", _0.display())]
    DuplicateSnapshot(#[error(ignore)] PathBuf),
    /// The sync backend failed.
    #[display("Sync failed: {_0}")]
    #[from]
    SyncFailed(SyncError),
    /// The sync backend reported success but the snapshot doesn't exist.
    #[display("Snapshot {} is missing after sync", _0.display())]
    SnapshotMissing(#[error(ignore)] PathBuf),
    /// Marking the snapshot as complete failed.
    #[display("Marking snapshot {} as complete failed: {source}", path.display())]
    MarkerFailed { path: PathBuf, source: io::Error },
    /// Removing a snapshot failed.
    #[display("Removing {} failed: {source}", path.display())]
    PruneFailed { path: PathBuf, source: io::Error },
}

/// Outcome of a successful [Rotation::run].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// The new snapshot.
    pub snapshot: PathBuf,
    /// Snapshot unchanged files were hard-linked against.
    pub link_reference: Option<PathBuf>,
    /// Snapshots removed by retention, oldest first.
    pub pruned: Vec<PathBuf>,
    /// Incomplete snapshots removed before syncing.
    pub discarded: Vec<PathBuf>,
}
