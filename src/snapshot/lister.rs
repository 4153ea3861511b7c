use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};

use super::{Snapshot, COMPLETION_MARKER, SNAPSHOT_SUFFIX};

/// Errors on enumerating the snapshots of a target root.
#[derive(Debug, Display, Error)]
pub enum SnapshotListError {
    /// The target root is not an existing directory.
    #[display("Invalid path {}", _0.display())]
    InvalidPath(#[error(ignore)] PathBuf),
    /// Reading the target root failed.
    #[display("Reading snapshots in {} failed: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
}

/// Lists the snapshots below `target_root` in chronological order.
///
/// Direct children of `target_root` count as snapshots if they are directories
/// and their name ends with [`SNAPSHOT_SUFFIX`]. Hidden entries are ignored.
///
/// Ordering is the plain alphabetical order of the names. Modification times
/// are of no use here, since the sync tool alters them on every run.
pub fn list_snapshots(target_root: &Path) -> Result<Vec<Snapshot>, SnapshotListError> {
    if !target_root.is_dir() {
        return Err(SnapshotListError::InvalidPath(target_root.to_path_buf()));
    }

    let read_err = |source| SnapshotListError::Read {
        path: target_root.to_path_buf(),
        source,
    };
    let root = target_root.canonicalize().map_err(read_err)?;

    let mut snapshots = Vec::new();
    for entry in fs::read_dir(&root).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let Ok(name) = entry.file_name().into_string() else {
            log::trace!(target: "snapshot", "Skipping non UTF-8 entry {:?}", entry.file_name());
            continue;
        };
        if name.starts_with('.') || !name.ends_with(SNAPSHOT_SUFFIX) {
            continue;
        }

        let path = entry.path();
        if !path.is_dir() {
            log::debug!(target: "snapshot", "Skipping {} since it's not a directory", path.display());
            continue;
        }

        let complete = path.join(COMPLETION_MARKER).is_file();
        snapshots.push(Snapshot::new(path, name, complete));
    }

    snapshots.sort_by(|a, b| a.name.cmp(&b.name));
    log::trace!(target: "snapshot", "Found {} snapshot(s) in {}", snapshots.len(), root.display());

    Ok(snapshots)
}
