use derive_more::{Display, Error};

use crate::snapshot::Snapshot;

/// Retention count below one.
#[derive(Copy, Clone, Debug, Display, Error, PartialEq, Eq)]
#[display("Invalid retention count {_0}, at least one snapshot has to be kept")]
pub struct InvalidRetentionCount(#[error(ignore)] pub usize);

/// Keeps the newest `keep` snapshots of a target root.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep: usize,
}

impl TryFrom<usize> for RetentionPolicy {
    type Error = InvalidRetentionCount;

    fn try_from(keep: usize) -> Result<Self, Self::Error> {
        Self::new(keep)
    }
}

impl RetentionPolicy {
    pub fn new(keep: usize) -> Result<Self, InvalidRetentionCount> {
        if keep < 1 {
            return Err(InvalidRetentionCount(keep));
        }

        Ok(Self { keep })
    }

    /// Number of snapshots retained.
    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Returns the snapshots to delete, oldest first.
    ///
    /// `snapshots` must be in chronological order, as returned by
    /// [`list_snapshots`](crate::snapshot::list_snapshots). The result is the
    /// oldest prefix exceeding the retention count. Deleting in this order means
    /// an interrupted prune never removes a newer snapshot before an older one.
    pub fn prune<'a>(&self, snapshots: &'a [Snapshot]) -> &'a [Snapshot] {
        let excess = snapshots.len().saturating_sub(self.keep);
        &snapshots[..excess]
    }
}
