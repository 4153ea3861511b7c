//! Backends performing the actual file transfer of a snapshot.
//!
//! Currently the following backends are implemented:
//!
//! - [Rsync]: Hard-linked incremental copies using `rsync --link-dest`.

pub mod rsync;

use std::io;
use std::path::Path;

use derive_more::{Display, Error};

pub use rsync::Rsync;

/// Everything a backend needs to know to fill one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    /// Directory whose *contents* are copied.
    pub source: &'a Path,
    /// New snapshot directory.
    pub destination: &'a Path,
    /// Previous snapshot unchanged files are hard-linked against.
    pub link_reference: Option<&'a Path>,
    /// Additional exclude patterns.
    pub excludes: &'a [String],
}

/// Errors of a [SyncBackend].
#[derive(Debug, Display, Error)]
pub enum SyncError {
    /// The sync program couldn't be started.
    #[display("Unable to run {program}: {source}")]
    NotRun { program: String, source: io::Error },
    /// The sync program exited unsuccessfully.
    #[display("`{command}` failed with exit code {}", code.map_or("none".to_string(), |c| c.to_string()))]
    Failed { command: String, code: Option<i32> },
}

/// Generic sync backend.
pub trait SyncBackend {
    /// Copies the source into the destination of the [SyncRequest].
    ///
    /// Blocks until the transfer finished. The destination doesn't exist prior.
    ///
    /// # Dry Run
    ///
    /// On a dry run (`dry_run=true`) no files are altered.
    fn sync(&self, request: &SyncRequest<'_>, dry_run: bool) -> Result<(), SyncError>;
}

impl<B: SyncBackend + ?Sized> SyncBackend for &B {
    fn sync(&self, request: &SyncRequest<'_>, dry_run: bool) -> Result<(), SyncError> {
        (**self).sync(request, dry_run)
    }
}
