//! Library to take rotating, hard-linked backups onto removable devices.
//!
//! Every backup task copies a source directory into a new timestamped snapshot
//! below a target root using [rsync][rsync]. Unchanged files are hard-linked
//! against the previous snapshot. The oldest snapshots exceeding the retention
//! count of the task are removed afterwards.
//!
//! The orchestration lives in [`rotation`], the transfer in [`backends`].
//!
//! [rsync]: https://rsync.samba.org

#![forbid(unsafe_code)]

pub mod backends;
pub mod cli;
pub mod config;
pub mod rotation;
pub mod snapshot;
pub mod util;
