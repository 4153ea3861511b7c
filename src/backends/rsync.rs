//! Implements snapshot transfer using [Rsync].

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};
use std::process::{Command, Stdio};

use super::{SyncBackend, SyncError, SyncRequest};
use crate::snapshot::COMPLETION_MARKER;

const ROOT_PATH: &str = "/";

/// [rsync](https://rsync.samba.org) backend.
///
/// Unchanged files are hard-linked against the previous snapshot
/// (`--link-dest`), so every snapshot only occupies the size of changed data.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Rsync {
    /// The rsync executable.
    pub program: PathBuf,

    /// Run rsync through `sudo`.
    pub sudo: bool,

    /// Flags passed on every invocation.
    ///
    /// Defaults to archive mode, preserving ACLs and extended attributes,
    /// staying on one file system, numeric ids and mirroring deletions.
    pub flags: Vec<String>,

    /// Patterns excluded from every task.
    pub always_exclude: Vec<String>,
}

impl Default for Rsync {
    fn default() -> Self {
        Self {
            program: PathBuf::from("rsync"),
            sudo: false,
            flags: ["-avxhAX", "--numeric-ids", "--delete", "--progress"]
                .map(String::from)
                .to_vec(),
            always_exclude: vec!["lost+found".to_string()],
        }
    }
}

impl Rsync {
    /// Builds the rsync invocation for `request`.
    pub fn command(&self, request: &SyncRequest<'_>) -> Command {
        let mut rsync = if self.sudo {
            let mut sudo = Command::new("sudo");
            sudo.arg(&self.program);
            sudo
        } else {
            Command::new(&self.program)
        };

        rsync.args(&self.flags);
        for pattern in &self.always_exclude {
            rsync.arg(format!("--exclude={pattern}"));
        }
        // a source holding snapshots must not mark an interrupted copy complete
        rsync.arg(format!("--exclude=/{COMPLETION_MARKER}"));
        if let Some(reference) = request.link_reference {
            rsync.arg(prefixed("--link-dest=", reference.as_os_str()));
        }
        for pattern in request.excludes {
            rsync.arg(format!("--exclude={pattern}"));
        }

        rsync.arg(source_arg(request.source));
        rsync.arg(request.destination);

        rsync
    }
}

/// The source with a trailing separator, so rsync copies its contents.
fn source_arg(source: &Path) -> OsString {
    let mut arg = source.as_os_str().to_owned();
    if source != Path::new(ROOT_PATH) && !arg.as_encoded_bytes().ends_with(b"/") {
        arg.push(MAIN_SEPARATOR_STR);
    }
    arg
}

fn prefixed(prefix: &str, value: &OsStr) -> OsString {
    let mut arg = OsString::from(prefix);
    arg.push(value);
    arg
}

fn display_command(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

impl SyncBackend for Rsync {
    fn sync(&self, request: &SyncRequest<'_>, dry_run: bool) -> Result<(), SyncError> {
        let mut rsync = self.command(request);
        let command = display_command(&rsync);

        if dry_run {
            log::info!(target: "backend::rsync", "Would run: {command}");
            return Ok(());
        }
        log::info!(target: "backend::rsync", "Running: {command}");

        // relay progress to the operator
        let status = rsync
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| SyncError::NotRun {
                program: self.program.display().to_string(),
                source,
            })?;

        if !status.success() {
            return Err(SyncError::Failed {
                command,
                code: status.code(),
            });
        }
        log::debug!(target: "backend::rsync", "Finished sync to {}", request.destination.display());

        Ok(())
    }
}
