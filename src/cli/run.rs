//! Runs an [Action] over the selected tasks.

use std::io::{self, Write};

use derive_more::{Display, Error, From};

use super::Action;
use crate::backends::SyncBackend;
use crate::rotation::{BackupError, BackupTask, Rotation};
use crate::snapshot::{list_snapshots, SnapshotNamer};

#[derive(Debug, Display, Error, From)]
enum TaskError {
    Backup(BackupError),
    #[display("Writing the listing failed: {_0}")]
    Output(io::Error),
}

/// Applies `action` to every task in order and returns the names of the
/// failed ones.
///
/// A failing task is logged and doesn't stop the remaining tasks. Listings are
/// written to `out`.
pub fn run_tasks<'t, B: SyncBackend>(
    rotation: &Rotation<B>,
    tasks: &[&'t BackupTask],
    action: Action,
    dry_run: bool,
    out: &mut impl Write,
) -> Vec<&'t str> {
    if tasks.is_empty() {
        log::warn!("No backup tasks to run");
    }

    let mut failed = Vec::new();
    for &task in tasks {
        let result = match action {
            // failures are logged with their stage by the rotation itself
            Action::Backup => rotation.run(task, dry_run).map(|_| ()).map_err(|_| ()),
            Action::Prune => rotation.prune(task, dry_run).map(|_| ()).map_err(|e| {
                log::error!(target: "rotation", "[{}] Pruning failed: {e}", task.name);
            }),
            Action::List => print_snapshots(rotation.namer(), task, &mut *out).map_err(|e| {
                log::error!(target: "rotation", "[{}] Listing failed: {e}", task.name);
            }),
        };

        if result.is_err() {
            failed.push(task.name.as_str());
        }
    }

    if !failed.is_empty() {
        log::error!(
            "{} of {} task(s) failed: {}",
            failed.len(),
            tasks.len(),
            failed.join(", ")
        );
    }
    failed
}

fn print_snapshots(
    namer: &SnapshotNamer,
    task: &BackupTask,
    out: &mut impl Write,
) -> Result<(), TaskError> {
    let snapshots = list_snapshots(&task.target_root).map_err(BackupError::from)?;

    writeln!(out, "{} ({}):", task.name, task.target_root.display())?;
    if snapshots.is_empty() {
        writeln!(out, "  no snapshots")?;
    }
    for snapshot in &snapshots {
        let date = snapshot
            .date(namer)
            .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown date".to_string());
        let state = if snapshot.is_complete() {
            "complete"
        } else {
            "incomplete"
        };
        writeln!(out, "  {}  {date}  {state}", snapshot.name())?;
    }

    Ok(())
}
