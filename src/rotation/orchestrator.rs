use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};

use super::{BackupError, BackupTask, PathRole, RunReport, Stage};
use crate::backends::{SyncBackend, SyncRequest};
use crate::snapshot::{list_snapshots, Snapshot, SnapshotNamer, COMPLETION_MARKER};
use crate::util::retention::RetentionPolicy;

const ROOT_PATH: &str = "/";

/// Takes rotating snapshots of [BackupTask]s using a [SyncBackend].
///
/// Each snapshot is hard-linked against the previous one, so only changed
/// files occupy additional space. Afterwards the oldest snapshots exceeding
/// the retention count are removed.
///
/// The target root is assumed to be owned exclusively by one run at a time.
#[derive(Debug, Clone)]
pub struct Rotation<B> {
    backend: B,
    namer: SnapshotNamer,
    discard_incomplete: bool,
}

impl<B: SyncBackend> Rotation<B> {
    pub fn new(backend: B, namer: SnapshotNamer) -> Self {
        Self {
            backend,
            namer,
            discard_incomplete: false,
        }
    }

    /// Remove snapshots of interrupted runs before taking a new one.
    pub fn discard_incomplete(mut self, discard: bool) -> Self {
        self.discard_incomplete = discard;
        self
    }

    pub fn namer(&self) -> &SnapshotNamer {
        &self.namer
    }

    /// Takes a snapshot named after the current local time.
    ///
    /// # Dry Run
    ///
    /// On a dry run (`dry_run=true`) all checks are performed, but no snapshot
    /// is created or removed.
    pub fn run(&self, task: &BackupTask, dry_run: bool) -> Result<RunReport, BackupError> {
        self.run_at(task, Local::now().naive_local(), dry_run)
    }

    /// Takes a snapshot named after `now`.
    pub fn run_at(
        &self,
        task: &BackupTask,
        now: NaiveDateTime,
        dry_run: bool,
    ) -> Result<RunReport, BackupError> {
        log::info!(target: "rotation", "[{}] Backing up {} into {}", task.name, task.source_path.display(), task.target_root.display());
        let mut stage = Stage::Validating;
        let result = self.rotate(task, now, dry_run, &mut stage);

        match &result {
            Ok(report) => {
                enter(task, &mut stage, Stage::Done);
                log::info!(target: "rotation", "[{}] Finished snapshot {}", task.name, report.snapshot.display());
            }
            Err(e) => {
                log::error!(target: "rotation", "[{}] Failed while {stage}: {e}", task.name);
                enter(task, &mut stage, Stage::Failed);
            }
        }

        result
    }

    fn rotate(
        &self,
        task: &BackupTask,
        now: NaiveDateTime,
        dry_run: bool,
        stage: &mut Stage,
    ) -> Result<RunReport, BackupError> {
        let (source, target) = validate_paths(task)?;
        let policy = RetentionPolicy::new(task.retention_count)?;

        enter(task, stage, Stage::Listing);
        let mut snapshots = list_snapshots(&target)?;
        let name = self.namer.next_name(&now);
        let destination = target.join(&name);
        if destination.symlink_metadata().is_ok() {
            return Err(BackupError::DuplicateSnapshot(destination));
        }

        let mut discarded = Vec::new();
        if self.discard_incomplete {
            for snapshot in interrupted(&snapshots) {
                if dry_run {
                    log::info!(target: "rotation", "[{}] Would discard incomplete snapshot {}", task.name, snapshot.path().display());
                } else {
                    log::info!(target: "rotation", "[{}] Discarding incomplete snapshot {}", task.name, snapshot.path().display());
                    remove_snapshot(snapshot.path())?;
                }
                discarded.push(snapshot.path().to_path_buf());
            }
            snapshots.retain(|s| !discarded.iter().any(|d| d == s.path()));
        }

        let link_reference = link_reference(&snapshots).map(|s| s.path().to_path_buf());
        match &link_reference {
            Some(reference) => {
                log::debug!(target: "rotation", "[{}] Hard-linking against {}", task.name, reference.display())
            }
            None => log::debug!(target: "rotation", "[{}] First snapshot, nothing to link against", task.name),
        }

        enter(task, stage, Stage::Syncing);
        let request = SyncRequest {
            source: &source,
            destination: &destination,
            link_reference: link_reference.as_deref(),
            excludes: &task.excludes,
        };
        self.backend.sync(&request, dry_run)?;

        enter(task, stage, Stage::Pruning);
        let pruned = if dry_run {
            // pretend the new snapshot exists
            snapshots.push(Snapshot::new(destination.clone(), name, true));
            snapshots.sort_by(|a, b| a.name().cmp(b.name()));
            apply_retention(task, &policy, &snapshots, true)?
        } else {
            mark_complete(&destination)?;
            let snapshots = list_snapshots(&target)?;
            apply_retention(task, &policy, &snapshots, false)?
        };

        Ok(RunReport {
            snapshot: destination,
            link_reference,
            pruned,
            discarded,
        })
    }

    /// Only applies the retention of `task`, without taking a snapshot.
    ///
    /// Returns the removed snapshots, oldest first.
    pub fn prune(&self, task: &BackupTask, dry_run: bool) -> Result<Vec<PathBuf>, BackupError> {
        if !task.target_root.is_dir() {
            return Err(BackupError::PathNotFound {
                role: PathRole::Target,
                path: task.target_root.clone(),
            });
        }
        let policy = RetentionPolicy::new(task.retention_count)?;
        let snapshots = list_snapshots(&task.target_root)?;

        apply_retention(task, &policy, &snapshots, dry_run)
    }
}

fn enter(task: &BackupTask, stage: &mut Stage, next: Stage) {
    log::debug!(target: "rotation", "[{}] {stage} -> {next}", task.name);
    *stage = next;
}

/// Checks source and target of `task` and returns their resolved paths.
fn validate_paths(task: &BackupTask) -> Result<(PathBuf, PathBuf), BackupError> {
    let source = resolve_dir(PathRole::Source, &task.source_path)?;
    let target = resolve_dir(PathRole::Target, &task.target_root)?;

    if is_nested(&target, &source) {
        return Err(BackupError::NestedPath {
            source_path: source,
            target_root: target,
        });
    }

    Ok((source, target))
}

fn resolve_dir(role: PathRole, path: &Path) -> Result<PathBuf, BackupError> {
    if !path.is_dir() {
        return Err(BackupError::PathNotFound {
            role,
            path: path.to_path_buf(),
        });
    }

    path.canonicalize().map_err(|source| BackupError::Resolve {
        role,
        path: path.to_path_buf(),
        source,
    })
}

/// Whether the resolved `target` lies within the resolved `source`.
///
/// Containment is decided per path component, not as a string prefix:
/// `/home/user2` is not inside `/home/user`. Backing up the file system root into one of its directories is allowed,
/// as the sync tool stays on one file system.
fn is_nested(target: &Path, source: &Path) -> bool {
    source != Path::new(ROOT_PATH) && target.starts_with(source)
}

/// Incomplete snapshots newer than the newest complete one.
///
/// Without any complete snapshot nothing is considered interrupted, since
/// snapshots taken before completion markers existed never carry one.
fn interrupted(snapshots: &[Snapshot]) -> &[Snapshot] {
    match snapshots.iter().rposition(Snapshot::is_complete) {
        Some(newest_complete) => &snapshots[newest_complete + 1..],
        None => &[],
    }
}

/// The newest complete snapshot, or the newest one if none is complete.
fn link_reference(snapshots: &[Snapshot]) -> Option<&Snapshot> {
    snapshots
        .iter()
        .rev()
        .find(|s| s.is_complete())
        .or(snapshots.last())
}

fn mark_complete(snapshot: &Path) -> Result<(), BackupError> {
    if !snapshot.is_dir() {
        return Err(BackupError::SnapshotMissing(snapshot.to_path_buf()));
    }

    File::create(snapshot.join(COMPLETION_MARKER)).map_err(|source| BackupError::MarkerFailed {
        path: snapshot.to_path_buf(),
        source,
    })?;
    log::trace!(target: "rotation", "Marked {} as complete", snapshot.display());

    Ok(())
}

fn apply_retention(
    task: &BackupTask,
    policy: &RetentionPolicy,
    snapshots: &[Snapshot],
    dry_run: bool,
) -> Result<Vec<PathBuf>, BackupError> {
    let mut pruned = Vec::new();
    for snapshot in policy.prune(snapshots) {
        if dry_run {
            log::info!(target: "rotation", "[{}] Would remove {}", task.name, snapshot.path().display());
        } else {
            log::info!(target: "rotation", "[{}] Removing {}", task.name, snapshot.path().display());
            remove_snapshot(snapshot.path())?;
        }
        pruned.push(snapshot.path().to_path_buf());
    }
    log::debug!(target: "rotation", "[{}] Done cleaning, {} snapshot(s) kept", task.name, snapshots.len() - pruned.len());

    Ok(pruned)
}

/// Removes a whole snapshot directory.
///
/// Anything but a directory, including symlinks, is refused.
fn remove_snapshot(path: &Path) -> Result<(), BackupError> {
    let prune_err = |source| BackupError::PruneFailed {
        path: path.to_path_buf(),
        source,
    };

    let metadata = fs::symlink_metadata(path).map_err(prune_err)?;
    if !metadata.is_dir() {
        return Err(prune_err(io::Error::other("not a directory")));
    }

    fs::remove_dir_all(path).map_err(prune_err)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use chrono::NaiveDate;
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::backends::SyncError;

    /// Records requests and creates the destination like rsync would.
    #[derive(Default)]
    struct FakeSync {
        requests: RefCell<Vec<(PathBuf, PathBuf, Option<PathBuf>)>>,
        fail: bool,
        skip_create: bool,
    }

    impl SyncBackend for FakeSync {
        fn sync(&self, request: &SyncRequest<'_>, dry_run: bool) -> Result<(), SyncError> {
            self.requests.borrow_mut().push((
                request.source.to_path_buf(),
                request.destination.to_path_buf(),
                request.link_reference.map(Path::to_path_buf),
            ));
            if self.fail {
                return Err(SyncError::Failed {
                    command: "fake".to_string(),
                    code: Some(23),
                });
            }
            if !dry_run && !self.skip_create {
                fs::create_dir(request.destination).unwrap();
                fs::write(request.destination.join("file"), "data").unwrap();
            }
            Ok(())
        }
    }

    impl FakeSync {
        fn calls(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    struct Fixture {
        _dir: TempDir,
        source: PathBuf,
        target: PathBuf,
    }

    fn fixture(existing: &[&str]) -> Fixture {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        let target = dir.path().join("target");
        fs::create_dir(&source).unwrap();
        fs::create_dir(&target).unwrap();
        for name in existing {
            fs::create_dir(target.join(name)).unwrap();
        }
        let source = source.canonicalize().unwrap();
        let target = target.canonicalize().unwrap();

        Fixture {
            _dir: dir,
            source,
            target,
        }
    }

    impl Fixture {
        fn task(&self, retention_count: usize) -> BackupTask {
            BackupTask {
                name: "test".to_string(),
                source_path: self.source.clone(),
                target_root: self.target.clone(),
                retention_count,
                excludes: vec![],
            }
        }

        fn snapshots(&self) -> Vec<String> {
            list_snapshots(&self.target)
                .unwrap()
                .iter()
                .map(|s| s.name().to_string())
                .collect()
        }
    }

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    const EXISTING: [&str; 3] = [
        "20240101_0000-backup",
        "20240102_0000-backup",
        "20240103_0000-backup",
    ];

    #[test]
    fn first_snapshot() {
        let fx = fixture(&[]);
        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default());

        let report = rotation.run_at(&fx.task(3), day(1), false).unwrap();

        assert_eq!(report.snapshot, fx.target.join("20240101_0000-backup"));
        assert_eq!(report.link_reference, None);
        assert!(report.pruned.is_empty());
        assert!(report.snapshot.join(COMPLETION_MARKER).is_file());
        assert_eq!(fx.snapshots(), ["20240101_0000-backup"]);
        assert_eq!(sync.requests.borrow()[0].0, fx.source);
    }

    #[test]
    fn rotates_oldest_out() {
        let fx = fixture(&EXISTING);
        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default());

        let report = rotation.run_at(&fx.task(3), day(4), false).unwrap();

        assert_eq!(report.link_reference, Some(fx.target.join("20240103_0000-backup")));
        assert_eq!(report.pruned, [fx.target.join("20240101_0000-backup")]);
        assert_eq!(
            fx.snapshots(),
            [
                "20240102_0000-backup",
                "20240103_0000-backup",
                "20240104_0000-backup"
            ]
        );
    }

    #[test]
    fn prunes_everything_beyond_count() {
        let fx = fixture(&EXISTING);
        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default());

        let report = rotation.run_at(&fx.task(2), day(4), false).unwrap();

        assert_eq!(
            report.pruned,
            [
                fx.target.join("20240101_0000-backup"),
                fx.target.join("20240102_0000-backup")
            ]
        );
        assert_eq!(fx.snapshots(), ["20240103_0000-backup", "20240104_0000-backup"]);
    }

    #[test]
    fn duplicate_within_same_minute() {
        let fx = fixture(&EXISTING);
        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default());
        let now = day(4);

        rotation.run_at(&fx.task(4), now, false).unwrap();
        let before = fx.snapshots();

        let later_in_minute = now + chrono::TimeDelta::seconds(42);
        let err = rotation.run_at(&fx.task(1), later_in_minute, false).unwrap_err();

        assert!(matches!(
            err,
            BackupError::DuplicateSnapshot(ref p) if p == &fx.target.join("20240104_0000-backup")
        ));
        assert_eq!(fx.snapshots(), before);
        assert_eq!(sync.calls(), 1);
    }

    #[test]
    fn nested_target_is_refused_before_sync() {
        let dir = tempdir().unwrap();
        let user = dir.path().join("home/user");
        let backup = user.join("backup");
        fs::create_dir_all(&backup).unwrap();

        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default());
        let task = BackupTask {
            name: "nested".to_string(),
            source_path: user,
            target_root: backup,
            retention_count: 1,
            excludes: vec![],
        };

        let err = rotation.run_at(&task, day(1), false).unwrap_err();
        assert!(matches!(err, BackupError::NestedPath { .. }));
        assert_eq!(sync.calls(), 0);

        let same = BackupTask {
            target_root: task.source_path.clone(),
            ..task
        };
        assert!(matches!(
            rotation.run_at(&same, day(1), false),
            Err(BackupError::NestedPath { .. })
        ));
    }

    #[test]
    fn nesting_is_decided_per_component() {
        assert!(is_nested(Path::new("/home/user/backup"), Path::new("/home/user")));
        assert!(is_nested(Path::new("/home/user"), Path::new("/home/user")));
        assert!(!is_nested(Path::new("/home/user2"), Path::new("/home/user")));
        assert!(!is_nested(Path::new("/home"), Path::new("/home/user")));
        assert!(!is_nested(Path::new("/mnt/backup"), Path::new("/")));
    }

    #[test]
    fn nested_through_symlink() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        fs::create_dir_all(source.join("nested")).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(source.join("nested"), &link).unwrap();

        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default());
        let task = BackupTask {
            name: "link".to_string(),
            source_path: source,
            target_root: link,
            retention_count: 1,
            excludes: vec![],
        };

        assert!(matches!(
            rotation.run_at(&task, day(1), false),
            Err(BackupError::NestedPath { .. })
        ));
        assert_eq!(sync.calls(), 0);
    }

    #[test]
    fn missing_paths() {
        let fx = fixture(&[]);
        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default());

        let task = BackupTask {
            source_path: fx.source.join("missing"),
            ..fx.task(1)
        };
        assert!(matches!(
            rotation.run_at(&task, day(1), false),
            Err(BackupError::PathNotFound { role: PathRole::Source, .. })
        ));

        let task = BackupTask {
            target_root: fx.target.join("missing"),
            ..fx.task(1)
        };
        assert!(matches!(
            rotation.run_at(&task, day(1), false),
            Err(BackupError::PathNotFound { role: PathRole::Target, .. })
        ));
        assert_eq!(sync.calls(), 0);
    }

    #[test]
    fn zero_retention_is_refused() {
        let fx = fixture(&EXISTING);
        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default());

        assert!(matches!(
            rotation.run_at(&fx.task(0), day(4), false),
            Err(BackupError::InvalidRetentionCount(_))
        ));
        assert!(matches!(
            rotation.prune(&fx.task(0), false),
            Err(BackupError::InvalidRetentionCount(_))
        ));
        assert_eq!(sync.calls(), 0);
        assert_eq!(fx.snapshots(), EXISTING);
    }

    #[test]
    fn failed_sync_prunes_nothing() {
        let fx = fixture(&EXISTING);
        let sync = FakeSync {
            fail: true,
            ..Default::default()
        };
        let rotation = Rotation::new(&sync, SnapshotNamer::default());

        let err = rotation.run_at(&fx.task(1), day(4), false).unwrap_err();
        assert!(matches!(err, BackupError::SyncFailed(SyncError::Failed { code: Some(23), .. })));
        assert_eq!(fx.snapshots(), EXISTING);
    }

    #[test]
    fn missing_snapshot_after_sync() {
        let fx = fixture(&EXISTING);
        let sync = FakeSync {
            skip_create: true,
            ..Default::default()
        };
        let rotation = Rotation::new(&sync, SnapshotNamer::default());

        assert!(matches!(
            rotation.run_at(&fx.task(1), day(4), false),
            Err(BackupError::SnapshotMissing(_))
        ));
        assert_eq!(fx.snapshots(), EXISTING);
    }

    #[test]
    fn links_against_newest_complete_snapshot() {
        let fx = fixture(&EXISTING);
        File::create(fx.target.join("20240102_0000-backup").join(COMPLETION_MARKER)).unwrap();
        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default());

        let report = rotation.run_at(&fx.task(5), day(4), false).unwrap();

        assert_eq!(report.link_reference, Some(fx.target.join("20240102_0000-backup")));
        // incomplete snapshots are kept unless asked to discard them
        assert!(report.discarded.is_empty());
        assert_eq!(fx.snapshots().len(), 4);
    }

    #[test]
    fn discards_interrupted_snapshots() {
        let fx = fixture(&EXISTING);
        File::create(fx.target.join("20240102_0000-backup").join(COMPLETION_MARKER)).unwrap();
        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default()).discard_incomplete(true);

        let report = rotation.run_at(&fx.task(5), day(4), false).unwrap();

        assert_eq!(report.discarded, [fx.target.join("20240103_0000-backup")]);
        assert_eq!(report.link_reference, Some(fx.target.join("20240102_0000-backup")));
        assert_eq!(
            fx.snapshots(),
            [
                "20240101_0000-backup",
                "20240102_0000-backup",
                "20240104_0000-backup"
            ]
        );
    }

    #[test]
    fn keeps_unmarked_snapshots_without_any_complete_one() {
        let fx = fixture(&EXISTING);
        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default()).discard_incomplete(true);

        let report = rotation.run_at(&fx.task(5), day(4), false).unwrap();

        assert!(report.discarded.is_empty());
        assert_eq!(report.link_reference, Some(fx.target.join("20240103_0000-backup")));
    }

    #[test]
    fn dry_run_changes_nothing() {
        let fx = fixture(&EXISTING);
        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default());

        let report = rotation.run_at(&fx.task(2), day(4), true).unwrap();

        assert_eq!(report.snapshot, fx.target.join("20240104_0000-backup"));
        assert_eq!(
            report.pruned,
            [
                fx.target.join("20240101_0000-backup"),
                fx.target.join("20240102_0000-backup")
            ]
        );
        assert_eq!(fx.snapshots(), EXISTING);
        assert_eq!(sync.calls(), 1);
    }

    #[test]
    fn root_source_is_not_nested() {
        let fx = fixture(&[]);
        let sync = FakeSync::default();
        let rotation = Rotation::new(&sync, SnapshotNamer::default());
        let task = BackupTask {
            source_path: PathBuf::from(ROOT_PATH),
            ..fx.task(1)
        };

        let report = rotation.run_at(&task, day(1), true).unwrap();
        assert_eq!(report.snapshot, fx.target.join("20240101_0000-backup"));
        assert_eq!(sync.requests.borrow()[0].0, Path::new(ROOT_PATH));
    }

    #[test]
    fn prune_only() {
        let fx = fixture(&EXISTING);
        let rotation = Rotation::new(FakeSync::default(), SnapshotNamer::default());

        assert_eq!(
            rotation.prune(&fx.task(2), true).unwrap(),
            [fx.target.join("20240101_0000-backup")]
        );
        assert_eq!(fx.snapshots(), EXISTING);

        rotation.prune(&fx.task(2), false).unwrap();
        assert_eq!(fx.snapshots(), EXISTING[1..]);

        // nothing left to prune
        assert!(rotation.prune(&fx.task(2), false).unwrap().is_empty());
    }

    #[test]
    fn prune_refuses_symlinked_snapshot() {
        let fx = fixture(&EXISTING[1..]);
        let elsewhere = fx._dir.path().join("elsewhere");
        fs::create_dir(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, fx.target.join("20240101_0000-backup")).unwrap();

        let rotation = Rotation::new(FakeSync::default(), SnapshotNamer::default());
        let err = rotation.prune(&fx.task(2), false).unwrap_err();

        assert!(matches!(
            err,
            BackupError::PruneFailed { ref path, .. } if path == &fx.target.join("20240101_0000-backup")
        ));
        assert!(elsewhere.is_dir());
    }
}
