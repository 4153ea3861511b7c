//! Configuration of the backup tasks.
//!
//! The configuration is read once per process from a TOML file:
//!
//! ```toml
//! [rotation]
//! timestamp_format = "%Y%m%d_%H%M"
//!
//! [rsync]
//! sudo = true
//!
//! [[tasks]]
//! name = "home"
//! uuid = "5d2c1a3e-8a4f-4b6e-9c1d-0e7f3a2b1c4d"
//! source = "~/"
//! target = "backups/home"
//! count = 7
//! exclude = [".cache", "Downloads"]
//! ```
//!
//! Every task is resolved into a [BackupTask]. Problems are reported as
//! [ConfigIssue]s: [Recoverable](Severity::Recoverable) ones skip a single
//! task, [Fatal](Severity::Fatal) ones abort the whole run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error};

use crate::backends::Rsync;
use crate::rotation::BackupTask;
use crate::snapshot::{InvalidNameFormat, SnapshotNamer, DEFAULT_TIMESTAMP_FORMAT};
use crate::util::path::expand_user;

mod device;

pub use device::{DeviceLocator, FindMnt};

/// Configuration file used if none is given.
pub const DEFAULT_CONFIG_FILE: &str = "backup.toml";

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
/// Configuration of a whole backup run.
pub struct BackupConfig {
    /// Naming and rotation of snapshots.
    #[serde(default)]
    pub rotation: RotationConfig,

    /// Configuration of the [Rsync] backend.
    #[serde(default)]
    pub rsync: Rsync,

    /// Backup tasks, run in order.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// Configures naming and rotation of snapshots.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct RotationConfig {
    /// strftime format of the snapshot timestamp.
    ///
    /// Has to sort alphabetically in chronological order.
    pub timestamp_format: String,

    /// Remove snapshots of interrupted runs before taking a new one.
    ///
    /// Only snapshots without completion marker that are newer than the
    /// newest complete snapshot are removed.
    pub discard_incomplete: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            discard_incomplete: false,
        }
    }
}

/// A single backup task as written in the configuration file.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
pub struct TaskConfig {
    /// Name of the task used in messages.
    pub name: String,

    /// Filesystem UUID of the backup device.
    pub uuid: Option<String>,

    /// Directory to back up.
    pub source: Option<PathBuf>,

    /// Directory holding the snapshots, relative to the device mount point.
    pub target: Option<PathBuf>,

    /// Number of snapshots to keep.
    pub count: Option<i64>,

    /// A single exclude pattern or a list of them.
    pub exclude: Option<toml::Value>,
}

/// How to proceed after a [ConfigIssue].
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum Severity {
    /// Only the affected task is skipped.
    #[display("notice")]
    Recoverable,
    /// The whole run is aborted.
    #[display("error")]
    Fatal,
}

/// Kinds of problems in the configuration.
#[derive(Debug, Display)]
pub enum ConfigIssueKind {
    #[display("Missing configuration file {}", _0.display())]
    Missing(PathBuf),
    #[display("Reading the config file {} failed: {_1}", _0.display())]
    Read(PathBuf, io::Error),
    #[display("Parsing the config file failed: {_0}")]
    Parse(toml::de::Error),
    #[display("Invalid snapshot naming: {_0}")]
    Naming(InvalidNameFormat),
    #[display("Missing option {_0:?}")]
    MissingOption(&'static str),
    #[display("UUID {_0:?} not found")]
    DeviceNotFound(String),
    #[display("Looking up device {_0:?} failed: {_1}")]
    DeviceLookup(String, io::Error),
    #[display("Missing source path {}", _0.display())]
    MissingSource(PathBuf),
    #[display("Missing target path {}", _0.display())]
    MissingTarget(PathBuf),
    #[display("Exclude: Couldn't read excludes")]
    UnreadableExcludes,
    #[display("Invalid backup count {_0}")]
    InvalidCount(i64),
}

/// A problem found in the configuration.
#[derive(Debug, Display, Error)]
#[display("{}{kind}", section.as_ref().map(|s| format!("[{s}] ")).unwrap_or_default())]
pub struct ConfigIssue {
    pub severity: Severity,
    /// Name of the affected task.
    pub section: Option<String>,
    pub kind: ConfigIssueKind,
}

impl ConfigIssue {
    pub fn notice(section: &str, kind: ConfigIssueKind) -> Self {
        Self {
            severity: Severity::Recoverable,
            section: Some(section.to_string()),
            kind,
        }
    }

    pub fn fatal(section: Option<&str>, kind: ConfigIssueKind) -> Self {
        Self {
            severity: Severity::Fatal,
            section: section.map(str::to_string),
            kind,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

/// Tasks ready to run and the notices collected while resolving them.
#[derive(Debug, Default)]
pub struct ResolvedTasks {
    pub tasks: Vec<BackupTask>,
    pub notices: Vec<ConfigIssue>,
}

impl BackupConfig {
    /// Reads the configuration file at `path`.
    pub fn from_path(path: &Path) -> Result<Self, ConfigIssue> {
        if !path.is_file() {
            return Err(ConfigIssue::fatal(None, ConfigIssueKind::Missing(path.to_path_buf())));
        }
        let config_str = fs::read_to_string(path)
            .map_err(|e| ConfigIssue::fatal(None, ConfigIssueKind::Read(path.to_path_buf(), e)))?;
        log::debug!(target: "config", "Read config file {}", path.display());

        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self, ConfigIssue> {
        toml::from_str(config_str).map_err(|e| ConfigIssue::fatal(None, ConfigIssueKind::Parse(e)))
    }

    /// The [SnapshotNamer] configured in [RotationConfig::timestamp_format].
    pub fn namer(&self) -> Result<SnapshotNamer, ConfigIssue> {
        SnapshotNamer::new(&self.rotation.timestamp_format)
            .map_err(|e| ConfigIssue::fatal(None, ConfigIssueKind::Naming(e)))
    }

    /// Resolves all tasks, locating their devices with `locator`.
    ///
    /// Tasks with a recoverable issue are skipped and the issue is collected
    /// in [ResolvedTasks::notices]. The first fatal issue is returned as error.
    pub fn resolve_tasks(&self, locator: &impl DeviceLocator) -> Result<ResolvedTasks, ConfigIssue> {
        let mut resolved = ResolvedTasks::default();

        for task in &self.tasks {
            match task.resolve(locator, &mut resolved.notices) {
                Ok(task) => resolved.tasks.push(task),
                Err(issue) if issue.is_fatal() => return Err(issue),
                Err(notice) => resolved.notices.push(notice),
            }
        }

        Ok(resolved)
    }
}

impl TaskConfig {
    fn resolve(
        &self,
        locator: &impl DeviceLocator,
        notices: &mut Vec<ConfigIssue>,
    ) -> Result<BackupTask, ConfigIssue> {
        let section = self.name.as_str();
        let missing = |option| ConfigIssue::notice(section, ConfigIssueKind::MissingOption(option));

        // 1. device
        let uuid = self.uuid.as_deref().ok_or_else(|| missing("uuid"))?;
        let device_path = locator
            .mount_point(uuid)
            .map_err(|e| {
                ConfigIssue::fatal(Some(section), ConfigIssueKind::DeviceLookup(uuid.to_string(), e))
            })?
            .ok_or_else(|| {
                ConfigIssue::notice(section, ConfigIssueKind::DeviceNotFound(uuid.to_string()))
            })?;

        // 2. source
        let source_path = expand_user(self.source.as_deref().ok_or_else(|| missing("source"))?);
        if !source_path.exists() {
            return Err(ConfigIssue::fatal(
                Some(section),
                ConfigIssueKind::MissingSource(source_path),
            ));
        }

        // 3. target
        let target = self.target.as_deref().ok_or_else(|| missing("target"))?;
        let target_root = expand_user(&device_path.join(target));
        if !target_root.exists() {
            return Err(ConfigIssue::fatal(
                Some(section),
                ConfigIssueKind::MissingTarget(target_root),
            ));
        }

        // 4. excludes
        let excludes = match &self.exclude {
            None => Vec::new(),
            Some(exclude) => parse_excludes(exclude).unwrap_or_else(|| {
                notices.push(ConfigIssue::notice(section, ConfigIssueKind::UnreadableExcludes));
                Vec::new()
            }),
        };

        // 5. rotation count
        let count = self.count.ok_or_else(|| missing("count"))?;
        let retention_count = usize::try_from(count).map_err(|_| {
            ConfigIssue::fatal(Some(section), ConfigIssueKind::InvalidCount(count))
        })?;

        Ok(BackupTask {
            name: self.name.clone(),
            source_path,
            target_root,
            retention_count,
            excludes,
        })
    }
}

/// Accepts either a single pattern or a list of patterns.
fn parse_excludes(exclude: &toml::Value) -> Option<Vec<String>> {
    match exclude {
        toml::Value::String(pattern) => Some(vec![pattern.clone()]),
        toml::Value::Array(patterns) => patterns
            .iter()
            .map(|pattern| pattern.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}
