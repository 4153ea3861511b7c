use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDateTime;
use derive_more::{Display, Error};

use super::SNAPSHOT_SUFFIX;

/// Default timestamp of a snapshot: `{YEAR}{MONTH}{DAY}_{HOUR}{MINUTE}`.
///
/// Snapshots can be taken as often as once per minute.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M";

/// The timestamp format can't be used to name snapshot directories.
#[derive(Debug, Display, Error)]
pub enum InvalidNameFormat {
    /// The format contains unknown strftime specifiers.
    #[display("Invalid timestamp format: {_0:?}")]
    Specifier(#[error(ignore)] String),
    /// The format would produce nested directories.
    #[display("Timestamp format must not contain path separators: {_0:?}")]
    PathSeparator(#[error(ignore)] String),
}

/// Generates snapshot directory names from timestamps.
#[derive(Debug, Clone)]
pub struct SnapshotNamer {
    format: String,
}

impl Default for SnapshotNamer {
    fn default() -> Self {
        Self {
            format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

impl SnapshotNamer {
    /// Create a namer using the strftime `format`.
    ///
    /// The format has to order lexicographically like the timestamps it encodes,
    /// which can't be checked here.
    pub fn new(format: &str) -> Result<Self, InvalidNameFormat> {
        if format.is_empty() || StrftimeItems::new(format).any(|item| item == Item::Error) {
            return Err(InvalidNameFormat::Specifier(format.to_string()));
        }
        if format.contains(std::path::is_separator) {
            return Err(InvalidNameFormat::PathSeparator(format.to_string()));
        }
        // time zone items are valid specifiers but can't format a naive timestamp
        if write!(String::new(), "{}", NaiveDateTime::UNIX_EPOCH.format(format)).is_err() {
            return Err(InvalidNameFormat::Specifier(format.to_string()));
        }

        Ok(Self {
            format: format.to_string(),
        })
    }

    /// The strftime format of the timestamp part.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Name of the snapshot taken at `now`.
    pub fn next_name(&self, now: &NaiveDateTime) -> String {
        format!("{}{SNAPSHOT_SUFFIX}", now.format(&self.format))
    }
}
