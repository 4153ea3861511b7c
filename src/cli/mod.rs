use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use crate::config::DEFAULT_CONFIG_FILE;

mod run;

pub use run::run_tasks;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file describing the backup tasks.
    #[arg(default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Verbosity of the command output.
    #[arg(long, env = "ROT_BACKUP_LOG")]
    pub verbose: Option<LevelFilter>,

    /// Simulative backup run.
    #[arg(long)]
    pub dry_run: bool,

    /// What to do with the configured tasks.
    #[arg(long, short = 'a', value_enum, default_value_t = Action::Backup)]
    pub action: Action,

    /// Only process the tasks with the given name.
    #[arg(long = "task", short = 't')]
    pub tasks: Vec<String>,
}

#[derive(Copy, Clone, ValueEnum, Debug, Default, PartialEq, Eq)]
pub enum Action {
    /// Take a new snapshot and remove old ones. (Default)
    #[default]
    Backup,
    /// List the existing snapshots.
    List,
    /// Only remove snapshots exceeding the retention count.
    Prune,
}

impl Cli {
    /// Whether the task `name` was selected with `--task`.
    pub fn selected(&self, name: &str) -> bool {
        self.tasks.is_empty() || self.tasks.iter().any(|task| task == name)
    }
}
