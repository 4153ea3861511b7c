use std::io;
use std::process::ExitCode;

use clap::Parser;
use rot_backup_lib::cli::{run_tasks, Cli};
use rot_backup_lib::config::{BackupConfig, FindMnt, DEFAULT_CONFIG_FILE};
use rot_backup_lib::rotation::Rotation;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    if let Err(e) = env_logger.try_init() {
        eprintln!("Initializing the logger failed: {e}");
    }

    if cli.config.as_os_str() == DEFAULT_CONFIG_FILE {
        log::info!("Using default configuration {DEFAULT_CONFIG_FILE:?}");
    }

    let (config, namer) = match BackupConfig::from_path(&cli.config).and_then(|cfg| {
        let namer = cfg.namer()?;
        Ok((cfg, namer))
    }) {
        Ok(config) => config,
        Err(e) => {
            log::error!(target: "config", "{e}");
            return ExitCode::FAILURE;
        }
    };

    let resolved = match config.resolve_tasks(&FindMnt) {
        Ok(resolved) => resolved,
        Err(e) => {
            log::error!(target: "config", "{e}");
            return ExitCode::FAILURE;
        }
    };
    for notice in &resolved.notices {
        log::warn!(target: "config", "{notice}");
    }

    if cli.dry_run {
        log::warn!("Running in dry-run mode");
    }

    let rotation = Rotation::new(&config.rsync, namer)
        .discard_incomplete(config.rotation.discard_incomplete);
    let tasks: Vec<_> = resolved
        .tasks
        .iter()
        .filter(|task| cli.selected(&task.name))
        .collect();

    let failed = run_tasks(&rotation, &tasks, cli.action, cli.dry_run, &mut io::stdout().lock());
    if failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
