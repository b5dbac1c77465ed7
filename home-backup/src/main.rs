//! home-backup - Main entry point
//!
//! Full and incremental backups of a home directory, restore of the latest
//! backup, and a periodic worker tying both together.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use home_backup::daemon::{BackupKind, BackupWorker, ShutdownCoordinator, WORKER_LOG_FILE};
use home_backup::executor::RestoreProcedure;
use home_backup::initiation::RestoreLogStrategy;
use home_backup::volume::ZipVolume;
use home_backup::{utils, Config};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a single backup
    Backup {
        /// Full backup (the default)
        #[arg(long, conflicts_with = "incremental")]
        full: bool,

        /// Only files changed since the latest backup
        #[arg(long)]
        incremental: bool,
    },
    /// Restore the latest backup into the home directory
    Restore {
        /// Replace files already present
        #[arg(long)]
        overwrite: bool,
    },
    /// Run the periodic backup worker until SIGINT or SIGTERM
    Run,
    /// List stored containers and the latest backup
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    let worker_log = match &args.command {
        Command::Run if config.log.worker_log => Some(config.home.root.join(WORKER_LOG_FILE)),
        _ => None,
    };
    utils::logger::init(log_level, worker_log.as_deref())?;

    tracing::info!(
        "Starting home-backup v{} (home: {})",
        env!("CARGO_PKG_VERSION"),
        config.home.root.display()
    );

    match args.command {
        Command::Backup { full, incremental } => {
            let kind = if incremental && !full {
                BackupKind::Incremental
            } else {
                BackupKind::Full
            };
            backup(&config, kind).await
        }
        Command::Restore { overwrite } => restore(&config, overwrite).await,
        Command::Run => run(&config).await,
        Command::List => list(&config).await,
    }
}

fn worker(config: &Config) -> Result<BackupWorker> {
    Ok(BackupWorker::new(
        config.worker_settings()?,
        Arc::new(ZipVolume),
        config.build_scope()?,
        config.build_storage(),
    ))
}

async fn backup(config: &Config, kind: BackupKind) -> Result<()> {
    let worker = worker(config)?;

    if kind == BackupKind::Incremental && !worker.load_status_from_manifest().await? {
        anyhow::bail!("No full backup to base an incremental backup on");
    }

    let time = worker.run_backup(kind).await?;
    tracing::info!("{} backup taken at {}", kind, time);
    Ok(())
}

async fn restore(config: &Config, overwrite: bool) -> Result<()> {
    let strategy = Arc::new(RestoreLogStrategy::new());
    let settings = config.worker_settings()?;

    let restored = RestoreProcedure::new(
        Arc::new(ZipVolume),
        config.build_scope()?,
        Some(config.build_storage()),
        strategy.clone(),
        &settings.root,
    )
    .with_scratch_dir(&settings.scratch_dir)
    .with_overwrite(overwrite || settings.overwrite)
    .with_max_concurrent_fetches(settings.max_concurrent_fetches)
    .perform_restore()
    .await?;

    match restored {
        Some(id) if strategy.restart_required() => {
            tracing::warn!("Restored {}, restart any process using the home directory", id)
        }
        Some(id) => tracing::info!("Restored {}", id),
        None => tracing::info!("Nothing to restore"),
    }
    Ok(())
}

async fn run(config: &Config) -> Result<()> {
    let worker = worker(config)?;

    if config.restore.auto_restore {
        worker.auto_restore().await.context("Auto restore failed")?;
    } else {
        worker.load_status().await?;
    }

    if !config.backup.enabled {
        tracing::info!("Backups disabled, exiting");
        return Ok(());
    }

    // Create shutdown coordinator
    let shutdown_coordinator = ShutdownCoordinator::new();
    let shutdown = shutdown_coordinator.token();
    let signal_handle = tokio::spawn(async move { shutdown_coordinator.wait_for_signal().await });

    worker.run_periodic(shutdown).await;

    match signal_handle.await {
        Ok(Ok(())) => tracing::info!("Shutdown complete"),
        Ok(Err(e)) => tracing::error!("Signal handling failed: {}", e),
        Err(e) => tracing::error!("Signal task panicked: {}", e),
    }
    Ok(())
}

async fn list(config: &Config) -> Result<()> {
    let storage = config.build_storage();
    let (files, latest) = tokio::task::spawn_blocking(move || -> home_backup::Result<_> {
        Ok((storage.list_files()?, storage.find_latest_backup()?))
    })
    .await??;

    println!("Stored containers:");
    for file in &files {
        println!("  {}", file);
    }

    match latest {
        Some(names) if !names.is_empty() => {
            println!("Latest backup:");
            for name in names {
                println!("  {}", name);
            }
        }
        _ => println!("No backup recorded"),
    }
    Ok(())
}
