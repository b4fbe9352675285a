//! Backup management CLI for cmsvs-rs.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use cmsvs_backup::{BackupKind, BackupManager, BackupStatus};
use cmsvs_common::{AppResult, Clock, Config};
use tracing::error;

#[derive(Parser)]
#[command(name = "cmsvs-backup", about = "Backup and recovery for CMSVS", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the database.
    BackupDb {
        /// Backup name (defaults to a timestamped one).
        #[arg(long)]
        name: Option<String>,
    },
    /// Archive uploaded files.
    BackupFiles {
        #[arg(long)]
        name: Option<String>,
    },
    /// Archive configuration files.
    BackupConfig {
        #[arg(long)]
        name: Option<String>,
    },
    /// Run database, files and config backups together.
    BackupFull {
        #[arg(long)]
        name: Option<String>,
    },
    /// Restore the database from a dump.
    RestoreDb {
        /// Dump file; relative paths resolve against the database backup directory.
        #[arg(long)]
        file: String,
    },
    /// List recorded backups.
    List {
        /// Restrict to one backup type.
        #[arg(long = "type", value_enum)]
        kind: Option<BackupKind>,
    },
    /// Delete backups older than the retention window.
    Cleanup {
        /// Override the configured retention window.
        #[arg(long)]
        retention_days: Option<i64>,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> AppResult<()> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| cmsvs_common::AppError::Fatal(format!("failed to encode output: {e}")))?;
    println!("{out}");
    Ok(())
}

async fn run(cli: Cli) -> AppResult<bool> {
    let config = Config::load()?;
    let clock = Clock::new(config.timezone.offset_hours);

    let file_sources = vec![
        PathBuf::from(&config.uploads.root),
        PathBuf::from("logs"),
        PathBuf::from("static"),
    ];
    let config_sources = vec![
        PathBuf::from("config/default.toml"),
        PathBuf::from("config/production.toml"),
        PathBuf::from(".env"),
    ];

    let manager = BackupManager::new(
        &config.backup.root,
        &config.database.url,
        file_sources,
        config_sources,
        clock,
    )?;

    match cli.command {
        Commands::BackupDb { name } => {
            let record = manager.backup_db(name.as_deref()).await?;
            print_json(&record)?;
            Ok(record.status == BackupStatus::Success)
        }
        Commands::BackupFiles { name } => {
            let record = manager.backup_files(name.as_deref())?;
            print_json(&record)?;
            Ok(record.status == BackupStatus::Success)
        }
        Commands::BackupConfig { name } => {
            let record = manager.backup_config(name.as_deref())?;
            print_json(&record)?;
            Ok(record.status == BackupStatus::Success)
        }
        Commands::BackupFull { name } => {
            let report = manager.backup_full(name.as_deref()).await?;
            print_json(&report)?;
            // A partial full backup still leaves usable artefacts.
            Ok(report.status != BackupStatus::Failed)
        }
        Commands::RestoreDb { file } => {
            manager.restore_db(&file).await?;
            Ok(true)
        }
        Commands::List { kind } => {
            let records = manager.list(kind)?;
            print_json(&records)?;
            Ok(true)
        }
        Commands::Cleanup { retention_days } => {
            let days = retention_days.unwrap_or(config.backup.retention_days);
            let report = manager.cleanup(days)?;
            print_json(&report)?;
            Ok(report.errors.is_empty())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Backup command failed");
            ExitCode::FAILURE
        }
    }
}
