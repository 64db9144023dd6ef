//! terra - neurobooth file-transfer ledger
//!
//! Batch driver for discovery, copy, verification and deletion of session
//! recordings. Meant to be run from cron; every command is safe to re-run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use terra_core::config::TerraConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// terra - neurobooth file-transfer ledger
#[derive(Parser, Debug)]
#[command(name = "terra")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "terra.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging] level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // === Ledger tables ===
    /// Create the ledger and manifest tables
    Init,

    /// List tables and their columns
    Tables,

    /// Prefix manifest paths with their session folder
    FixPrefix,

    // === Dataflow ===
    /// Record manifest files present at their primary location
    Write {
        /// Primary location (defaults to [write] dest_dir)
        #[arg(long)]
        dest_dir: Option<PathBuf>,

        /// Only files whose name starts with this session prefix
        #[arg(long)]
        session: Option<String>,
    },

    /// Mirror one directory, or every session folder per [copy]
    Copy {
        /// Directory to mirror
        #[arg(long, requires = "dest_dir")]
        src_dir: Option<PathBuf>,

        /// Destination root
        #[arg(long, requires = "src_dir")]
        dest_dir: Option<PathBuf>,
    },

    /// Verify pending copies without transferring anything
    Verify {
        /// Discard pending rows that do not match their source
        #[arg(long)]
        recover: bool,
    },

    /// Free space on the [delete] target volume
    Delete {
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

fn load_config(path: &Path) -> Result<TerraConfig> {
    if path.exists() {
        TerraConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))
    } else {
        Ok(TerraConfig::default())
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    if let Some(log_file) = log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("failed to open log file {}", log_file.display()))?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, config.logging.file.as_deref())?;
    if !cli.config.exists() {
        tracing::info!(config = %cli.config.display(), "configuration file not found, using defaults");
    }

    let ws = commands::Workspace::open(config)?;
    match cli.command {
        Commands::Init => commands::tables::init(&ws),
        Commands::Tables => commands::tables::list(&ws),
        Commands::FixPrefix => commands::tables::fix_prefix(&ws),
        Commands::Write { dest_dir, session } => {
            commands::dataflow::write(&ws, dest_dir.as_deref(), session.as_deref())
        },
        Commands::Copy { src_dir, dest_dir } => match (src_dir, dest_dir) {
            (Some(src_dir), Some(dest_dir)) => commands::dataflow::copy(&ws, &src_dir, &dest_dir),
            _ => commands::dataflow::copy_sessions(&ws),
        },
        Commands::Verify { recover } => commands::dataflow::verify(&ws, recover),
        Commands::Delete { dry_run } => commands::dataflow::delete(&ws, dry_run),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_copy_requires_both_dirs() {
        let err = Cli::try_parse_from(["terra", "copy", "--src-dir", "/nas"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let cli = Cli::try_parse_from(["terra", "copy"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Copy {
                src_dir: None,
                dest_dir: None
            }
        ));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "terra",
            "--config",
            "/etc/terra.toml",
            "--log-level",
            "debug",
            "delete",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/terra.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Delete { dry_run: true }));
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::TempDir::new().expect("failed to create temp dir");
        let config = load_config(&dir.path().join("terra.toml")).unwrap();
        assert_eq!(config, TerraConfig::default());

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[delete]\nthreshold = 2.0\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
