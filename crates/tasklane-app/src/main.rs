//! TaskLane - turn tutorial videos into standard operating procedures
//!
//! Entry point for the `tasklane` command-line tool.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;
mod config;

use config::{AppConfig, Settings};

#[derive(Parser)]
#[command(
    name = "tasklane",
    version,
    about = "Generate step-by-step SOPs from tutorial videos",
    after_help = "EXAMPLES:\n  \
                  tasklane check-setup\n  \
                  tasklane run input_videos/demo.mp4\n  \
                  tasklane batch input_videos --keep-tombstones\n\n\
                  Settings can also be provided through environment variables or a .env file."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a single video
    Run {
        /// Video file to process
        video: PathBuf,
    },

    /// Process every video in a directory
    Batch {
        /// Directory to scan (defaults to --input-dir)
        dir: Option<PathBuf>,
    },

    /// Report which tools, models and directories are available
    CheckSetup,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; real environment variables take precedence.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = AppConfig::from_settings(&cli.settings);

    match cli.command {
        Commands::Run { video } => commands::run_video(&config, &video).await,
        Commands::Batch { dir } => commands::run_batch(&config, dir.as_deref()).await,
        Commands::CheckSetup => commands::check_setup(&config),
    }
}
