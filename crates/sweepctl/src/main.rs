//! Sweep Control - CLI for the host maintenance engine.
//!
//! Drives one maintenance run, regenerates reports from finalized
//! sessions, lists past sessions, and rolls back recorded changes.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweepctl")]
#[command(about = "Sweep - Unattended host maintenance", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the task catalog once
    Run {
        /// Report what would be done without mutating anything
        #[arg(long)]
        dry_run: bool,

        /// Catalog file (defaults to catalog.toml in the data directory)
        #[arg(long)]
        catalog: Option<std::path::PathBuf>,
    },

    /// Render the consolidated report for a session
    Report {
        /// Session identifier (see `sweepctl sessions`)
        session_id: String,

        /// Emit the canonical report schema as JSON
        #[arg(long)]
        json: bool,
    },

    /// Roll back the changes a session recorded, most recent first
    Undo {
        session_id: String,
    },

    /// List finished sessions
    Sessions,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { dry_run, catalog } => commands::run(dry_run, catalog).await,
        Commands::Report { session_id, json } => commands::report(&session_id, json),
        Commands::Undo { session_id } => commands::undo(&session_id),
        Commands::Sessions => commands::sessions(),
    }
}
