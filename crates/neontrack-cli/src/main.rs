//! Neontrack CLI - replay recorded player sessions through the tracker
//!
//! Features:
//! - Replay a scripted player event sequence and show every tracking request
//! - Dry runs against an in-memory transport
//! - Effective configuration dump
//! - Raw event alias listing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Neontrack CLI - Playback event tracking toolkit
#[derive(Parser)]
#[command(name = "neontrack")]
#[command(version)]
#[command(about = "Replay player events through the Neon tracking engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, global = true, default_value = "text")]
    format: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scripted player session
    Replay {
        /// Path to the replay script (JSON)
        script: PathBuf,

        /// Tracker configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Record requests instead of sending them
        #[arg(long)]
        dry_run: bool,

        /// Wait for deferred deliveries before exiting
        #[arg(long)]
        drain: bool,
    },

    /// Show the effective tracker configuration
    Config {
        /// Tracker configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List raw player events and the tracking events they feed
    Events,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    let subscriber = tracing_subscriber::fmt().with_env_filter(level).with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    neontrack_core::init();

    match cli.command {
        Commands::Replay { script, config, dry_run, drain } => {
            commands::replay(&script, config.as_deref(), dry_run, drain, &cli.format).await?;
        }
        Commands::Config { config } => {
            commands::show_config(config.as_deref(), &cli.format)?;
        }
        Commands::Events => {
            commands::list_events(&cli.format);
        }
    }

    Ok(())
}
