//! DocShelf CLI — the main entry point.
//!
//! Commands:
//! - `chat`   — Interactive session or single-message mode
//! - `config` — Show the resolved configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "docshelf",
    about = "DocShelf — chat with a shelf of documents, spreadsheets, and media",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat over your attached files
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Attach a local file before the first message (repeatable)
        #[arg(short, long)]
        file: Vec<PathBuf>,

        /// Attach a URL before the first message (repeatable)
        #[arg(short, long)]
        url: Vec<String>,

        /// Reasoning depth: minimal, low, medium, or high
        #[arg(short, long)]
        depth: Option<String>,
    },

    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat { message, file, url, depth } => {
            commands::chat::run(message, file, url, depth).await?
        }
        Commands::Config => commands::config_cmd::run().await?,
    }

    Ok(())
}
