use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};
use weft_runtime::{Runtime, RuntimeConfig};

mod commands;

#[derive(Parser)]
#[command(name = "weft", about = "weft runtime -- load resources, materialize components, drive datastores")]
#[command(version)]
struct Cli {
    /// Runtime configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load resources and print each one as a line of JSON
    Load {
        /// Resource keys: paths under the asset root or absolute URLs
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Instantiate a component, initialize it and print the result
    Materialize {
        /// Component index, e.g. `card` or `card@2.0.0`
        index: String,
        /// JSON configuration for the instance; may contain dependency tuples
        #[arg(long)]
        data: Option<PathBuf>,
        /// Component manifest to register first (repeatable)
        #[arg(long = "manifest")]
        manifests: Vec<PathBuf>,
    },
    /// Read and write a datastore
    Store {
        /// Datastore settings descriptor (JSON)
        #[arg(long)]
        settings: PathBuf,
        /// Token passed to a remote service
        #[arg(long)]
        token: Option<String>,
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Print one dataset with its dependencies resolved
    Get {
        key: String,
        /// Print the dataset as stored
        #[arg(long)]
        raw: bool,
    },
    /// Merge a JSON object into the dataset with the same key
    Set {
        /// Dataset as a JSON object
        dataset: String,
    },
    /// Delete one dataset, or every dataset when no key is given
    Delete { key: Option<String> },
    /// Print the number of datasets
    Count,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output
    fmt()
        .with_env_filter(EnvFilter::from_env("WEFT_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default().with_env_overrides(),
    };
    tracing::debug!(asset_root = %config.asset_root.display(), "Runtime configured");
    let runtime = Runtime::new(config);

    match cli.command {
        Command::Load { keys } => commands::load(&runtime, keys).await,
        Command::Materialize {
            index,
            data,
            manifests,
        } => commands::materialize(&runtime, &index, data.as_deref(), &manifests).await,
        Command::Store {
            settings,
            token,
            action,
        } => commands::store(&runtime, &settings, token, action).await,
    }
}
