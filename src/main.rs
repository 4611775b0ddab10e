use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use filetransfer::config::Config;
use filetransfer::network::{FileTransferClient, FileTransferServer};

/// Get system config file path
fn get_system_config_path() -> PathBuf {
    PathBuf::from("/etc/filetransfer/config.toml")
}

/// Get development config file path (fallback)
fn get_dev_config_path() -> PathBuf {
    PathBuf::from("config.toml")
}

/// Discover config file with priority order
fn discover_config(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    // Priority 1: CLI flag or FILETRANSFER_CONFIG
    if let Some(path) = cli_path {
        info!("Using config path: {}", path.display());
        return Some(path);
    }

    // Priority 2: System config
    let system_config = get_system_config_path();
    if system_config.exists() {
        return Some(system_config);
    }

    // Priority 3: Development config ./config.toml
    let dev_config = get_dev_config_path();
    if dev_config.exists() {
        warn!("Using development config: {}", dev_config.display());
        return Some(dev_config);
    }

    None
}

fn load_config(cli_path: Option<PathBuf>) -> Result<Config> {
    let config = match discover_config(cli_path) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            warn!("No config file found, using defaults");
            Config::default()
        }
    };

    config.validate()?;
    Ok(config)
}

#[derive(Parser)]
#[command(name = "filetransfer")]
#[command(about = "Upload, list and download files on a remote gRPC file store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true, env = "FILETRANSFER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server,

    /// Upload a file to the server
    Upload {
        /// File to upload
        path: PathBuf,
    },

    /// List files on the server
    List,

    /// Download a file from the server
    Get {
        /// Name of the stored file
        filename: String,
    },

    /// Write a default configuration file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "config.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match cli.command {
        Commands::Server => {
            let config = load_config(cli.config)?;
            run_server(config).await?;
        }

        Commands::Upload { path } => {
            let config = load_config(cli.config)?;
            let client = FileTransferClient::connect(&config.client).await?;
            let message = client.upload_file(&path).await?;
            println!("{}", message);
        }

        Commands::List => {
            let config = load_config(cli.config)?;
            list_files(&config).await?;
        }

        Commands::Get { filename } => {
            let config = load_config(cli.config)?;
            let client = FileTransferClient::connect(&config.client).await?;
            let path = client.download_file(&filename).await?;
            println!("Downloaded to {}", path.display());
        }

        Commands::InitConfig { path } => {
            Config::create_default(&path)?;
            info!("Default config written to {}", path.display());
        }
    }

    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    info!("Data directory: {}", config.storage.root_dir.display());
    info!("Chunk size: {} bytes", config.storage.chunk_size);

    FileTransferServer::from_config(&config).start().await
}

async fn list_files(config: &Config) -> Result<()> {
    let client = FileTransferClient::connect(&config.client).await?;
    let files = client.list_files().await?;

    println!("\nFiles:");
    println!("{:<40} {:<20} {:<20}", "Name", "Created", "Modified");
    println!("{}", "-".repeat(82));

    for file in files {
        println!(
            "{:<40} {:<20} {:<20}",
            file.name, file.creation_time, file.modification_time
        );
    }

    Ok(())
}
