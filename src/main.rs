//! fdfs - Command-line client for FastDFS
//!
//! One-shot commands for uploading, downloading and inspecting files
//! through a tracker cluster.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use fdfs_client::{ClientConfig, ConfigError};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fdfs")]
#[command(about = "Command-line client for FastDFS")]
#[command(version)]
struct Cli {
    /// YAML configuration file (defaults to $FDFS_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// client.conf style configuration file
    #[arg(long, conflicts_with = "config")]
    ini: Option<PathBuf>,

    /// Tracker address (host:port), may be repeated
    #[arg(short, long = "tracker")]
    trackers: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a local file
    Upload {
        /// Local file path
        path: PathBuf,

        /// Target group (tracker picks one if omitted)
        #[arg(short, long)]
        group: Option<String>,

        /// Extension to store (defaults to the local one)
        #[arg(short, long)]
        ext: Option<String>,

        /// Metadata entry, may be repeated
        #[arg(short, long, value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Upload a local file as an appender file
    UploadAppender {
        /// Local file path
        path: PathBuf,

        /// Target group (tracker picks one if omitted)
        #[arg(short, long)]
        group: Option<String>,

        /// Extension to store (defaults to the local one)
        #[arg(short, long)]
        ext: Option<String>,

        /// Metadata entry, may be repeated
        #[arg(short, long, value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Download a file
    Download {
        /// File id (group/remote_filename)
        file_id: String,

        /// Local destination path
        dest: PathBuf,

        /// Byte offset to start from
        #[arg(long, default_value = "0")]
        offset: u64,

        /// Bytes to read (0 reads to the end)
        #[arg(long, default_value = "0")]
        length: u64,
    },

    /// Delete a file
    Delete {
        /// File id (group/remote_filename)
        file_id: String,
    },

    /// Show source node, size, creation time and CRC32 of a file
    Info {
        /// File id (group/remote_filename)
        file_id: String,
    },

    /// Show the metadata of a file
    Meta {
        /// File id (group/remote_filename)
        file_id: String,
    },

    /// Set metadata on a file
    SetMeta {
        /// File id (group/remote_filename)
        file_id: String,

        /// Metadata entries
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,

        /// Merge with existing metadata instead of replacing it
        #[arg(long)]
        merge: bool,
    },

    /// List all groups
    Groups,

    /// List the storage nodes of a group
    Storages {
        /// Group name
        group: String,

        /// Only the node with this IP
        #[arg(long)]
        ip: Option<String>,
    },

    /// Generate an HTTP anti-steal token
    Token {
        /// Remote filename (without the group)
        remote_filename: String,

        /// Secret key (defaults to the configured one)
        #[arg(long)]
        secret: Option<String>,

        /// Unix timestamp (defaults to now)
        #[arg(long)]
        ts: Option<i64>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(1);
        }
    };

    match commands::execute(&config, cli.command).await {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Resolves configuration from --ini, --config or the environment, then
/// applies --tracker.
fn load_config(cli: &Cli) -> Result<ClientConfig, ConfigError> {
    let mut config = if let Some(path) = &cli.ini {
        ClientConfig::from_ini_file(path)?
    } else if let Some(path) = &cli.config {
        let mut config = ClientConfig::from_file(path)?;
        config.apply_env_overrides();
        config
    } else {
        ClientConfig::load()?
    };

    if !cli.trackers.is_empty() {
        config.tracker_servers = cli.trackers.clone();
    }
    tracing::debug!("Effective configuration:\n{}", config.summary());

    Ok(config)
}
