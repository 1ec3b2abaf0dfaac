//! Sensorhub Service - CSV upload and query API.
//!
//! Run with: `cargo run -p sensorhub-service`

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use sensorhub_service::{AppState, Config, UploadClient, api};
use sensorhub_store::Store;

/// Sensorhub Service - accepts sensor CSV uploads and serves them as JSON.
#[derive(Parser, Debug)]
#[command(name = "sensorhub-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// Store directory (overrides config).
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service in the foreground (default behavior).
    Run,

    /// Post a CSV file to a running service.
    Upload {
        /// Stream to upload to (e.g. pms, mq7, sgp40).
        #[arg(short, long)]
        stream: String,

        /// Base URL of the service.
        #[arg(short, long, default_value = "http://localhost:5000")]
        url: String,

        /// Request timeout in seconds.
        #[arg(long, default_value_t = 10)]
        timeout: u64,

        /// CSV file to upload.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sensorhub_service=info".parse()?)
                .add_directive("sensorhub_store=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    match args.command {
        Some(Command::Upload {
            stream,
            url,
            timeout,
            file,
        }) => upload(&stream, &url, Duration::from_secs(timeout), &file).await,
        Some(Command::Run) | None => run_server(args).await,
    }
}

async fn upload(stream: &str, url: &str, timeout: Duration, file: &Path) -> anyhow::Result<()> {
    let client = UploadClient::new(url, timeout)?;
    let reply = client
        .upload_file(stream, file)
        .await
        .with_context(|| format!("Uploading {} to {}", file.display(), client.upload_url(stream)))?;
    println!("{}", reply);
    Ok(())
}

async fn run_server(args: Args) -> anyhow::Result<()> {
    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(root) = args.root {
        config.storage.root = root;
    }
    config.validate()?;

    // Open the stores
    info!("Opening stores in {}", config.storage.root.display());
    let store = Store::open(
        &config.storage.root,
        &config.streams,
        config.storage.store_options(),
    )?;

    let upload_dir = config.storage.upload_dir();
    std::fs::create_dir_all(&upload_dir)
        .with_context(|| format!("Creating upload directory {}", upload_dir.display()))?;

    for stream in &config.streams {
        info!("Serving stream {} from {}", stream.id, stream.file);
    }

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse()?;

    let state = AppState::new(store, config);
    let app = api::app(state);

    info!("Starting server on {}", addr);

    // Run the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
