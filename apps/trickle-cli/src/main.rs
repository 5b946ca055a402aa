//! Trickle CLI
//!
//! Copies a local file into the upload directory at a throttled rate.
//! While it runs, stdin accepts pause/resume/cancel commands and Ctrl-C
//! cancels the transfer.

mod config;
mod control;
mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use trickle_protocol::{CreateTransferRequest, TransferStatus};
use trickle_transfer::{CommandDispatcher, FileSink, ProgressTracker, TransferRegistry};

use config::CliConfig;

/// Throttled, pausable file transfer
#[derive(Parser)]
#[command(name = "trickle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File to transfer
    file: PathBuf,

    /// Display name of the transfer (defaults to the file name)
    #[arg(short, long)]
    name: Option<String>,

    /// Target rate in bytes per second; 0 or negative is unlimited
    #[arg(short, long, allow_negative_numbers = true)]
    rate: Option<i64>,

    /// Destination directory
    #[arg(short, long)]
    upload_dir: Option<PathBuf>,

    /// Chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "debug"
    } else {
        "info,trickle=debug"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = match &cli.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    cfg.apply_env(|key| std::env::var(key).ok());
    if let Some(dir) = cli.upload_dir {
        cfg.upload_dir = dir;
    }
    if let Some(size) = cli.chunk_size.filter(|&s| s > 0) {
        cfg.chunk_size = size;
    }

    let name = match cli.name {
        Some(name) => name,
        None => cli
            .file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("cannot derive a name from {}", cli.file.display()))?,
    };
    let payload = tokio::fs::read(&cli.file)
        .await
        .with_context(|| format!("failed to read {}", cli.file.display()))?;

    let sink = Arc::new(FileSink::new(&cfg.upload_dir));
    let registry = Arc::new(TransferRegistry::new(sink, cfg.settings()));
    let dispatcher = CommandDispatcher::new(Arc::clone(&registry));

    let created = dispatcher.create(
        payload,
        CreateTransferRequest {
            name,
            target_rate: cli.rate,
        },
    )?;
    println!("{}", serde_json::to_string(&created)?);
    eprintln!("{}", control::HELP);

    let id = created.id;
    let tracker = ProgressTracker::new(Some(cfg.progress_interval));
    tracker.on_progress(Box::new(|snap| eprintln!("{}", progress::render(&snap))));
    tracker.track(registry.get(&id)?);
    tracker.start();

    let commands = tokio::spawn(control::read_commands(dispatcher.clone(), id.clone()));

    let finished = tokio::select! {
        snap = registry.wait(&id) => snap?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(transfer_id = %id, "interrupted, canceling transfer");
            if let Err(e) = dispatcher.cancel(&id) {
                tracing::warn!(error = %e, "cancel on interrupt failed");
            }
            registry.wait(&id).await?
        }
    };

    tracker.stop();
    commands.abort();
    registry.shutdown().await;

    eprintln!("{}", progress::render(&finished));
    println!("{}", serde_json::to_string_pretty(&finished)?);

    match finished.status {
        TransferStatus::Failed => anyhow::bail!("transfer failed: {}", finished.error),
        _ => Ok(()),
    }
}
