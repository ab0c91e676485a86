//! cowrite-daemon: Headless autosave daemon for co-authored markdown drafts.
//!
//! Watches a drafts directory, records every change through a draft session
//! and persists debounced snapshots to a store directory. Suggestions dropped
//! next to a draft as `<draft>.suggestions.json` are merged into it.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cowrite_core::{SaveStatus, SystemClock};
use cowrite_daemon::{DaemonConfig, DraftDaemon, DraftWatcher, NativeStore};

#[derive(Parser, Debug)]
#[command(name = "cowrite-daemon")]
#[command(about = "Autosave daemon for co-authored drafts")]
struct Args {
    /// Path to the drafts directory
    #[arg(short, long)]
    drafts: PathBuf,

    /// Directory saved snapshots are written to
    #[arg(short, long)]
    store: PathBuf,

    /// Directory holding config.json (defaults to <store>/.cowrite)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,cowrite_daemon=debug"
    } else {
        "info,cowrite_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting cowrite-daemon");
    info!("Drafts path: {:?}", args.drafts);
    info!("Store path: {:?}", args.store);

    let config_dir = args
        .config_dir
        .clone()
        .unwrap_or_else(|| args.store.join(".cowrite"));
    let config = DaemonConfig::load(&config_dir)?;

    std::fs::create_dir_all(&args.store)
        .with_context(|| format!("Failed to create store directory {:?}", args.store))?;

    let store = Arc::new(NativeStore::new(args.store.clone()));
    let mut daemon = DraftDaemon::new(args.drafts.clone(), store, &config, Arc::new(SystemClock));

    let _status = daemon.autosave().subscribe(|event| match event.status {
        SaveStatus::Error => warn!(
            "Save error for {}: {}",
            event.document_id,
            event.error.as_deref().unwrap_or("unknown")
        ),
        SaveStatus::Saved => info!("{} saved", event.document_id),
        _ => {}
    });

    daemon.scan().await?;

    let mut watcher = DraftWatcher::new(args.drafts.clone())?;
    info!("File watcher started");
    info!("Daemon running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            Some(event) = watcher.event_rx().recv() => {
                let path = event.path.clone();
                if let Err(e) = daemon.on_file_event(event).await {
                    error!("Failed to handle change to {}: {:#}", path, e);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Flushing pending saves");
    daemon.shutdown().await;
    info!("Shutting down");
    Ok(())
}
