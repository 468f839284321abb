//! sdcm - command line front end for the model library engine.
//!
//! Results are printed to stdout as pretty JSON. Scan and sync progress
//! events go to stderr as one JSON object per line, so the two streams can
//! be piped separately.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use sdcm_core::{CancellationToken, Event, LibraryConfig, ModelKind, SdcmApi, UiTool};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "sdcm")]
#[command(about = "Scan, identify and reconcile local Stable Diffusion model libraries")]
struct Args {
    /// Library configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache database (defaults to the user data directory)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan one category directory and list its files
    Scan {
        /// webui or comfyui
        tool: String,
        /// Model category, e.g. lora or checkpoint
        kind: String,
        /// Sub directory below the category root
        #[arg(long, default_value = "")]
        subdir: String,
        /// Only list files whose name contains this text
        #[arg(long, default_value = "")]
        keyword: String,
    },
    /// Cache every model file under every configured root
    FullScan,
    /// Report files that share content
    Duplicates,
    /// Refresh registry data of stale models
    Sync,
    /// Fetch one model from the registry
    RefreshModel { model_id: i64 },
    /// Identify a file hash against the registry and link local copies
    RefreshHash { hash: String },
    /// List the sub directories of a category
    Subdirs { tool: String, kind: String },
    /// Download a gallery image next to the cache database
    FetchImage { image_id: String },
    /// Download a gallery image and make it the cover of its version
    Cover { version_id: i64, image_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config_path = match args.config {
        Some(path) => path,
        None => data_dir()?.join("config.json"),
    };
    let database = match args.database {
        Some(path) => path,
        None => data_dir()?.join("cache.db"),
    };
    debug!("Config: {}, database: {}", config_path.display(), database.display());

    let config = LibraryConfig::load(&config_path)?;
    let api = SdcmApi::builder(config).database(&database).build()?;

    let printer = tokio::spawn(print_events(api.subscribe()));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let result = run(&api, args.command, &cancel).await;

    // Closing every sender ends the printer once it has drained.
    drop(api);
    if let Err(e) = printer.await {
        warn!("Event printer stopped: {}", e);
    }
    result
}

async fn run(api: &SdcmApi, command: Command, cancel: &CancellationToken) -> Result<()> {
    match command {
        Command::Scan {
            tool,
            kind,
            subdir,
            keyword,
        } => {
            let (tool, kind) = (parse_tool(&tool)?, parse_kind(&kind)?);
            let files = api
                .scan_directory(tool, kind, &subdir, &keyword, cancel)
                .await?;
            print_json(&files)
        }
        Command::FullScan => print_json(&api.full_scan(cancel).await?),
        Command::Duplicates => {
            let groups = api.find_duplicates(cancel).await?;
            let reclaimable: u64 = groups.iter().map(|g| g.reclaimable_bytes()).sum();
            info!("{} duplicate groups, {} bytes reclaimable", groups.len(), reclaimable);
            print_json(&groups)
        }
        Command::Sync => print_json(&api.sync_stale_models(cancel).await?),
        Command::RefreshModel { model_id } => {
            let ingested = api.refresh_model(model_id).await?;
            let versions: Vec<_> = ingested.versions.iter().map(|v| v.version.id).collect();
            print_json(&json!({
                "modelId": ingested.model.id,
                "name": ingested.model.name,
                "versions": versions,
            }))
        }
        Command::RefreshHash { hash } => {
            let ingested = api.refresh_by_hash(&hash).await?;
            print_json(&json!({
                "modelId": ingested.version.model_id,
                "versionId": ingested.version.id,
                "versionName": ingested.version.name,
                "primaryFile": ingested.primary_file.name,
            }))
        }
        Command::Subdirs { tool, kind } => {
            let (tool, kind) = (parse_tool(&tool)?, parse_kind(&kind)?);
            print_json(&api.list_sub_categories(tool, kind)?)
        }
        Command::FetchImage { image_id } => {
            print_json(&api.download_gallery_image(&image_id).await?)
        }
        Command::Cover {
            version_id,
            image_id,
        } => {
            let thumbnail = api.use_gallery_image_as_cover(version_id, &image_id).await?;
            print_json(&json!({ "versionId": version_id, "thumbnail": thumbnail }))
        }
    }
}

/// Write events to stderr until every sender is gone.
async fn print_events(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => eprintln!("{}", line),
                Err(e) => warn!("Failed to encode event: {}", e),
            },
            Err(RecvError::Lagged(missed)) => warn!("Dropped {} events", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("sdcm"))
        .context("No user data directory on this platform; pass --config and --database")
}

fn parse_tool(s: &str) -> Result<UiTool> {
    UiTool::parse(s).ok_or_else(|| anyhow!("Unknown tool '{}', expected webui or comfyui", s))
}

fn parse_kind(s: &str) -> Result<ModelKind> {
    ModelKind::parse(s).ok_or_else(|| anyhow!("Unknown model kind '{}'", s))
}
