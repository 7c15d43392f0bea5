pub mod artwork;
pub mod attachment;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod dom;
pub mod download;
pub mod error;
pub mod notify;
pub mod settings;
pub mod track;
pub mod tree;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use artwork::ResolutionTier;
use attachment::{Attachment, Evaluation};
use config::AppConfig;
use coordinator::{host_channel, Coordinator};
use dom::Document;
use download::{CoverDownloader, CoverSaver, DirectorySaver, PromptSaver};
use error::{CoverError, Result};
use notify::LogNotifier;
use settings::{SettingsClient, SettingsSnapshot, SharedSettings};
use track::{TrackIdentity, TrackKind, TrackMetadata};

#[derive(Debug, Parser)]
#[command(name = "cover-downloader", version, about = "Save-cover control for a media player's now-playing view")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate a rendered page snapshot once and print what was found as JSON
    Inspect { snapshot: PathBuf },
    /// Attach the control on a page snapshot and save the current cover
    Save {
        snapshot: PathBuf,
        /// Directory to save into (defaults to COVER_DOWNLOAD_DIR)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Ask where to save; without a desktop session this saves into the directory
        #[arg(long)]
        prompt: bool,
    },
}

#[derive(Debug, Serialize)]
struct InspectReport {
    player_open: bool,
    track_id: Option<TrackIdentity>,
    kind: Option<TrackKind>,
    metadata: Option<TrackMetadata>,
    artwork_url: Option<String>,
    filename: Option<String>,
    settings_loaded: bool,
    evaluation: Evaluation,
}

pub async fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let client = SettingsClient::new(&config.settings_url, &config.addon_name);

    match cli.command {
        Command::Inspect { snapshot } => inspect(&snapshot, &client).await,
        Command::Save { snapshot, out, prompt } => {
            let dir = DirectorySaver::new(out.unwrap_or_else(|| config.download_dir.clone()));
            if prompt {
                save(&snapshot, PromptSaver::new(dir), client, &config).await
            } else {
                save(&snapshot, dir, client, &config).await
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("COVER_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // stdout carries the command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn load_snapshot(path: &Path) -> Result<Document> {
    let html = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| CoverError::io(path, err))?;
    if html.trim().is_empty() {
        return Err(CoverError::Snapshot(format!("{} is empty", path.display())));
    }
    Ok(Document::from_html(&html))
}

async fn fetch_settings_once(client: &SettingsClient) -> SharedSettings {
    let settings = client.get_settings().await.map(Arc::new);
    if settings.is_none() {
        warn!("Continuing without addon settings");
    }
    settings
}

async fn inspect(path: &Path, client: &SettingsClient) -> Result<()> {
    let mut doc = load_snapshot(path).await?;
    let initial = fetch_settings_once(client).await;
    let snapshot: Option<&SettingsSnapshot> = initial.as_deref();
    let tier = ResolutionTier::from_settings(snapshot);

    let region = track::player_region(&doc);
    let metadata = region.map(|region| track::resolve_metadata(&doc, region));
    let artwork_url = region.and_then(|region| artwork::current_artwork_url(&doc, region, tier));
    let filename = artwork_url.as_ref().map(|_| {
        download::build_filename(metadata.as_ref(), snapshot.and_then(SettingsSnapshot::file_name_pattern))
    });

    let report = InspectReport {
        player_open: region.is_some(),
        track_id: region.and_then(|region| track::resolve_identity(&doc, region)),
        kind: region.map(|region| track::track_kind(&doc, region)),
        metadata,
        artwork_url,
        filename,
        settings_loaded: initial.is_some(),
        evaluation: Attachment::new().evaluate(&mut doc, tier),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn save<S: CoverSaver>(path: &Path, saver: S, client: SettingsClient, config: &AppConfig) -> Result<()> {
    let doc = load_snapshot(path).await?;
    let initial = fetch_settings_once(&client).await;

    let downloader = CoverDownloader::new(saver);
    let coordinator = Coordinator::new(doc, downloader, LogNotifier::new(), config.debounce)
        .with_settings(initial.clone());
    let settings_rx = settings::spawn_refresh(client, config.refresh_interval, initial);

    let (handle, events) = host_channel();
    handle.activate_control();
    handle.shutdown();
    let mut coordinator = coordinator.run(events, settings_rx).await;

    if coordinator.state().artwork().is_none() {
        return Err(CoverError::NoArtwork);
    }
    match coordinator.take_last_download() {
        Some(Ok(saved)) => {
            if let Some(path) = saved.path {
                info!(path = %path.display(), "Saved");
                println!("{}", path.display());
            }
            Ok(())
        }
        Some(Err(err)) if err.is_cancelled() => {
            info!("Nothing saved");
            Ok(())
        }
        Some(Err(err)) => Err(err),
        None => Err(CoverError::NoArtwork),
    }
}
