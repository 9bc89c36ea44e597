//! Aitana Live - live camera analysis
//!
//! Streams camera frames through an on-device object detector and text
//! recognizer, or to a remote inference service, and publishes what it
//! sees as a single analysis state.

mod app;
mod capture;
mod config;
mod error;
mod link;
mod pipeline;
mod present;
mod shared;
mod storage;
mod vision;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::AitanaApp;
use crate::capture::{Facing, LayoutSize};
use crate::config::{AnalysisMode, AppConfig, CaptureSource};
use crate::present::parse_layout_size;

/// Aitana Live - live camera analysis
#[derive(Parser, Debug)]
#[command(name = "aitana-live")]
#[command(about = "Live camera object detection and text recognition")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Analysis path, overriding the configuration
    #[arg(long, value_enum)]
    mode: Option<AnalysisMode>,

    /// Backend websocket endpoint, overriding the configuration
    #[arg(long)]
    endpoint: Option<String>,

    /// Replay still images from this folder instead of synthetic cameras
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    /// Camera to start with
    #[arg(long, value_enum)]
    camera: Option<Facing>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Switch between front and back cameras on this interval
    #[arg(long)]
    switch_every_secs: Option<u64>,

    /// Download missing OCR models before starting
    #[arg(long)]
    download_models: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Layout size reported for the preview surface
    #[arg(long, default_value = "1280x720", value_parser = parse_layout_size)]
    preview_size: LayoutSize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Aitana Live starting...");

    let mut config = match &args.config {
        Some(path) => config::load_config(path).with_context(|| format!("Failed to load {:?}", path))?,
        None => load_or_create_config(),
    };
    apply_overrides(&mut config, &args);

    let app = AitanaApp::build(&config, args.preview_size, args.download_models).await?;
    let analysis = app.analysis().clone();
    analysis.on_appear().await;

    let switcher = args.switch_every_secs.filter(|s| *s > 0).map(|secs| {
        let analysis = analysis.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            interval.tick().await;
            loop {
                interval.tick().await;
                info!("Switching camera");
                analysis.switch_camera();
            }
        })
    });

    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => info!("Run time elapsed"),
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
        }
    }

    if let Some(switcher) = switcher {
        switcher.abort();
    }
    app.shutdown().await;

    info!("Aitana Live shutdown complete");

    Ok(())
}

/// Load configuration from file or create default
fn load_or_create_config() -> AppConfig {
    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => warn!("Ignoring invalid configuration {:?}: {}", config_path, e),
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(mode) = args.mode {
        config.pipeline.mode = mode;
    }
    if let Some(endpoint) = &args.endpoint {
        config.backend.endpoint = endpoint.clone();
    }
    if let Some(dir) = &args.frames_dir {
        config.capture.source = CaptureSource::Directory;
        config.capture.frames_dir = Some(dir.clone());
    }
    if let Some(facing) = args.camera {
        config.capture.default_facing = facing;
    }
}
