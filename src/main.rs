//! # roadwatch
//!
//! Server binary: loads settings, sets up logging, loads the detector and
//! starts the HTTP/WebSocket server until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use roadwatch_core::{Detector, LabelVocabulary, VideoOpener};
use roadwatch_server::ServerDeps;
use roadwatch_settings::RoadwatchSettings;
use roadwatch_vision::{FfmpegOpener, FramePipeline, YoloDetector, YoloOptions};

/// Road-scene object counting server.
#[derive(Parser, Debug)]
#[command(name = "roadwatch", about = "Per-frame road object counting over WebSocket")]
struct Cli {
    /// Settings file (defaults to ~/.roadwatch/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// ONNX model file.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Delay between frames in milliseconds.
    #[arg(long)]
    pacing_ms: Option<u64>,
}

impl Cli {
    fn apply(&self, settings: &mut RoadwatchSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(model) = &self.model {
            settings.detector.model_path.clone_from(model);
        }
        if let Some(pacing_ms) = self.pacing_ms {
            settings.session.pacing_ms = pacing_ms;
        }
    }
}

fn load_settings(cli: &Cli) -> Result<RoadwatchSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(roadwatch_settings::settings_path);
    let mut settings = roadwatch_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

async fn load_detector(settings: &RoadwatchSettings) -> Result<Arc<dyn Detector>> {
    let detector = &settings.detector;
    let mut options = YoloOptions {
        input_size: detector.input_size,
        confidence_threshold: detector.confidence_threshold,
        iou_threshold: detector.iou_threshold,
        ..YoloOptions::default()
    };
    if let Some(names) = &detector.class_names {
        options.class_names.clone_from(names);
    }

    let model_path = detector.model_path.clone();
    let loaded = tokio::task::spawn_blocking(move || YoloDetector::load(&model_path, options))
        .await
        .context("Detector loader task failed")?
        .with_context(|| format!("Failed to load model {}", detector.model_path.display()))?;
    Ok(Arc::new(loaded))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    roadwatch_telemetry::init_telemetry(&settings.logging)
        .context("Failed to initialize logging")?;

    let detector = load_detector(&settings).await?;
    tracing::info!(detector = detector.name(), "detector ready");

    let opener: Arc<dyn VideoOpener> = match &settings.detector.ffmpeg_path {
        Some(path) => Arc::new(FfmpegOpener::with_binary(path)),
        None => Arc::new(FfmpegOpener::new()),
    };
    let vocabulary = LabelVocabulary::new(
        settings.labels.vocabulary.iter().cloned(),
        settings.labels.aliases.clone(),
    );
    let pipeline = Arc::new(FramePipeline::new(
        detector,
        vocabulary,
        settings.session.jpeg_quality,
    ));

    let handle = roadwatch_server::start(&settings, ServerDeps { opener, pipeline })
        .await
        .context("Failed to start server")?;
    tracing::info!(addr = %handle.addr(), "listening");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let report = handle.shutdown().await;
    tracing::info!(
        tasks = report.tasks_cancelled,
        files = report.files_removed,
        "shutdown complete"
    );
    Ok(())
}
