use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use emoscope_hw::Camera;
use std::io::IsTerminal;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod models;
mod overlay;
mod session;
mod status;
mod video;

use config::Config;
use models::{ModelProvider, OnnxModels};
use overlay::{RasterOverlay, SYSTEM_FONTS};
use session::{Session, TriggerMode};
use status::{Status, StatusBoard};
use video::V4lCameras;

#[derive(Parser)]
#[command(name = "emoscope", about = "Live facial expression overlay for V4L2 webcams")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detection loop until Ctrl-C
    Run {
        /// V4L2 device path (e.g., /dev/video0)
        #[arg(long)]
        device: Option<String>,
        /// Mirror boxes horizontally
        #[arg(long, conflicts_with = "no_mirror")]
        mirror: bool,
        /// Draw boxes in camera orientation
        #[arg(long)]
        no_mirror: bool,
        /// Milliseconds between detection cycles
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Start a cycle for each new frame instead of on a timer
        #[arg(long)]
        frame_driven: bool,
        /// Write a composited PNG preview after every cycle
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// List video capture devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load both model bundles and report
    CheckModels,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env()?;

    match cli.command {
        Commands::Run {
            device,
            mirror,
            no_mirror,
            interval_ms,
            frame_driven,
            preview,
        } => {
            if device.is_some() {
                config.camera.device = device;
            }
            if mirror {
                config.display.mirror = true;
            }
            if no_mirror {
                config.display.mirror = false;
            }
            if let Some(ms) = interval_ms {
                config.detection.poll_interval_ms = ms;
            }
            if frame_driven {
                config.detection.trigger = TriggerMode::Frame;
            }
            if preview.is_some() {
                config.display.preview_path = preview;
            }
            config.validate()?;
            run(config).await
        }
        Commands::Devices { json } => list_devices(json),
        Commands::CheckModels => {
            config.validate()?;
            check_models(&config).await
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let board = StatusBoard::new();
    board.install_panic_hook();
    let printer = tokio::spawn(print_status(board.subscribe()));

    let mut surface = match &config.display.font_path {
        Some(font) => RasterOverlay::new().with_font(font)?,
        None => RasterOverlay::new().with_first_font(SYSTEM_FONTS),
    };
    if !surface.has_font() {
        tracing::warn!("no usable font found, labels will not render; set display.font_path");
    }
    if let Some(path) = &config.display.preview_path {
        tracing::info!(path = %path.display(), "writing preview frames");
        surface = surface.with_preview(path.clone(), config.display.mirror);
    }

    let models = OnnxModels::new(config.model_dir(), config.bundle_names());
    let mut session = Session::new(
        models,
        V4lCameras,
        surface,
        board.clone(),
        config.stream_request(),
        config.loop_config(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    });

    let result = session.run(shutdown_rx).await;
    printer.abort();

    match result {
        Ok(stats) => {
            tracing::info!(
                triggers = stats.triggers,
                started = stats.started,
                completed = stats.completed,
                failed = stats.failed,
                dropped_busy = stats.dropped_busy,
                skipped_not_ready = stats.skipped_not_ready,
                "stopped"
            );
            Ok(())
        }
        Err(e) => {
            print_line(&board.current());
            tracing::error!(kind = ?e.kind(), fatal = e.kind().is_fatal(), "session ended");
            Err(e.into())
        }
    }
}

async fn print_status(mut rx: watch::Receiver<Status>) {
    loop {
        let status = rx.borrow_and_update().clone();
        print_line(&status);
        if rx.changed().await.is_err() {
            break;
        }
    }
}

fn print_line(status: &Status) {
    if std::io::stdout().is_terminal() {
        println!("{}{}\x1b[0m", status.tone().ansi(), status.text);
    } else {
        println!("{}", status.text);
    }
}

fn list_devices(json: bool) -> Result<()> {
    let devices = Camera::list_devices();
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No video capture devices found");
        return Ok(());
    }
    for d in &devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}

async fn check_models(config: &Config) -> Result<()> {
    let dir = config.model_dir();
    let names = config.bundle_names();
    println!("Loading models from {}", dir.display());
    OnnxModels::new(dir.clone(), names.clone())
        .load()
        .await
        .with_context(|| format!("loading models from {}", dir.display()))?;
    println!("detector:   {}.onnx ok", names.detector);
    println!("expression: {}.onnx ok", names.expression);
    Ok(())
}
