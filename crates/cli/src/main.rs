//! menupic CLI
//!
//! Command-line front end for the menu scanning pipeline: reconcile OCR
//! fixtures, run OCR on a still, identify a tapped dish, or drive the
//! capture loop over a directory of photos.
//!
//! Copyright (c) 2025 Michael A Wright

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use llm_bridge::{FluxClient, GeminiClient, ProxyClient, ProxyConfig};
use menupic_core::camera::{probe_still, DirectoryCamera};
use menupic_core::ocr::{SidecarRecognizer, ADAPTER_CONVENTION};
use menupic_core::reconcile::reconcile_blocks;
use menupic_core::{
    CaptureConfig, CaptureLoop, DishIdentifier, DishResult, IdentificationMachine, IdleProbe,
    ImageGenerator, OverlayScene, PhotoGeometry, RawTextBlock, ReportingConvention,
    SessionConfig, SessionOutcome, TapEvent, TextRecognizer, TickOutcome, ViewportDimensions,
    ViewportPoint, ViewportTextBlock,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[allow(dead_code)]
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("BUILT_GIT_COMMIT_HASH"),
    "\nbuilt:  ",
    env!("BUILT_TIME_UTC"),
    "\nhost:   ",
    env!("BUILT_HOST"),
    "\ntarget: ",
    env!("BUILT_TARGET"),
);

#[derive(Parser)]
#[command(name = "menupic")]
#[command(about = "Tap a dish on a scanned menu, get its name and a picture", long_about = None)]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Engine {
    /// Precomputed Tesseract TSV next to each image
    Sidecar,
    /// Run Tesseract in-process (needs the `tesseract` feature)
    Tesseract,
}

#[derive(Subcommand)]
enum Commands {
    /// Map OCR frames from a fixture into viewport rectangles
    Reconcile {
        /// Fixture JSON: photo, convention, viewport, blocks
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Recognize text in a single still
    Ocr {
        /// Image file
        #[arg(short, long)]
        image: PathBuf,

        #[arg(short, long, value_enum, default_value = "sidecar")]
        engine: Engine,
    },

    /// Identify the dish at a tap point and generate its image
    Identify {
        /// JSON list of viewport text blocks
        #[arg(short, long)]
        blocks: PathBuf,

        /// Tap X in viewport coordinates
        #[arg(short)]
        x: f64,

        /// Tap Y in viewport coordinates
        #[arg(short)]
        y: f64,

        /// Go through a menupic-server proxy instead of calling services directly
        #[arg(long)]
        proxy: Option<String>,
    },

    /// Run the capture loop over a directory of photos
    Scan {
        /// Directory of menu photos
        #[arg(short, long)]
        dir: PathBuf,

        /// Viewport size as WIDTHxHEIGHT, e.g. 390x844
        #[arg(short, long)]
        viewport: String,

        /// Number of ticks to run (runs until Ctrl-C when omitted)
        #[arg(short, long)]
        ticks: Option<u32>,

        #[arg(short, long, value_enum, default_value = "sidecar")]
        engine: Engine,
    },

    /// Show build information
    Version,
}

#[derive(Debug, Deserialize)]
struct ReconcileFixture {
    photo: PhotoGeometry,
    convention: ReportingConvention,
    viewport: ViewportDimensions,
    blocks: Vec<RawTextBlock>,
}

/// The scan command has no identification session, so capture is never frozen
struct NoSession;

impl IdleProbe for NoSession {
    fn is_idle(&self) -> bool {
        true
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reconcile { input } => reconcile_fixture(&input),
        Commands::Ocr { image, engine } => ocr(&image, engine).await,
        Commands::Identify {
            blocks,
            x,
            y,
            proxy,
        } => identify(&blocks, ViewportPoint::new(x, y), proxy).await,
        Commands::Scan {
            dir,
            viewport,
            ticks,
            engine,
        } => scan(&dir, &viewport, ticks, engine).await,
        Commands::Version => {
            println!("{}", build_info());
            Ok(())
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn reconcile_fixture(input: &Path) -> Result<()> {
    let fixture: ReconcileFixture = read_json(input)?;
    let blocks = reconcile_blocks(
        &fixture.blocks,
        fixture.photo,
        fixture.convention,
        fixture.viewport,
    );
    println!("{}", serde_json::to_string_pretty(&blocks)?);
    Ok(())
}

fn recognizer(engine: Engine) -> Result<Arc<dyn TextRecognizer>> {
    match engine {
        Engine::Sidecar => Ok(Arc::new(SidecarRecognizer)),
        #[cfg(feature = "tesseract")]
        Engine::Tesseract => Ok(Arc::new(menupic_core::ocr::TesseractRecognizer::default())),
        #[cfg(not(feature = "tesseract"))]
        Engine::Tesseract => bail!("menupic was built without the `tesseract` feature"),
    }
}

async fn ocr(image: &Path, engine: Engine) -> Result<()> {
    let frame = probe_still(image)?;
    tracing::info!(
        "{}: {}x{} {:?}",
        image.display(),
        frame.width,
        frame.height,
        frame.orientation
    );
    let blocks = recognizer(engine)?.recognize(&frame).await?;
    println!("{}", serde_json::to_string_pretty(&blocks)?);
    Ok(())
}

async fn identify(blocks_path: &Path, point: ViewportPoint, proxy: Option<String>) -> Result<()> {
    let blocks: Vec<ViewportTextBlock> = read_json(blocks_path)?;

    let (identifier, generator): (Arc<dyn DishIdentifier>, Arc<dyn ImageGenerator>) = match proxy {
        Some(base_url) => {
            let client = Arc::new(ProxyClient::new(ProxyConfig::with_base_url(base_url))?);
            let identifier: Arc<dyn DishIdentifier> = client.clone();
            let generator: Arc<dyn ImageGenerator> = client;
            (identifier, generator)
        }
        None => {
            let identifier: Arc<dyn DishIdentifier> = Arc::new(GeminiClient::from_env()?);
            let generator: Arc<dyn ImageGenerator> = Arc::new(FluxClient::from_env()?);
            (identifier, generator)
        }
    };

    let machine = IdentificationMachine::new(identifier, generator, SessionConfig::from_env()?);
    let tap = TapEvent {
        point,
        block_index: blocks.iter().position(|b| b.frame.contains(point)),
    };

    let outcome = tokio::select! {
        outcome = machine.tap(tap, &blocks) => outcome,
        _ = tokio::signal::ctrl_c() => {
            machine.teardown();
            SessionOutcome::Cancelled
        }
    };

    match &outcome {
        SessionOutcome::Completed(result) => println!("{}", render_result(result)),
        other => match other.user_message() {
            Some(message) => eprintln!("{message}"),
            None => eprintln!("{other:?}"),
        },
    }
    Ok(())
}

async fn scan(dir: &Path, viewport: &str, ticks: Option<u32>, engine: Engine) -> Result<()> {
    let viewport = parse_viewport(viewport)?;
    let camera = Arc::new(DirectoryCamera::open(dir)?);
    if camera.files().is_empty() {
        bail!("No images found in {}", dir.display());
    }

    let scene = OverlayScene::shared(ADAPTER_CONVENTION);
    scene.write().set_viewport(viewport);

    let config = CaptureConfig::from_env()?;
    let interval = config.interval;
    let capture = CaptureLoop::new(
        camera,
        recognizer(engine)?,
        scene.clone(),
        Arc::new(NoSession),
        config,
    );

    match ticks {
        Some(count) => {
            for tick in 0..count {
                if tick > 0 {
                    tokio::time::sleep(interval).await;
                }
                match capture.tick().await {
                    TickOutcome::Applied { .. } => {
                        println!("{}", serde_json::to_string_pretty(scene.read().blocks())?)
                    }
                    TickOutcome::Failed(message) => eprintln!("tick {}: {}", tick + 1, message),
                    other => tracing::info!("tick {}: {:?}", tick + 1, other),
                }
            }
        }
        None => {
            let runner = capture.clone();
            let running = tokio::spawn(async move { runner.run().await });
            tokio::signal::ctrl_c().await?;
            capture.shutdown();
            running.await?;
            println!("{}", serde_json::to_string_pretty(scene.read().blocks())?);
        }
    }
    Ok(())
}

fn parse_viewport(text: &str) -> Result<ViewportDimensions> {
    let (width, height) = text
        .split_once(['x', 'X'])
        .with_context(|| format!("Viewport must look like 390x844, got {text}"))?;
    let viewport = ViewportDimensions::new(
        width.trim().parse().context("Invalid viewport width")?,
        height.trim().parse().context("Invalid viewport height")?,
    );
    if !viewport.is_known() {
        bail!("Viewport must be non-zero, got {text}");
    }
    Ok(viewport)
}

fn render_result(result: &DishResult) -> String {
    let mut lines = vec![result.dish_name.clone()];
    if let Some(price) = result.price.as_deref().filter(|p| !p.is_empty()) {
        lines.push(format!("Price: {price}"));
    }
    if !result.description.is_empty() {
        lines.push(result.description.clone());
    }
    if let Some(nutrients) = result.nutrients.as_deref().filter(|n| !n.is_empty()) {
        lines.push(format!("Nutrients: {nutrients}"));
    }
    match &result.generated_image_ref {
        Some(image) => match image.decode_inline() {
            Some(Ok(bytes)) => lines.push(format!("Image: inline, {} bytes", bytes.len())),
            Some(Err(e)) => lines.push(format!("Image: undecodable inline data ({e})")),
            None => lines.push(format!("Image: {}", image.as_str())),
        },
        None => lines.push("Image: none".to_string()),
    }
    lines.join("\n")
}

fn build_info() -> String {
    format!(
        "menupic {}\nrustc:    {}\nprofile:  {}\ntarget:   {}\nfeatures: {}\ncommit:   {}\nbuilt:    {}",
        built_info::PKG_VERSION,
        built_info::RUSTC_VERSION,
        built_info::PROFILE,
        built_info::TARGET,
        built_info::FEATURES_STR,
        env!("BUILT_GIT_COMMIT_HASH"),
        env!("BUILT_TIME_UTC"),
    )
}
