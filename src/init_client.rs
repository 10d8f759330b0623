//! Command line front end: blend two local images through a running backend

use anyhow::{Context, Result};
use clap::Parser;
use imageblend::services::ProxyClient;
use imageblend::settings::Settings;
use imageblend::util::init_tracing;
use imageblend::{BlendMode, EncodedImage, GenerationRequest, Pipeline, PipelineState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "blend", version, about = "Blend two images with a generative model")]
struct Args {
    /// First input image
    image1: PathBuf,

    /// Second input image
    image2: PathBuf,

    /// Blend mode: Fuse, Style Transfer, Double Exposure, Dreamscape or Collage
    #[arg(short, long, default_value = "Fuse")]
    mode: BlendMode,

    /// Optional free-text guidance for the model
    #[arg(short, long)]
    guidance: Option<String>,

    /// Backend base URL, overriding the config
    #[arg(long)]
    backend: Option<String>,

    /// Where to write the result (defaults to blended.<ext>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TOML config file (defaults to ./imageblend.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref())?;

    let image1 = EncodedImage::from_path(&args.image1)
        .await
        .with_context(|| format!("failed to load {}", args.image1.display()))?;
    let image2 = EncodedImage::from_path(&args.image2)
        .await
        .with_context(|| format!("failed to load {}", args.image2.display()))?;

    let backend_url = args
        .backend
        .unwrap_or_else(|| settings.client.backend_url.clone());
    let client = Arc::new(ProxyClient::new(
        &backend_url,
        settings.client.request_timeout(),
    )?);
    let pipeline = Arc::new(
        Pipeline::new(client.clone(), client).with_timeouts(settings.pipeline.timeouts()),
    );

    // Log every transition
    let mut states = pipeline.subscribe();
    let watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            match state {
                PipelineState::Loading(stage) => info!("{stage} step running"),
                PipelineState::Succeeded(image) => info!("done ({})", image.mime_type()),
                PipelineState::Failed(reason) => warn!("failed: {reason}"),
                PipelineState::Idle => {}
            }
        }
    });

    let canceller = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                pipeline.cancel();
            }
        })
    };

    let mut request = GenerationRequest::new(image1, image2, args.mode.label());
    request.guidance = args.guidance;

    info!("blending via {}", backend_url);
    let result = pipeline.submit(request).await;
    canceller.abort();
    watcher.abort();

    let image = result?;
    let output = args.output.unwrap_or_else(|| {
        PathBuf::from(format!("blended.{}", image.extension().unwrap_or("jpg")))
    });
    let bytes = image.to_bytes().context("generated image is not valid base 64")?;
    tokio::fs::write(&output, bytes)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("{}", output.display());
    Ok(())
}
