//! landscapist-load: load one image through the pipeline and print each state

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use landscapist_core::{DecodePriority, ImageLoader, ImageModel, ImageRequest, ImageResult, LandscapistConfig};
use landscapist_image::{BlurTransformation, GrayscaleTransformation};
use landscapist_net::Url;
use smol::stream::StreamExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "landscapist-load", version, about = "Load an image and print every load state")]
struct Args {
    /// URL, file path or data: URI to load
    source: String,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disk cache directory (overrides the config file)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// background, low, normal, high or immediate
    #[arg(long, default_value = "normal")]
    priority: DecodePriority,

    /// Blur radius applied after decode
    #[arg(long)]
    blur: Option<f32>,

    #[arg(long)]
    grayscale: bool,

    /// Load twice to show the memory cache hit
    #[arg(long)]
    repeat: bool,
}

fn model_for(source: &str) -> anyhow::Result<ImageModel> {
    if source.starts_with("data:") || source.starts_with("file:") {
        let uri = Url::parse(source).with_context(|| format!("invalid URI {source}"))?;
        return Ok(ImageModel::Uri(uri));
    }
    if source.contains("://") {
        return Ok(ImageModel::Url(source.to_string()));
    }
    let path = PathBuf::from(source);
    Ok(ImageModel::File(std::fs::canonicalize(&path).unwrap_or(path)))
}

fn describe(state: &ImageResult) -> String {
    match state {
        ImageResult::Loading => "loading".to_string(),
        ImageResult::Success {
            bitmap,
            data_source,
            original_width,
            original_height,
            disk_cache_path,
            is_intermediate,
            progress,
            ..
        } => {
            let kind = if *is_intermediate { "intermediate" } else { "success" };
            let mut line = format!(
                "{kind}: {}x{} (original {}x{}) from {:?}, progress {:.2}",
                bitmap.width(),
                bitmap.height(),
                original_width,
                original_height,
                data_source,
                progress
            );
            if let Some(path) = disk_cache_path {
                line.push_str(&format!(", cached at {}", path.display()));
            }
            line
        }
        ImageResult::Failure { message, .. } => {
            format!("failure: {}", message.as_deref().unwrap_or("unknown error"))
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            LandscapistConfig::from_json(&json)?
        }
        None => LandscapistConfig::default(),
    };
    if args.cache_dir.is_some() {
        config.disk_cache_dir = args.cache_dir.clone();
    }

    let loader = ImageLoader::new(config)?;
    let mut builder = ImageRequest::builder(model_for(&args.source)?)
        .size(args.width, args.height)
        .priority(args.priority);
    if let Some(radius) = args.blur {
        builder = builder.transformation(BlurTransformation::new(radius));
    }
    if args.grayscale {
        builder = builder.transformation(GrayscaleTransformation);
    }
    let request = builder.build();

    let runs = if args.repeat { 2 } else { 1 };
    smol::block_on(async {
        for run in 1..=runs {
            println!("-- load {run}");
            let mut load = loader.load(request.clone());
            let mut terminal = None;
            while let Some(state) = load.next().await {
                println!("{}", describe(&state));
                terminal = Some(state);
            }
            match terminal {
                Some(ImageResult::Failure { .. }) => bail!("load failed"),
                Some(_) => {}
                None => bail!("load ended without a result"),
            }
        }
        Ok(())
    })
}
