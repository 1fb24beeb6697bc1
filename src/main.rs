//! Command-line front end: composes one or two photos into a framed JPEG.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use framed::config::{AspectRatio, Configuration, SplitType};
use framed::events::SourceBlob;
use framed::export::DirectorySaver;
use framed::processing::color::BackgroundColor;
use framed::render::surface::CanvasHandle;
use framed::CanvasState;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "framed", about = "Frame photos on a fixed-aspect canvas")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Canvas aspect ratio (1x1, 4x5, 9x16)
    #[arg(long, value_name = "ID")]
    aspect_ratio: Option<AspectRatio>,

    /// Background colour as #rrggbb, rgb(..) or hsb(..)
    #[arg(long, value_name = "COLOR")]
    background_color: Option<BackgroundColor>,

    /// Border around the images, in pixels
    #[arg(long, value_name = "PX")]
    border: Option<u32>,

    /// How two images are split (horizontal, vertical)
    #[arg(long, value_name = "SPLIT")]
    split: Option<SplitType>,

    /// Directory the composed JPEG is written into
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// One image, or two for a diptych
    #[arg(value_name = "IMAGE", required = true, num_args = 1..=2)]
    images: Vec<PathBuf>,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(
        format!("framed={level}")
            .parse()
            .context("building log filter")?,
    );
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Configuration> {
    let mut cfg = match &cli.config {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Configuration::default(),
    };
    if let Some(aspect_ratio) = cli.aspect_ratio {
        cfg.aspect_ratio = aspect_ratio;
    }
    if let Some(color) = cli.background_color {
        cfg.background_color = color;
    }
    if let Some(border) = cli.border {
        cfg.border = border;
    }
    if let Some(split) = cli.split {
        cfg.split = split;
    }
    cfg.validated().context("validating configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let cfg = load_config(&cli)?;

    let mut blobs = Vec::with_capacity(cli.images.len());
    for path in &cli.images {
        let blob = SourceBlob::from_path(path)
            .with_context(|| format!("reading {}", path.display()))?;
        blobs.push(blob);
    }
    let mut blobs = blobs.into_iter();
    let Some(primary) = blobs.next() else {
        bail!("no image given");
    };

    let state = CanvasState::new(&cfg);
    let _attachment = state.attach_to_canvas(CanvasHandle::new());
    state
        .set_images(primary, blobs.next())
        .await
        .context("loading images")?;
    state.settled().await;

    let saver = DirectorySaver::new(&cli.output_dir);
    let file = state.save_file(&saver).context("saving composition")?;
    info!(
        name = %file.name,
        dir = %saver.dir().display(),
        diptych = state.is_diptych(),
        "done"
    );
    Ok(())
}
