use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use cutout::compositor::CompositeResult;
use cutout::config::{Background, OutputFormat, OutputKind, Overlay, PipelineConfig, Quality};
use cutout::output::{BatchArchive, DirectorySink, OutputSink};
use cutout::pipeline::{Checkpoint, Orchestrator};
use cutout::segmentation::{self, SegmentationWorker};
use cutout::selection::SelectionPolygon;
use image::DynamicImage;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Images to process
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Quality tier (working resolution, ensemble size, feathering)
    #[arg(short, long, value_enum, default_value_t = Quality::Medium)]
    quality: Quality,

    /// Background: `transparent`, `#rrggbb`, or a path to an image
    #[arg(short, long, default_value = "transparent")]
    background: String,

    /// Stamp decorative doodles over the result
    #[arg(long)]
    overlay: bool,

    /// Seed for doodle placement
    #[arg(long)]
    seed: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputKind::Png)]
    format: OutputKind,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = 90)]
    jpeg_quality: u8,

    /// Keep only the inside of this polygon, as `x,y;x,y;...` in source pixels
    #[arg(long)]
    select: Option<SelectionPolygon>,

    /// Directory to write results into
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Write all results into this zip archive instead of a directory
    #[arg(long, conflicts_with = "out_dir")]
    archive: Option<PathBuf>,

    /// Path to segmentation model (ONNX file)
    /// If not provided, the border colour key is used
    #[arg(long)]
    model: Option<String>,

    /// Write the grayscale matte instead of the composite
    #[arg(long)]
    show_matte: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("cutout starting");
    tracing::info!("Quality: {:?}", args.quality);

    let config = PipelineConfig {
        quality: args.quality,
        background: parse_background(&args.background)?,
        overlay: if args.overlay {
            Overlay::Doodles { seed: args.seed }
        } else {
            Overlay::None
        },
        output_format: OutputFormat::from_kind(args.format, args.jpeg_quality),
    };

    let model_path = args.model.clone();
    if let Some(path) = &model_path {
        tracing::info!("Loading segmentation model from {}", path);
    } else {
        tracing::info!("No model given, using border colour key");
    }
    let worker = SegmentationWorker::spawn(move || {
        segmentation::create_default_oracle(model_path.as_deref())
    })
    .context("Failed to start segmentation worker")?;

    let mut orchestrator = Orchestrator::with_config(worker, config);
    orchestrator.set_observer(|checkpoint: Checkpoint| {
        tracing::debug!("{}%", checkpoint.percent());
    });

    let mut sink: Box<dyn OutputSink> = match &args.archive {
        Some(path) => Box::new(BatchArchive::to_file(path)),
        None => Box::new(
            DirectorySink::new(&args.out_dir).context("Failed to prepare output directory")?,
        ),
    };

    let mut failures = 0;
    for path in &args.inputs {
        let name = stem(path);
        match process_file(&mut orchestrator, &args, path, &name, sink.as_mut()) {
            Ok(stored_as) => tracing::info!("Saved {}", stored_as),
            Err(err) => {
                tracing::error!("{}: {:#}", path.display(), err);
                failures += 1;
            }
        }
    }
    sink.finish().context("Failed to finish output")?;

    if failures > 0 {
        bail!("{} of {} images failed", failures, args.inputs.len());
    }
    Ok(())
}

fn parse_background(value: &str) -> Result<Background> {
    if value.eq_ignore_ascii_case("transparent") {
        return Ok(Background::Transparent);
    }
    if let Some(color) = Background::parse_hex_color(value) {
        return Ok(Background::Solid(color));
    }
    let bytes =
        fs::read(value).with_context(|| format!("Failed to read background image {}", value))?;
    Background::custom_from_bytes(&bytes)
        .with_context(|| format!("Failed to load background image {}", value))
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

/// Run one file through the pipeline and hand the result to `sink`
fn process_file(
    orchestrator: &mut Orchestrator,
    args: &Args,
    path: &Path,
    name: &str,
    sink: &mut dyn OutputSink,
) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    orchestrator.load_image(&bytes)?;
    if let Some(selection) = &args.select {
        orchestrator.set_selection(selection.clone())?;
    }
    orchestrator.wait()?;

    if args.show_matte {
        let matte = orchestrator.matte().context("No matte was produced")?;
        let gray = DynamicImage::ImageLuma8(cutout::matte::matte_to_gray(matte));
        let result = CompositeResult::encode(gray.to_rgba8(), OutputFormat::Png)?;
        return Ok(sink.write_result(&format!("{}-matte", name), &result)?);
    }

    let result = orchestrator.result().context("No result was produced")?;
    Ok(sink.write_result(name, result)?)
}
