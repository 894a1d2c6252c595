use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use geotile_detect::batch::events::BatchEvent;
use geotile_detect::batch::orchestrator::spawn_batch;
use geotile_detect::batch::session::{BatchSession, is_raster_file};
use geotile_detect::config::BatchConfig;
use geotile_detect::export::detections_json::DetectionCache;
use geotile_detect::export::{OutputPaths, base_name_of_cache, export_result};
use geotile_detect::image_utils::tiling::{
    DEFAULT_SMALL_IMAGE_THRESHOLD, DEFAULT_STRIDE, DEFAULT_TILE_SIZE, TilingParameters, plan_tiles,
};
use geotile_detect::object_detection::yolov11::{YoloTask, Yolov11};
use geotile_detect::raster::RasterHandle;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "geotile-detect")]
#[command(about = "Tiled object detection on georeferenced rasters")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a detection batch over images and folders.
    Detect(DetectArgs),

    /// Print the tiles an image of the given size is cut into.
    Plan(PlanArgs),

    /// Rebuild GeoJSON and preview from a `_detections.json` file.
    Render(RenderArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TaskArg {
    Detect,
    Obb,
}

impl From<TaskArg> for YoloTask {
    fn from(task: TaskArg) -> Self {
        match task {
            TaskArg::Detect => YoloTask::Detect,
            TaskArg::Obb => YoloTask::Obb,
        }
    }
}

#[derive(Debug, Args)]
struct DetectArgs {
    /// Image files or folders. Folders are searched recursively.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// JSON batch configuration. Flags given on the command line override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// ONNX model file.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Class names, one per line. Defaults to `<model>.txt`.
    #[arg(long)]
    classes: Option<PathBuf>,

    /// Model head. Guessed from the model file name when omitted.
    #[arg(long, value_enum)]
    task: Option<TaskArg>,

    /// Directory for the per-image outputs.
    #[arg(long, short)]
    output_dir: Option<PathBuf>,

    /// Minimum detection confidence in [0.01, 1].
    #[arg(long)]
    conf: Option<f32>,

    /// IoU threshold for per-tile suppression in [0.01, 1].
    #[arg(long)]
    iou: Option<f32>,

    #[arg(long)]
    tile_size: Option<u32>,

    #[arg(long)]
    stride: Option<u32>,

    /// Images whose longest side is at most this are scored in one pass.
    #[arg(long)]
    small_image_threshold: Option<u32>,

    /// Side of the square model input.
    #[arg(long)]
    input_size: Option<u32>,

    /// Suppress duplicates across overlapping tiles at this IoU.
    #[arg(long)]
    cross_tile_nms: Option<f32>,

    /// Do not write `_vis.png` previews.
    #[arg(long)]
    no_preview: bool,
}

#[derive(Debug, Args)]
struct PlanArgs {
    #[arg(long)]
    width: u32,

    #[arg(long)]
    height: u32,

    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    tile_size: u32,

    #[arg(long, default_value_t = DEFAULT_STRIDE)]
    stride: u32,

    #[arg(long, default_value_t = DEFAULT_SMALL_IMAGE_THRESHOLD)]
    small_image_threshold: u32,
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// A `_detections.json` file written by `detect`.
    detections: PathBuf,

    /// Source raster, if it has moved since the detections were written.
    #[arg(long)]
    raster: Option<PathBuf>,

    #[arg(long, short)]
    output_dir: PathBuf,

    #[arg(long)]
    no_preview: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Detect(args) => run_detect(args),
        Commands::Plan(args) => run_plan(args),
        Commands::Render(args) => run_render(args),
    }
}

fn batch_config(args: &DetectArgs) -> Result<BatchConfig> {
    let mut config = match &args.config {
        Some(path) => BatchConfig::from_json_file(path)?,
        None => {
            let model = args
                .model
                .clone()
                .context("--model is required without --config")?;
            let output_dir = args
                .output_dir
                .clone()
                .context("--output-dir is required without --config")?;
            BatchConfig::new(model, output_dir)
        }
    };
    if let Some(model) = &args.model {
        config.model_path = model.clone();
    }
    if let Some(output_dir) = &args.output_dir {
        config.output_dir = output_dir.clone();
    }
    if args.classes.is_some() {
        config.classes_path = args.classes.clone();
    }
    if let Some(task) = args.task {
        config.task = Some(task.into());
    }
    if let Some(conf) = args.conf {
        config.confidence_threshold = conf;
    }
    if let Some(iou) = args.iou {
        config.overlap_threshold = iou;
    }
    if let Some(tile_size) = args.tile_size {
        config.tile_size = tile_size;
    }
    if let Some(stride) = args.stride {
        config.stride = stride;
    }
    if let Some(threshold) = args.small_image_threshold {
        config.small_image_threshold = threshold;
    }
    if let Some(input_size) = args.input_size {
        config.input_size = input_size;
    }
    if args.cross_tile_nms.is_some() {
        config.cross_tile_nms = args.cross_tile_nms;
    }
    if args.no_preview {
        config.write_preview = false;
    }
    Ok(config)
}

fn run_detect(args: DetectArgs) -> Result<()> {
    let config = batch_config(&args)?;
    config.validate()?;
    config.check_model_file()?;

    let mut session = BatchSession::new();
    for input in &args.inputs {
        if input.is_dir() {
            let added = session
                .add_folder(input)
                .with_context(|| format!("Failed to scan {}", input.display()))?;
            info!("Queued {} image(s) from {}", added, input.display());
        } else if is_raster_file(input) {
            session.add_image(input.clone());
        } else {
            bail!("Not a supported image or folder: {}", input.display());
        }
    }
    if session.images().is_empty() {
        bail!("No images to process");
    }

    let class_names = config.resolve_class_names()?;
    let class_count = class_names.len();
    let model = Yolov11::new(
        &config.model_path,
        class_names,
        config.input_size,
        config.resolved_task(),
        config.model_name(),
    )
    .with_context(|| format!("Failed to load model {}", config.model_path.display()))?;
    info!(
        "Loaded {} ({} head, {} classes)",
        config.model_name(),
        model.task(),
        class_count
    );

    let handle = spawn_batch(model, config, session.images().to_vec())?;

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );
    for event in handle.events.iter() {
        match &event {
            BatchEvent::Log(text) => pb.println(text),
            BatchEvent::Progress(snapshot) => {
                pb.set_position(snapshot.percent as u64);
                pb.set_message(format!("ETA: {} | {}", snapshot.eta, snapshot.resource_usage));
            }
            BatchEvent::Result(report) => {
                if let Some(preview) = &report.preview_path {
                    pb.println(format!("Preview: {}", preview.display()));
                }
            }
            BatchEvent::ImageFailed { .. } => {}
            BatchEvent::Finished(summary) => pb.finish_with_message(summary.to_string()),
        }
        session.apply(&event);
    }
    let summary = handle.join().context("Batch worker stopped unexpectedly")?;

    let detections: usize = session.results().map(|(_, r)| r.detections.len()).sum();
    println!("{}", summary);
    println!("{} detection(s) written", detections);
    if summary.succeeded == 0 {
        bail!("No image was processed successfully");
    }
    Ok(())
}

fn run_plan(args: PlanArgs) -> Result<()> {
    let params = TilingParameters {
        tile_size: args.tile_size,
        stride: args.stride,
        small_image_threshold: args.small_image_threshold,
    };
    let plan = plan_tiles(args.width, args.height, &params)?;
    println!("{:?}: {} tile(s)", plan.mode, plan.len());
    for (i, tile) in plan.tiles.iter().enumerate() {
        println!(
            "{:>4}  x={:<6} y={:<6} {}x{}",
            i, tile.origin_x, tile.origin_y, tile.width, tile.height
        );
    }
    Ok(())
}

fn run_render(args: RenderArgs) -> Result<()> {
    let cache = DetectionCache::load(&args.detections)?;
    let preview_source = if args.no_preview {
        None
    } else {
        let source = args.raster.as_ref().unwrap_or(&cache.raster.source_path);
        let raster = RasterHandle::open(source)?;
        let rgb = raster.to_rgb8();
        raster.close();
        Some(rgb)
    };
    let result = cache.into_result();
    // Keep the name the batch gave it, which may carry a `_2` suffix.
    let base_name = base_name_of_cache(&args.detections)
        .map(str::to_string)
        .unwrap_or_else(|| result.raster.base_name());
    let paths = OutputPaths::new(&args.output_dir, &base_name);
    export_result(&result, &paths, preview_source.as_ref())?;
    println!("{}", result.stats_text());
    Ok(())
}
