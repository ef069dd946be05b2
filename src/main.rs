use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use humanseg::capture::{CaptureSource, FrameDirCapture, WebcamCapture};
use humanseg::config::SegmenterConfig;
use humanseg::output::{FrameDirOutput, OutputSink, V4L2Output};
use humanseg::segmentation::{
    self, parse_color, Background, Device, SegmentOptions, VideoOptions,
};
use humanseg::serving;
use image::Rgb;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to segmentation model (ONNX file); overrides the config file
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run the network on the GPU (requires CUDA_VISIBLE_DEVICES)
    #[arg(long, global = true)]
    use_gpu: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Segment still images
    Image {
        /// Images to segment
        #[arg(long = "input-path", required = true, num_args = 1..)]
        input_paths: Vec<PathBuf>,

        /// Directory for RGBA cut-outs
        #[arg(long, default_value = "humanseg_lite_output")]
        output_dir: PathBuf,

        /// Save cut-outs as images
        #[arg(long)]
        visualization: bool,

        /// Images per network call
        #[arg(long, default_value_t = 1)]
        batch_size: usize,
    },

    /// Segment a frame sequence or live camera with temporal smoothing
    Video {
        /// Directory of frames; the camera is used when absent
        #[arg(long)]
        video_path: Option<PathBuf>,

        /// Directory for composited frames
        #[arg(long, default_value = "humanseg_lite_video_result")]
        save_dir: PathBuf,

        /// Send live output to a v4l2loopback device instead of save_dir
        #[arg(long)]
        output_device: Option<PathBuf>,

        /// Input webcam device index
        #[arg(long, default_value_t = 0)]
        camera: u32,

        /// Stop after this many frames
        #[arg(long)]
        max_frames: Option<u64>,

        /// Target frames per second for live capture
        #[arg(long, default_value_t = 30)]
        fps: u32,

        /// Background colour as r,g,b
        #[arg(long)]
        background: Option<String>,

        /// Background image, resized to the frame
        #[arg(long, conflicts_with = "background")]
        background_image: Option<PathBuf>,

        /// Show matte visualization (grayscale silhouette) instead of the composite
        #[arg(long)]
        show_matte: bool,
    },

    /// Answer a base64 JSON request ({"images": [...]}) with base64 masks
    Serve {
        /// Request file; stdin when absent
        #[arg(long)]
        request: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout carries serving responses
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    tracing::info!(
        "Working resolution {}x{}, thresholds ({}, {}), device {:?}",
        config.working_width,
        config.working_height,
        config.thresholds.background(),
        config.thresholds.foreground(),
        config.device
    );

    let mut segmenter =
        segmentation::create_default_segmenter(&config).context("Failed to load segmentation model")?;

    match args.command {
        Command::Image {
            input_paths,
            output_dir,
            visualization,
            batch_size,
        } => {
            let inputs = segmentation::load_inputs(&input_paths).context("Failed to read input images")?;
            let options = SegmentOptions {
                batch_size,
                visualization,
                output_dir,
            };

            let results = segmenter.segment(&inputs, &options).context("Failed to segment images")?;
            for (input, result) in inputs.iter().zip(&results) {
                let source = input
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                match &result.save_path {
                    Some(path) => tracing::info!("{} -> {}", source, path.display()),
                    None => tracing::info!(
                        "{}: {}x{} mask",
                        source,
                        result.data.width(),
                        result.data.height()
                    ),
                }
            }
        }

        Command::Video {
            video_path,
            save_dir,
            output_device,
            camera,
            max_frames,
            fps,
            background,
            background_image,
            show_matte,
        } => {
            let background = match (background, background_image) {
                (_, Some(path)) => Background::Image(
                    image::open(&path)
                        .with_context(|| format!("Failed to read background {}", path.display()))?
                        .to_rgb8(),
                ),
                (Some(color), None) => Background::Color(parse_color(&color)?),
                (None, None) => Background::Color(Rgb(config.background)),
            };

            let target_fps = video_path.is_none().then_some(fps);
            let mut capture: Box<dyn CaptureSource> = match &video_path {
                Some(dir) => Box::new(
                    FrameDirCapture::new(dir)
                        .with_context(|| format!("Failed to open frame sequence {}", dir.display()))?,
                ),
                None => Box::new(WebcamCapture::new(camera).context("Failed to initialize webcam capture")?),
            };

            let (width, height) = capture.resolution();
            let mut output: Box<dyn OutputSink> = match output_device {
                Some(device) => Box::new(
                    V4L2Output::new(&device, width, height).context("Failed to initialize v4l2loopback output")?,
                ),
                None => Box::new(FrameDirOutput::new(&save_dir, width, height)?),
            };

            let options = VideoOptions {
                max_frames,
                target_fps,
                show_matte,
            };
            let stats = segmenter
                .video_segment(capture.as_mut(), output.as_mut(), &background, &options)
                .context("Video segmentation failed")?;
            tracing::info!("Processed {} frames", stats.frames);
        }

        Command::Serve { request } => {
            let body = match request {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read request {}", path.display()))?,
                None => {
                    let mut body = String::new();
                    std::io::stdin().read_to_string(&mut body)?;
                    body
                }
            };
            let response = serving::serve_json(&mut segmenter, &body).context("Failed to serve request")?;
            println!("{response}");
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<SegmenterConfig> {
    let mut config = match &args.config {
        Some(path) => SegmenterConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SegmenterConfig::default(),
    };

    if let Some(model) = &args.model {
        config.model = Some(model.clone());
    }
    if config.model.is_none() {
        anyhow::bail!("No model given; pass --model or set `model` in the config file");
    }

    config.device = Device::resolve(args.use_gpu || config.device == Device::Gpu)?;
    config.validate()?;
    Ok(config)
}
