use super::compositor::{composite, Background};
use super::flow::BlockMatchFlow;
use super::fusion::{FusionState, TemporalFusionEngine};
use super::matte::MatteFinalizer;
use super::preprocess::Preprocessor;
use super::types::{ConfidenceEstimator, FlowEstimator, Matte};
use crate::capture::CaptureSource;
use crate::config::SegmenterConfig;
use crate::error::{Error, Result};
use crate::output::OutputSink;
use image::{GrayImage, Rgba, RgbaImage, RgbImage};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A still image to segment, with the path it was read from if any
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub image: RgbImage,
    pub path: Option<PathBuf>,
}

impl ImageInput {
    pub fn from_image(image: RgbImage) -> Self {
        Self { image, path: None }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)?.to_rgb8();
        Ok(Self {
            image,
            path: Some(path.to_path_buf()),
        })
    }
}

/// Read every image in `paths`, failing on the first unreadable one
pub fn load_inputs<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<ImageInput>> {
    paths.iter().map(ImageInput::open).collect()
}

/// Options for still-image segmentation
#[derive(Debug, Clone)]
pub struct SegmentOptions {
    pub batch_size: usize,
    /// Write RGBA cut-outs into `output_dir`
    pub visualization: bool,
    pub output_dir: PathBuf,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            visualization: false,
            output_dir: PathBuf::from("humanseg_lite_output"),
        }
    }
}

/// Result for one still image
#[derive(Debug, Clone)]
pub struct SegmentResult {
    /// Foreground probability × 255 at the original resolution
    pub data: GrayImage,
    /// Where the RGBA cut-out was written, with visualization enabled
    pub save_path: Option<PathBuf>,
}

/// Result for one video frame
#[derive(Debug, Clone)]
pub struct StreamOutput {
    /// Soft matte at the frame's resolution
    pub matte: Matte,
    /// State to pass with the next frame
    pub state: FusionState,
}

/// Options for driving a whole frame sequence
#[derive(Debug, Clone, Default)]
pub struct VideoOptions {
    /// Stop after this many frames
    pub max_frames: Option<u64>,
    /// Pace output to this rate (live sources)
    pub target_fps: Option<u32>,
    /// Emit the matte as a grayscale image instead of the composite
    pub show_matte: bool,
}

/// Totals gathered while processing a sequence
#[derive(Debug, Clone, Default)]
pub struct VideoStats {
    pub frames: u64,
    pub capture_time: Duration,
    pub segment_time: Duration,
    pub output_time: Duration,
}

/// Segmentation network plus temporal post-processing
pub struct HumanSegmenter<E, F = BlockMatchFlow> {
    estimator: E,
    engine: TemporalFusionEngine<F>,
    finalizer: MatteFinalizer,
    preprocessor: Preprocessor,
}

impl<E: ConfidenceEstimator> HumanSegmenter<E, BlockMatchFlow> {
    /// Build with the block-matching flow estimator chosen by `config`
    pub fn from_config(estimator: E, config: &SegmenterConfig) -> Result<Self> {
        Self::new(estimator, BlockMatchFlow::new(config.flow_preset), config)
    }
}

impl<E: ConfidenceEstimator, F: FlowEstimator> HumanSegmenter<E, F> {
    pub fn new(estimator: E, flow: F, config: &SegmenterConfig) -> Result<Self> {
        config.validate()?;

        let (width, height) = estimator.input_size();
        if (width, height) != (config.working_width, config.working_height) {
            tracing::warn!(
                "Estimator input {}x{} differs from configured working size {}x{}; using the estimator's",
                width,
                height,
                config.working_width,
                config.working_height
            );
        }

        Ok(Self {
            estimator,
            engine: TemporalFusionEngine::new(flow, config.fusion)?,
            finalizer: MatteFinalizer::new(config.thresholds),
            preprocessor: Preprocessor::new(width, height),
        })
    }

    /// Working resolution (width, height)
    pub fn working_size(&self) -> (u32, u32) {
        self.estimator.input_size()
    }

    /// Fresh state for the start of a sequence
    pub fn initial_state(&self) -> FusionState {
        let (width, height) = self.working_size();
        FusionState::zeros(width, height)
    }

    /// Segment independent still images
    ///
    /// No temporal state is involved. Images are fed to the network in
    /// groups of `options.batch_size`.
    pub fn segment(&mut self, inputs: &[ImageInput], options: &SegmentOptions) -> Result<Vec<SegmentResult>> {
        if options.batch_size == 0 {
            return Err(Error::InvalidConfiguration("batch size must be at least 1".to_string()));
        }

        let mut results = Vec::with_capacity(inputs.len());

        for (batch_index, batch) in inputs.chunks(options.batch_size).enumerate() {
            let _span = tracing::debug_span!("segment_batch", batch_index).entered();

            let frames: Vec<&RgbImage> = batch.iter().map(|input| &input.image).collect();
            let maps = self.estimator.estimate_batch(&frames)?;
            if maps.len() != batch.len() {
                return Err(Error::Model(format!(
                    "estimator returned {} maps for {} images",
                    maps.len(),
                    batch.len()
                )));
            }

            for (input, map) in batch.iter().zip(maps) {
                let (width, height) = input.image.dimensions();
                let data = Preprocessor::confidence_to_mask(&map, width, height)?;

                let save_path = if options.visualization {
                    Some(save_cutout(input, &data, &options.output_dir)?)
                } else {
                    None
                };

                results.push(SegmentResult { data, save_path });
            }
        }

        tracing::info!("Segmented {} image(s)", results.len());
        Ok(results)
    }

    /// Segment one frame of a sequence
    ///
    /// Frame indices start at 1; index 1 (or 0) starts a new sequence and the
    /// supplied state is ignored. The caller keeps `state` untouched on error.
    pub fn video_stream_segment(
        &mut self,
        frame: &RgbImage,
        frame_index: u64,
        state: &FusionState,
    ) -> Result<StreamOutput> {
        let _span = tracing::debug_span!("video_stream_segment", frame_index).entered();

        let is_init = frame_index <= 1;
        let initial;
        let state = if is_init {
            initial = self.initial_state();
            &initial
        } else {
            state
        };

        let confidence = self.estimator.estimate(frame)?;
        let gray = self.preprocessor.to_gray(frame)?;

        let (fused, next_state) = self.engine.fuse(&confidence, &gray, state, is_init)?;

        let (width, height) = frame.dimensions();
        let matte = self.finalizer.finalize(&fused, width, height)?;

        Ok(StreamOutput {
            matte,
            state: next_state,
        })
    }

    /// Process a whole sequence from `capture` into `output`
    ///
    /// Stops at end of stream or after `options.max_frames` frames.
    pub fn video_segment<C, O>(
        &mut self,
        capture: &mut C,
        output: &mut O,
        background: &Background,
        options: &VideoOptions,
    ) -> Result<VideoStats>
    where
        C: CaptureSource + ?Sized,
        O: OutputSink + ?Sized,
    {
        let frame_duration = options
            .target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_secs_f32(1.0 / fps as f32));
        let mut stats = VideoStats::default();
        let mut state = self.initial_state();

        tracing::info!("Starting video segmentation loop");

        loop {
            if options.max_frames.is_some_and(|max| stats.frames >= max) {
                tracing::info!("Reached frame limit of {}", stats.frames);
                break;
            }
            let loop_start = Instant::now();

            // Capture frame
            let capture_start = Instant::now();
            let Some(frame) = capture.capture_frame()? else {
                tracing::info!("End of stream after {} frames", stats.frames);
                break;
            };
            stats.capture_time += capture_start.elapsed();

            // Segmentation
            let segment_start = Instant::now();
            let StreamOutput { matte, state: next } =
                self.video_stream_segment(&frame, stats.frames + 1, &state)?;
            state = next;
            let output_frame = if options.show_matte {
                Preprocessor::matte_to_rgb(&matte)
            } else {
                composite(&matte, &frame, background)?
            };
            stats.segment_time += segment_start.elapsed();

            // Output frame
            let output_start = Instant::now();
            output.write_frame(&output_frame)?;
            stats.output_time += output_start.elapsed();

            stats.frames += 1;

            // Log stats every 30 frames
            if stats.frames % 30 == 0 {
                let n = stats.frames as f64;
                let avg_capture_ms = stats.capture_time.as_secs_f64() * 1000.0 / n;
                let avg_segment_ms = stats.segment_time.as_secs_f64() * 1000.0 / n;
                let avg_output_ms = stats.output_time.as_secs_f64() * 1000.0 / n;
                let total_ms = avg_capture_ms + avg_segment_ms + avg_output_ms;
                tracing::info!(
                    "Frame {}: capture={:.1}ms, segment={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}",
                    stats.frames,
                    avg_capture_ms,
                    avg_segment_ms,
                    avg_output_ms,
                    total_ms,
                    1000.0 / total_ms.max(f64::EPSILON)
                );
            }

            // Frame rate limiting
            if let Some(frame_duration) = frame_duration {
                let elapsed = loop_start.elapsed();
                if elapsed < frame_duration {
                    std::thread::sleep(frame_duration - elapsed);
                }
            }
        }

        Ok(stats)
    }
}

/// Write the image with the mask as alpha channel, returning the file path
fn save_cutout(input: &ImageInput, mask: &GrayImage, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let (width, height) = input.image.dimensions();
    let rgba = RgbaImage::from_fn(width, height, |x, y| {
        let p = input.image.get_pixel(x, y);
        Rgba([p[0], p[1], p[2], mask.get_pixel(x, y)[0]])
    });

    let path = unique_save_path(input.path.as_deref(), output_dir);
    rgba.save(&path)?;
    tracing::debug!("Saved cut-out to {}", path.display());
    Ok(path)
}

/// `<stem>.png` in `output_dir`, suffixed with `_<n>` if taken
fn unique_save_path(source: Option<&Path>, output_dir: &Path) -> PathBuf {
    let stem = source
        .and_then(|p| p.file_stem())
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            format!("image_{millis}")
        });

    let mut candidate = output_dir.join(format!("{stem}.png"));
    let mut n = 1;
    while candidate.exists() {
        candidate = output_dir.join(format!("{stem}_{n}.png"));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_save_path_uses_stem_and_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let source = Path::new("/photos/person.jpg");

        let first = unique_save_path(Some(source), dir.path());
        assert_eq!(first, dir.path().join("person.png"));

        std::fs::write(&first, b"taken").unwrap();
        let second = unique_save_path(Some(source), dir.path());
        assert_eq!(second, dir.path().join("person_1.png"));
    }

    #[test]
    fn test_load_inputs_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.png");
        RgbImage::new(4, 3).save(&good).unwrap();

        let inputs = load_inputs(&[&good]).unwrap();
        assert_eq!(inputs[0].image.dimensions(), (4, 3));
        assert_eq!(inputs[0].path.as_deref(), Some(good.as_path()));

        assert!(load_inputs(&[good.clone(), dir.path().join("missing.png")]).is_err());
    }

    #[test]
    fn test_unique_save_path_without_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = unique_save_path(None, dir.path());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("image_") && name.ends_with(".png"));
    }
}
