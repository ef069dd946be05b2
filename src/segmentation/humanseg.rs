use super::device::Device;
use super::preprocess::Preprocessor;
use super::types::{ConfidenceEstimator, ConfidenceMap};
use crate::error::{Error, Result};
use image::RgbImage;
use ndarray::{s, Array3, Ix4};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// Channel of the score map holding the foreground class
const FOREGROUND_CHANNEL: usize = 1;

/// Lightweight human segmentation network (ShuffleNet backbone)
///
/// Stateless: every frame is scored independently. Temporal coherence is
/// added afterwards by the fusion engine.
pub struct HumanSegLite {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,
}

impl HumanSegLite {
    /// Load the network from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `device` - CPU, or GPU through the CUDA execution provider
    /// * `width`, `height` - Working resolution the network was exported with
    pub fn new<P: AsRef<Path>>(model_path: P, device: Device, width: u32, height: u32) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading segmentation model from {} on {:?}", path.display(), device);

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        if device == Device::Gpu {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build().error_on_failure()])
                .map_err(|e| Error::DeviceUnavailable(format!("CUDA execution provider: {e}")))?;
        }

        let session = builder.commit_from_file(path)?;

        tracing::info!("Segmentation model loaded successfully ({}x{})", width, height);

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height),
            width,
            height,
        })
    }
}

impl ConfidenceEstimator for HumanSegLite {
    fn estimate(&mut self, frame: &RgbImage) -> Result<ConfidenceMap> {
        self.estimate_batch(&[frame])?
            .pop()
            .ok_or_else(|| Error::Model("model returned no score map".to_string()))
    }

    fn estimate_batch(&mut self, frames: &[&RgbImage]) -> Result<Vec<ConfidenceMap>> {
        let _span = tracing::debug_span!("humanseg_estimate", batch = frames.len()).entered();

        let input_tensor = self.preprocessor.preprocess_batch(frames)?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input_tensor.view())?])?;
        drop(_infer_span);

        // Score map is the last output: [N, 2, H, W] with background/foreground probabilities
        let index = outputs.len().checked_sub(1).ok_or_else(|| Error::Model("model has no outputs".to_string()))?;
        let scores = outputs[index]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()
            .map_err(|e| Error::Model(format!("unexpected score map rank: {e}")))?;

        let (batch, channels, height, width) = scores.dim();
        if batch != frames.len() || channels <= FOREGROUND_CHANNEL {
            return Err(Error::Model(format!(
                "score map shape {:?} does not match batch of {} frames",
                scores.shape(),
                frames.len()
            )));
        }

        let maps: Array3<f32> = scores.slice(s![.., FOREGROUND_CHANNEL, .., ..]).mapv(|p| 255.0 * p);
        tracing::debug!("Score map {}x{} for {} frame(s)", width, height, batch);

        Ok(maps.outer_iter().map(|map| map.to_owned()).collect())
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
