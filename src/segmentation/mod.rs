mod compositor;
mod device;
mod flow;
mod fusion;
mod humanseg;
mod matte;
mod preprocess;
mod segmenter;
pub mod types;

pub use compositor::{composite, parse_color, Background};
pub use device::Device;
pub use flow::{finest_scale_factor, BlockMatchFlow, FlowPreset};
pub use fusion::{FusionParams, FusionState, TemporalFusionEngine, CONFIDENCE_MAX};
pub use humanseg::HumanSegLite;
pub use matte::{gaussian_blur_3x3, MatteFinalizer, Thresholds};
pub use preprocess::Preprocessor;
pub use segmenter::{
    load_inputs, HumanSegmenter, ImageInput, SegmentOptions, SegmentResult, StreamOutput, VideoOptions, VideoStats,
};
pub use types::{ConfidenceEstimator, ConfidenceMap, FlowEstimator, GrayFrame, Matte, MotionField};

use crate::config::SegmenterConfig;
use crate::error::{Error, Result};

/// Create the default segmenter: ONNX network plus block-matching flow
pub fn create_default_segmenter(config: &SegmenterConfig) -> Result<HumanSegmenter<HumanSegLite>> {
    let model_path = config
        .model
        .as_ref()
        .ok_or_else(|| Error::InvalidConfiguration("no model path configured".to_string()))?;

    let model = HumanSegLite::new(model_path, config.device, config.working_width, config.working_height)?;
    HumanSegmenter::from_config(model, config)
}
