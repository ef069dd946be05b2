//! Human silhouette segmentation with temporal smoothing for video.
//!
//! A pretrained network scores every frame; for video, each frame's score map
//! is fused with the previous frame's result along the optical flow, then
//! blurred, soft-thresholded and resized into an alpha matte.
//!
//! ```no_run
//! use humanseg::config::SegmenterConfig;
//! use humanseg::segmentation::{create_default_segmenter, FusionState};
//!
//! # fn main() -> humanseg::Result<()> {
//! let config = SegmenterConfig {
//!     model: Some("models/humanseg_lite.onnx".into()),
//!     ..Default::default()
//! };
//! let mut segmenter = create_default_segmenter(&config)?;
//!
//! let mut state: FusionState = segmenter.initial_state();
//! for (index, path) in ["f1.png", "f2.png"].iter().enumerate() {
//!     let frame = image::open(path)?.to_rgb8();
//!     let out = segmenter.video_stream_segment(&frame, index as u64 + 1, &state)?;
//!     state = out.state;
//! }
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod output;
pub mod segmentation;
pub mod serving;

pub use error::{Error, Result};
