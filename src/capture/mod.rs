mod frame_dir;
mod webcam;

pub use frame_dir::FrameDirCapture;
pub use webcam::WebcamCapture;

use crate::error::Result;
use image::RgbImage;

/// Trait for frame sources
pub trait CaptureSource {
    /// Capture the next frame; `None` at end of stream
    fn capture_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}
