use crate::error::{Error, Result};
use image::{ImageBuffer, Luma, RgbImage};
use ndarray::Array2;

/// Per-pixel foreground confidence at working resolution, scaled to [0, 255]
/// Indexed as `[[row, col]]`
pub type ConfidenceMap = Array2<f32>;

/// 8-bit luma frame at working resolution, used only for optical flow
pub type GrayFrame = Array2<u8>;

/// Alpha matte: 0.0 = background, 1.0 = foreground
/// Dimensions match the input frame dimensions
pub type Matte = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Dense motion between two frames
///
/// The vector stored at `(row, col)` maps that pixel of the first frame to
/// `(col + dx, row + dy)` in the second frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionField {
    pub dx: Array2<f32>,
    pub dy: Array2<f32>,
}

impl MotionField {
    /// Zero motion field (static scene)
    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            dx: Array2::zeros((height, width)),
            dy: Array2::zeros((height, width)),
        }
    }

    /// Uniform translation of every pixel by `(dx, dy)`
    pub fn uniform(height: usize, width: usize, dx: f32, dy: f32) -> Self {
        Self {
            dx: Array2::from_elem((height, width), dx),
            dy: Array2::from_elem((height, width), dy),
        }
    }

    pub fn from_components(dx: Array2<f32>, dy: Array2<f32>) -> Result<Self> {
        if dx.dim() != dy.dim() {
            return Err(Error::InvalidInput(format!(
                "motion components differ in shape: {:?} vs {:?}",
                dx.dim(),
                dy.dim()
            )));
        }
        Ok(Self { dx, dy })
    }

    /// (height, width)
    pub fn dim(&self) -> (usize, usize) {
        self.dx.dim()
    }

    /// Displacement at a position
    pub fn get(&self, row: usize, col: usize) -> Option<(f32, f32)> {
        Some((*self.dx.get((row, col))?, *self.dy.get((row, col))?))
    }

    /// Per-pixel motion magnitude
    pub fn magnitude(&self) -> Array2<f32> {
        let mut mag = Array2::zeros(self.dim());
        ndarray::Zip::from(&mut mag)
            .and(&self.dx)
            .and(&self.dy)
            .for_each(|m, &dx, &dy| *m = (dx * dx + dy * dy).sqrt());
        mag
    }
}

/// Trait for segmentation networks producing a foreground confidence map
/// Allows swapping the ONNX backend for synthetic estimators in tests
pub trait ConfidenceEstimator {
    /// Estimate foreground confidence for a frame
    ///
    /// # Returns
    /// * Confidence map at the estimator's input size, values in [0, 255]
    fn estimate(&mut self, frame: &RgbImage) -> Result<ConfidenceMap>;

    /// Estimate a batch of frames
    ///
    /// Default implementation runs the frames one at a time.
    fn estimate_batch(&mut self, frames: &[&RgbImage]) -> Result<Vec<ConfidenceMap>> {
        frames.iter().map(|frame| self.estimate(frame)).collect()
    }

    /// Working resolution expected by the network
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}

/// Trait for dense optical flow between two gray frames
pub trait FlowEstimator {
    /// Motion from `prev` to `curr`; both frames share dimensions
    fn estimate(&self, prev: &GrayFrame, curr: &GrayFrame) -> Result<MotionField>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_field_magnitude() {
        let field = MotionField::uniform(2, 3, 3.0, 4.0);
        let mag = field.magnitude();
        assert_eq!(mag.dim(), (2, 3));
        assert!(mag.iter().all(|&m| (m - 5.0).abs() < 1e-6));
    }

    #[test]
    fn test_motion_field_rejects_mismatched_components() {
        let result = MotionField::from_components(Array2::zeros((2, 2)), Array2::zeros((2, 3)));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_motion_field_get_out_of_bounds() {
        let field = MotionField::zeros(2, 2);
        assert_eq!(field.get(1, 1), Some((0.0, 0.0)));
        assert_eq!(field.get(2, 0), None);
    }
}
