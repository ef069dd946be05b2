use super::fusion::CONFIDENCE_MAX;
use super::preprocess::Preprocessor;
use super::types::{ConfidenceMap, Matte};
use crate::error::{Error, Result};
use image::{ImageBuffer, Luma};
use imageproc::filter::filter3x3;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Row-major 3x3 Gaussian kernel, the outer product of [1, 2, 1] / 4
#[rustfmt::skip]
const GAUSSIAN_3X3: [f32; 9] = [
    1.0 / 16.0, 2.0 / 16.0, 1.0 / 16.0,
    2.0 / 16.0, 4.0 / 16.0, 2.0 / 16.0,
    1.0 / 16.0, 2.0 / 16.0, 1.0 / 16.0,
];

/// Dual thresholds as fractions of the confidence scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholds")]
pub struct Thresholds {
    background: f32,
    foreground: f32,
}

#[derive(Deserialize)]
struct RawThresholds {
    background: f32,
    foreground: f32,
}

impl TryFrom<RawThresholds> for Thresholds {
    type Error = Error;

    fn try_from(raw: RawThresholds) -> Result<Self> {
        Thresholds::new(raw.background, raw.foreground)
    }
}

impl Thresholds {
    /// Requires `0 <= background < foreground <= 1`
    pub fn new(background: f32, foreground: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&background)
            || !(0.0..=1.0).contains(&foreground)
            || background >= foreground
        {
            return Err(Error::InvalidConfiguration(format!(
                "thresholds must satisfy 0 <= background < foreground <= 1, got ({background}, {foreground})"
            )));
        }
        Ok(Self {
            background,
            foreground,
        })
    }

    pub fn background(&self) -> f32 {
        self.background
    }

    pub fn foreground(&self) -> f32 {
        self.foreground
    }

    /// Soft alpha for a confidence value on the [0, 255] scale
    pub fn alpha(&self, confidence: f32) -> f32 {
        let ratio = confidence / CONFIDENCE_MAX;
        ((ratio - self.background) / (self.foreground - self.background)).clamp(0.0, 1.0)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            background: 0.2,
            foreground: 0.8,
        }
    }
}

/// Turns a fused confidence map into a soft matte at frame resolution
#[derive(Debug, Clone, Default)]
pub struct MatteFinalizer {
    thresholds: Thresholds,
}

impl MatteFinalizer {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Build a finalizer from raw threshold values
    pub fn with_thresholds(background: f32, foreground: f32) -> Result<Self> {
        Ok(Self::new(Thresholds::new(background, foreground)?))
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Blur, ramp and resize
    ///
    /// # Arguments
    /// * `fused` - Fused confidence at working resolution, [0, 255]
    /// * `output_width`, `output_height` - Original frame dimensions
    pub fn finalize(&self, fused: &ConfidenceMap, output_width: u32, output_height: u32) -> Result<Matte> {
        let _span = tracing::debug_span!("finalize").entered();

        let (rows, cols) = fused.dim();
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidInput("empty confidence map".to_string()));
        }

        let alpha = self.alpha_map(fused);
        Preprocessor::resize_unit_map(&alpha, output_width, output_height)
    }

    /// Blurred and thresholded alpha at working resolution
    pub fn alpha_map(&self, fused: &ConfidenceMap) -> Array2<f32> {
        gaussian_blur_3x3(fused).mapv(|v| self.thresholds.alpha(v))
    }
}

/// 3x3 Gaussian blur; borders repeat the edge sample
pub fn gaussian_blur_3x3(map: &Array2<f32>) -> Array2<f32> {
    let (rows, cols) = map.dim();

    let image: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(cols as u32, rows as u32, |x, y| Luma([map[[y as usize, x as usize]]]));
    let blurred: ImageBuffer<Luma<f32>, Vec<f32>> = filter3x3(&image, &GAUSSIAN_3X3);

    Array2::from_shape_fn((rows, cols), |(y, x)| blurred.get_pixel(x as u32, y as u32)[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(value: f32) -> ConfidenceMap {
        ConfidenceMap::from_elem((6, 6), value)
    }

    #[test]
    fn test_hysteresis_bounds() {
        let finalizer = MatteFinalizer::with_thresholds(0.2, 0.8).unwrap();

        for v in [0.0, 25.0, 0.2 * 255.0] {
            let matte = finalizer.finalize(&uniform(v), 6, 6).unwrap();
            assert!(matte.pixels().all(|p| p[0] == 0.0), "value {v}");
        }
        for v in [0.8 * 255.0, 230.0, 255.0] {
            let matte = finalizer.finalize(&uniform(v), 6, 6).unwrap();
            assert!(matte.pixels().all(|p| (p[0] - 1.0).abs() < 1e-6), "value {v}");
        }
    }

    #[test]
    fn test_ramp_is_strict_and_monotonic() {
        let thresholds = Thresholds::default();
        let mut last = 0.0;
        for v in 52..204 {
            let alpha = thresholds.alpha(v as f32);
            assert!(alpha > 0.0 && alpha < 1.0, "value {v} gave {alpha}");
            assert!(alpha > last);
            last = alpha;
        }
        assert!((thresholds.alpha(127.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_output_matches_frame_resolution() {
        let finalizer = MatteFinalizer::default();
        let fused = ConfidenceMap::from_elem((192, 192), 128.0);
        let matte = finalizer.finalize(&fused, 1920, 1080).unwrap();
        assert_eq!(matte.dimensions(), (1920, 1080));
    }

    #[test]
    fn test_blur_removes_isolated_noise() {
        let mut map = ConfidenceMap::zeros((5, 5));
        map[[2, 2]] = 255.0;
        let blurred = gaussian_blur_3x3(&map);

        assert!((blurred[[2, 2]] - 63.75).abs() < 1e-4);
        assert!((blurred.sum() - 255.0).abs() < 1e-3);
        // A lone foreground pixel stays below the foreground threshold
        let alpha = MatteFinalizer::default().alpha_map(&map);
        assert!(alpha[[2, 2]] < 1.0);
    }

    #[test]
    fn test_blur_preserves_constant_maps() {
        let blurred = gaussian_blur_3x3(&uniform(42.0));
        assert!(blurred.iter().all(|&v| (v - 42.0).abs() < 1e-5));
        let single = gaussian_blur_3x3(&ConfidenceMap::from_elem((1, 1), 7.0));
        assert_eq!(single[[0, 0]], 7.0);
    }

    #[test]
    fn test_invalid_thresholds() {
        for (bg, fg) in [(0.8, 0.2), (0.5, 0.5), (-0.1, 0.5), (0.2, 1.1), (f32::NAN, 0.5)] {
            assert!(matches!(
                Thresholds::new(bg, fg),
                Err(Error::InvalidConfiguration(_))
            ));
        }
        assert!(Thresholds::new(0.0, 1.0).is_ok());
    }

    #[test]
    fn test_zero_output_size_is_rejected() {
        let result = MatteFinalizer::default().finalize(&uniform(10.0), 0, 10);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_blur_repeats_edge_samples() {
        let mut map = ConfidenceMap::zeros((3, 3));
        map[[0, 0]] = 16.0;
        let blurred = gaussian_blur_3x3(&map);

        // The corner sample stands in for the three missing neighbours above and left
        assert!((blurred[[0, 0]] - 9.0).abs() < 1e-5);
        assert!((blurred[[1, 1]] - 1.0).abs() < 1e-5);
        assert_eq!(blurred[[2, 2]], 0.0);
    }
}
