use super::types::{ConfidenceMap, GrayFrame, Matte};
use crate::error::{Error, Result};
use image::{imageops, GrayImage, Luma, RgbImage};
use ndarray::{s, Array2, Array4};

/// Per-channel normalization applied after scaling pixels to [0, 1]
const CHANNEL_MEAN: f32 = 0.5;
const CHANNEL_STD: f32 = 0.5;

/// Preprocessor for converting RGB frames to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Bilinear resize to the working resolution
    pub fn resize(&self, image: &RgbImage) -> RgbImage {
        if image.dimensions() == (self.target_width, self.target_height) {
            return image.clone();
        }
        imageops::resize(
            image,
            self.target_width,
            self.target_height,
            imageops::FilterType::Triangle,
        )
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Scale to [0, 1], then normalize with mean 0.5 / std 0.5
    /// 3. Transpose from HWC to NCHW format in BGR channel order
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>> {
        self.preprocess_batch(&[image])
    }

    /// Preprocess several frames into one [N, 3, height, width] tensor
    pub fn preprocess_batch(&self, images: &[&RgbImage]) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess", batch = images.len()).entered();

        if images.is_empty() {
            return Err(Error::InvalidInput("empty batch".to_string()));
        }

        let (width, height) = (self.target_width as usize, self.target_height as usize);
        let mut tensor = Array4::<f32>::zeros((images.len(), 3, height, width));

        for (n, image) in images.iter().enumerate() {
            ensure_non_empty(image)?;
            let resized = self.resize(image);
            let mut sample = tensor.slice_mut(s![n, .., .., ..]);

            for (x, y, pixel) in resized.enumerate_pixels() {
                let (x, y) = (x as usize, y as usize);
                // Network expects BGR
                for (channel, value) in [pixel[2], pixel[1], pixel[0]].into_iter().enumerate() {
                    sample[[channel, y, x]] = (value as f32 / 255.0 - CHANNEL_MEAN) / CHANNEL_STD;
                }
            }
        }

        Ok(tensor)
    }

    /// Gray frame at working resolution for optical flow
    pub fn to_gray(&self, image: &RgbImage) -> Result<GrayFrame> {
        ensure_non_empty(image)?;
        let resized = self.resize(image);
        let (width, height) = resized.dimensions();

        Ok(Array2::from_shape_fn(
            (height as usize, width as usize),
            |(y, x)| {
                let p = resized.get_pixel(x as u32, y as u32);
                luma(p[0], p[1], p[2])
            },
        ))
    }

    /// Convert a confidence map to an 8-bit mask at the target dimensions
    ///
    /// # Arguments
    /// * `confidence` - Map at model resolution, values in [0, 255]
    /// * `target_width` - Desired output width
    /// * `target_height` - Desired output height
    pub fn confidence_to_mask(
        confidence: &ConfidenceMap,
        target_width: u32,
        target_height: u32,
    ) -> Result<GrayImage> {
        let _span = tracing::debug_span!("postprocess").entered();

        let (rows, cols) = confidence.dim();
        if rows == 0 || cols == 0 || target_width == 0 || target_height == 0 {
            return Err(Error::InvalidInput(format!(
                "cannot resize {}x{} mask to {}x{}",
                cols, rows, target_width, target_height
            )));
        }

        let gray_image = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
            let value = confidence[[y as usize, x as usize]].clamp(0.0, 255.0) as u8;
            Luma([value])
        });

        if (cols as u32, rows as u32) == (target_width, target_height) {
            return Ok(gray_image);
        }

        Ok(imageops::resize(
            &gray_image,
            target_width,
            target_height,
            imageops::FilterType::Triangle,
        ))
    }

    /// Bilinear resize of a map whose values lie in [0, 1]
    pub fn resize_unit_map(map: &Array2<f32>, target_width: u32, target_height: u32) -> Result<Matte> {
        let (rows, cols) = map.dim();
        if rows == 0 || cols == 0 || target_width == 0 || target_height == 0 {
            return Err(Error::InvalidInput(format!(
                "cannot resize {}x{} map to {}x{}",
                cols, rows, target_width, target_height
            )));
        }

        let source = Matte::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([map[[y as usize, x as usize]].clamp(0.0, 1.0)])
        });

        if (cols as u32, rows as u32) == (target_width, target_height) {
            return Ok(source);
        }

        Ok(imageops::resize(
            &source,
            target_width,
            target_height,
            imageops::FilterType::Triangle,
        ))
    }

    /// Convert matte to grayscale RGB image for visualization
    pub fn matte_to_rgb(matte: &Matte) -> RgbImage {
        RgbImage::from_fn(matte.width(), matte.height(), |x, y| {
            let value = (matte.get_pixel(x, y)[0] * 255.0).clamp(0.0, 255.0) as u8;
            image::Rgb([value, value, value])
        })
    }
}

/// BT.601 luma, rounded
fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

fn ensure_non_empty(image: &RgbImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::InvalidInput("empty frame".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_shape_and_channel_order() {
        let pre = Preprocessor::new(8, 4);
        let image = RgbImage::from_pixel(16, 8, Rgb([255, 0, 0]));
        let tensor = pre.preprocess(&image).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 4, 8]);
        // Blue first, red last
        assert!((tensor[[0, 0, 1, 1]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 1, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_batch_stacks_frames() {
        let pre = Preprocessor::new(4, 4);
        let black = RgbImage::new(4, 4);
        let white = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
        let tensor = pre.preprocess_batch(&[&black, &white]).unwrap();

        assert_eq!(tensor.shape(), &[2, 3, 4, 4]);
        assert!(tensor.slice(s![0, .., .., ..]).iter().all(|&v| (v + 1.0).abs() < 1e-6));
        assert!(tensor.slice(s![1, .., .., ..]).iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_empty_frame_is_rejected() {
        let pre = Preprocessor::new(4, 4);
        let empty = RgbImage::new(0, 0);
        assert!(matches!(pre.preprocess(&empty), Err(Error::InvalidInput(_))));
        assert!(matches!(pre.to_gray(&empty), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_to_gray_uses_working_resolution() {
        let pre = Preprocessor::new(6, 3);
        let image = RgbImage::from_pixel(60, 30, Rgb([100, 100, 100]));
        let gray = pre.to_gray(&image).unwrap();

        assert_eq!(gray.dim(), (3, 6));
        assert!(gray.iter().all(|&v| v == 100));
    }

    #[test]
    fn test_confidence_to_mask_resizes() {
        let map = ConfidenceMap::from_elem((4, 4), 255.0);
        let mask = Preprocessor::confidence_to_mask(&map, 10, 7).unwrap();
        assert_eq!(mask.dimensions(), (10, 7));
        assert!(mask.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_resize_unit_map_keeps_constant_values() {
        let map = Array2::from_elem((3, 3), 0.5f32);
        let matte = Preprocessor::resize_unit_map(&map, 9, 5).unwrap();
        assert_eq!(matte.dimensions(), (9, 5));
        assert!(matte.pixels().all(|p| (p[0] - 0.5).abs() < 1e-3));
    }
}
