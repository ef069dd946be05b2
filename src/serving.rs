//! Base64 request/response serving of still-image segmentation.

use crate::error::{Error, Result};
use crate::segmentation::{ConfidenceEstimator, FlowEstimator, HumanSegmenter, ImageInput, SegmentOptions};
use base64::{engine::general_purpose, Engine as _};
use image::{GrayImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Images to segment, each base64-encoded in any format the image crate reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingRequest {
    pub images: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    1
}

/// Base64 PNG of the 8-bit foreground mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServingResult {
    pub data: String,
}

/// Decode a base64 image payload
pub fn base64_to_image(encoded: &str) -> Result<RgbImage> {
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::InvalidInput(format!("invalid base64 payload: {e}")))?;

    let image = image::load_from_memory(&bytes)
        .map_err(|e| Error::InvalidInput(format!("undecodable image payload: {e}")))?;
    Ok(image.to_rgb8())
}

/// Encode a mask as base64 PNG
pub fn image_to_base64(mask: &GrayImage) -> Result<String> {
    let mut png = Cursor::new(Vec::new());
    mask.write_to(&mut png, ImageFormat::Png)?;
    Ok(general_purpose::STANDARD.encode(png.into_inner()))
}

/// Handle one serving request
pub fn serve<E, F>(segmenter: &mut HumanSegmenter<E, F>, request: &ServingRequest) -> Result<Vec<ServingResult>>
where
    E: ConfidenceEstimator,
    F: FlowEstimator,
{
    let _span = tracing::info_span!("serve", images = request.images.len()).entered();

    let inputs = request
        .images
        .iter()
        .map(|encoded| base64_to_image(encoded).map(ImageInput::from_image))
        .collect::<Result<Vec<_>>>()?;

    let options = SegmentOptions {
        batch_size: request.batch_size,
        ..Default::default()
    };

    segmenter
        .segment(&inputs, &options)?
        .iter()
        .map(|result| image_to_base64(&result.data).map(|data| ServingResult { data }))
        .collect()
}

/// Handle a JSON request body, returning the JSON response body
pub fn serve_json<E, F>(segmenter: &mut HumanSegmenter<E, F>, body: &str) -> Result<String>
where
    E: ConfidenceEstimator,
    F: FlowEstimator,
{
    let request: ServingRequest = serde_json::from_str(body)
        .map_err(|e| Error::InvalidInput(format!("malformed serving request: {e}")))?;
    let results = serve(segmenter, &request)?;
    Ok(serde_json::to_string(&results)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmenterConfig;
    use crate::segmentation::ConfidenceMap;
    use image::{Luma, Rgb};

    /// Marks bright pixels as foreground
    struct BrightnessEstimator;

    impl ConfidenceEstimator for BrightnessEstimator {
        fn estimate(&mut self, frame: &RgbImage) -> Result<ConfidenceMap> {
            let resized = image::imageops::resize(frame, 8, 8, image::imageops::FilterType::Nearest);
            Ok(ConfidenceMap::from_shape_fn((8, 8), |(y, x)| {
                resized.get_pixel(x as u32, y as u32)[0] as f32
            }))
        }

        fn input_size(&self) -> (u32, u32) {
            (8, 8)
        }
    }

    fn segmenter() -> HumanSegmenter<BrightnessEstimator> {
        let config = SegmenterConfig {
            working_width: 8,
            working_height: 8,
            ..Default::default()
        };
        HumanSegmenter::from_config(BrightnessEstimator, &config).unwrap()
    }

    fn encode_rgb(image: &RgbImage) -> String {
        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, ImageFormat::Png).unwrap();
        general_purpose::STANDARD.encode(png.into_inner())
    }

    #[test]
    fn test_base64_image_round_trip() {
        let mask = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 40 + y * 100) as u8]));
        let encoded = image_to_base64(&mask).unwrap();
        let decoded = base64_to_image(&encoded).unwrap();

        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(2, 1)[0], 180);
    }

    #[test]
    fn test_invalid_payloads_are_rejected() {
        assert!(matches!(base64_to_image("%%%"), Err(Error::InvalidInput(_))));
        let not_an_image = general_purpose::STANDARD.encode(b"hello");
        assert!(matches!(base64_to_image(&not_an_image), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_serve_returns_mask_per_image() {
        let mut segmenter = segmenter();
        let request = ServingRequest {
            images: vec![
                encode_rgb(&RgbImage::from_pixel(16, 12, Rgb([255, 255, 255]))),
                encode_rgb(&RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]))),
            ],
            batch_size: 2,
        };

        let results = serve(&mut segmenter, &request).unwrap();
        assert_eq!(results.len(), 2);

        let white = base64_to_image(&results[0].data).unwrap();
        assert_eq!(white.dimensions(), (16, 12));
        assert!(white.pixels().all(|p| p[0] == 255));

        let black = base64_to_image(&results[1].data).unwrap();
        assert_eq!(black.dimensions(), (10, 10));
        assert!(black.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_serve_json() {
        let mut segmenter = segmenter();
        let body = format!(
            r#"{{"images": ["{}"]}}"#,
            encode_rgb(&RgbImage::from_pixel(4, 4, Rgb([255, 255, 255])))
        );

        let response = serve_json(&mut segmenter, &body).unwrap();
        let results: Vec<ServingResult> = serde_json::from_str(&response).unwrap();
        assert_eq!(results.len(), 1);

        assert!(matches!(
            serve_json(&mut segmenter, "{\"images\": 3}"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_json_failures_outside_the_request_keep_their_kind() {
        let encode_failure = serde_json::from_str::<u8>("[").unwrap_err();
        assert!(matches!(Error::from(encode_failure), Error::Json(_)));
    }
}
