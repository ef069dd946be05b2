use super::types::Matte;
use crate::error::{Error, Result};
use image::{imageops, Rgb, RgbImage};
use std::borrow::Cow;

/// What shows through where the matte is background
#[derive(Debug, Clone)]
pub enum Background {
    Color(Rgb<u8>),
    Image(RgbImage),
}

impl Default for Background {
    fn default() -> Self {
        Background::Color(Rgb([255, 255, 255]))
    }
}

/// Alpha-blend `frame` over `background` using `matte`
///
/// `out = matte * frame + (1 - matte) * background`, per channel.
pub fn composite(matte: &Matte, frame: &RgbImage, background: &Background) -> Result<RgbImage> {
    let _span = tracing::debug_span!("composite").entered();

    if matte.dimensions() != frame.dimensions() {
        return Err(Error::InvalidInput(format!(
            "matte {:?} does not match frame {:?}",
            matte.dimensions(),
            frame.dimensions()
        )));
    }

    let (width, height) = frame.dimensions();
    let background_image: Option<Cow<'_, RgbImage>> = match background {
        Background::Image(image) if image.dimensions() != (width, height) => Some(Cow::Owned(
            imageops::resize(image, width, height, imageops::FilterType::Triangle),
        )),
        Background::Image(image) => Some(Cow::Borrowed(image)),
        Background::Color(_) => None,
    };
    let fill = match background {
        Background::Color(color) => *color,
        Background::Image(_) => Rgb([255, 255, 255]),
    };

    Ok(RgbImage::from_fn(width, height, |x, y| {
        let alpha = matte.get_pixel(x, y)[0].clamp(0.0, 1.0);
        let fg = frame.get_pixel(x, y);
        let bg = background_image
            .as_ref()
            .map_or(fill, |image| *image.get_pixel(x, y));

        let mut out = [0u8; 3];
        for c in 0..3 {
            let value = alpha * fg[c] as f32 + (1.0 - alpha) * bg[c] as f32;
            out[c] = value.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    }))
}

/// Parse a background colour written as `r,g,b`
pub fn parse_color(value: &str) -> Result<Rgb<u8>> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(Error::InvalidConfiguration(format!(
            "background colour must be r,g,b, got {value:?}"
        )));
    }

    let mut rgb = [0u8; 3];
    for (slot, part) in rgb.iter_mut().zip(parts) {
        *slot = part.parse().map_err(|_| {
            Error::InvalidConfiguration(format!("invalid colour component {part:?} in {value:?}"))
        })?;
    }
    Ok(Rgb(rgb))
}
