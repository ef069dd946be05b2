use super::CaptureSource;
use crate::error::{Error, Result};
use image::RgbImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

/// Recorded sequence stored as one image file per frame
///
/// Frames are played back in file-name order. All frames must share the
/// resolution of the first one.
pub struct FrameDirCapture {
    frames: VecDeque<PathBuf>,
    width: u32,
    height: u32,
}

impl FrameDirCapture {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();

        let mut frames = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_frame_file(&path) {
                frames.push(path);
            }
        }
        frames.sort();

        let first = frames.first().ok_or_else(|| {
            Error::InvalidInput(format!("no frames found in {}", dir.display()))
        })?;
        let (width, height) = image::image_dimensions(first)?;

        tracing::info!(
            "Opened frame sequence {} ({} frames, {}x{})",
            dir.display(),
            frames.len(),
            width,
            height
        );

        Ok(Self {
            frames: frames.into(),
            width,
            height,
        })
    }

    /// Frames not yet played
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

impl CaptureSource for FrameDirCapture {
    fn capture_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.frames.pop_front() else {
            return Ok(None);
        };

        let frame = image::open(&path)?.to_rgb8();
        if frame.dimensions() != (self.width, self.height) {
            return Err(Error::InvalidInput(format!(
                "frame {} is {}x{}, expected {}x{}",
                path.display(),
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        Ok(Some(frame))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_plays_frames_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("b.png", 20u8), ("a.png", 10), ("c.png", 30)] {
            RgbImage::from_pixel(4, 2, Rgb([value; 3]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut capture = FrameDirCapture::new(dir.path()).unwrap();
        assert_eq!(capture.resolution(), (4, 2));
        assert_eq!(capture.remaining(), 3);

        let values: Vec<u8> = std::iter::from_fn(|| capture.capture_frame().unwrap())
            .map(|frame| frame.get_pixel(0, 0)[0])
            .collect();
        assert_eq!(values, vec![10, 20, 30]);
        assert!(capture.capture_frame().unwrap().is_none());
    }

    #[test]
    fn test_empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FrameDirCapture::new(dir.path()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_listing_errors_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert!(matches!(FrameDirCapture::new(&missing), Err(Error::Io(_))));

        // A file where a directory is expected cannot be listed either
        let file = dir.path().join("frame.png");
        RgbImage::new(2, 2).save(&file).unwrap();
        assert!(matches!(FrameDirCapture::new(&file), Err(Error::Io(_))));
    }

    #[test]
    fn test_resolution_change_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("0.png")).unwrap();
        RgbImage::new(8, 4).save(dir.path().join("1.png")).unwrap();

        let mut capture = FrameDirCapture::new(dir.path()).unwrap();
        assert!(capture.capture_frame().unwrap().is_some());
        assert!(matches!(capture.capture_frame(), Err(Error::InvalidInput(_))));
    }
}
