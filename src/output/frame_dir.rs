use super::OutputSink;
use crate::error::Result;
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Writes each frame as a numbered PNG into a directory
pub struct FrameDirOutput {
    dir: PathBuf,
    next_index: u64,
    width: u32,
    height: u32,
}

impl FrameDirOutput {
    /// Create the directory if needed
    pub fn new<P: AsRef<Path>>(dir: P, width: u32, height: u32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        tracing::info!("Writing frames to {}", dir.display());

        Ok(Self {
            dir,
            next_index: 0,
            width,
            height,
        })
    }

    /// Frames written so far
    pub fn frames_written(&self) -> u64 {
        self.next_index
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl OutputSink for FrameDirOutput {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let path = self.dir.join(format!("frame_{:06}.png", self.next_index));
        frame.save(&path)?;
        self.next_index += 1;
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
