use anyhow::Result;
use image::RgbImage;

use super::FrameSource;

/// In-memory frame sequence.
pub struct ClipSource {
    frames: Vec<RgbImage>,
    position: usize,
}

impl ClipSource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames,
            position: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ClipSource {
    fn describe(&self) -> String {
        format!("clip({} frames)", self.frames.len())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let frame = self.frames.get(self.position).cloned();
        if frame.is_some() {
            self.position += 1;
        }
        Ok(frame)
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}
