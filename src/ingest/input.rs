use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;

use super::FrameSource;
use crate::frame::Frame;

/// Consecutive failed reads tolerated right after a rewind before the
/// source is declared unusable.
pub const MAX_FAILED_READS_AFTER_REWIND: u32 = 8;

/// Session-level view of a frame source: fixed-width frames, endless playback.
pub struct VideoInput {
    source: Box<dyn FrameSource>,
    target_width: u32,
    frames_read: u64,
    failed_reads: u64,
    rewinds: u64,
}

enum ReadOutcome {
    Frame(Frame),
    End,
    Failed,
}

impl VideoInput {
    pub fn new(source: Box<dyn FrameSource>, target_width: u32) -> Self {
        Self {
            source,
            target_width,
            frames_read: 0,
            failed_reads: 0,
            rewinds: 0,
        }
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    fn read(&mut self) -> ReadOutcome {
        match self.source.next_frame() {
            Ok(Some(image)) => {
                self.frames_read += 1;
                ReadOutcome::Frame(Frame::now(resize_to_width(image, self.target_width)))
            }
            Ok(None) => ReadOutcome::End,
            Err(err) => {
                self.failed_reads += 1;
                log::warn!(
                    "detector: frame read from {} failed: {:#}",
                    self.source.describe(),
                    err
                );
                ReadOutcome::Failed
            }
        }
    }

    /// Seek back to the first frame.
    pub fn rewind(&mut self) -> Result<()> {
        self.source
            .rewind()
            .with_context(|| format!("failed to rewind {}", self.source.describe()))?;
        self.rewinds += 1;
        Ok(())
    }

    /// Next frame, looping to the start on end-of-stream or a failed read.
    ///
    /// After a rewind, unreadable frames are skipped up to
    /// `MAX_FAILED_READS_AFTER_REWIND` in a row. Fails if the source ends
    /// right after a rewind or keeps failing past that bound.
    pub fn next(&mut self) -> Result<Frame> {
        if let ReadOutcome::Frame(frame) = self.read() {
            return Ok(frame);
        }
        self.rewind()?;
        for _ in 0..=MAX_FAILED_READS_AFTER_REWIND {
            match self.read() {
                ReadOutcome::Frame(frame) => return Ok(frame),
                ReadOutcome::End => {
                    return Err(anyhow!(
                        "{} produced no frames after rewinding",
                        self.source.describe()
                    ))
                }
                ReadOutcome::Failed => {}
            }
        }
        Err(anyhow!(
            "{} failed {} reads in a row after rewinding",
            self.source.describe(),
            MAX_FAILED_READS_AFTER_REWIND + 1
        ))
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn failed_reads(&self) -> u64 {
        self.failed_reads
    }

    pub fn rewinds(&self) -> u64 {
        self.rewinds
    }
}

/// Resize to `width`, preserving aspect ratio. Images already at that width
/// pass through untouched.
pub fn resize_to_width(image: RgbImage, width: u32) -> RgbImage {
    if width == 0 || image.width() == width || image.width() == 0 {
        return image;
    }
    let height = ((image.height() as u64 * width as u64) / image.width() as u64).max(1) as u32;
    image::imageops::resize(&image, width, height, FilterType::Triangle)
}
