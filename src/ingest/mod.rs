//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Image sequences stored in a directory
//! - A synthetic `stub://` scene (demo and testing)
//! - In-memory clips (testing and replay)
//!
//! Sources only decode. `VideoInput` layers the session policy on top:
//! resizing to the target width and looping back to the first frame when a
//! source runs out.

mod clip;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
mod input;

use anyhow::Result;
use image::RgbImage;

pub use clip::ClipSource;
pub use file::{FileConfig, FileSource};
pub use input::{resize_to_width, VideoInput};

/// A sequential, rewindable frame decoder.
pub trait FrameSource: Send {
    /// Short description for log lines.
    fn describe(&self) -> String;

    /// Decode the next frame. `Ok(None)` signals end-of-stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<()>;
}
