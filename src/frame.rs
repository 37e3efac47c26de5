//! Frames and the shared latest-frame state.
//!
//! - `Frame`: one resized RGB image plus its capture instant and wall-clock time.
//! - `FramePair`: the raw and annotated renderings of the same source frame.
//! - `SharedFrameState`: single-writer, many-reader holder of the latest `FramePair`.
//!
//! A published pair is immutable. Readers get an `Arc` to the pair, so a reader
//! always sees both halves of the same publish call and the writer never waits
//! on a slow reader.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Default JPEG quality for stream parts and artifacts.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A single frame read from the video source, already resized.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    /// Monotonic capture instant. All interval policies run on this clock.
    pub captured_at: Instant,
    /// Local wall-clock time, used for artifact names and alert texts.
    pub wall_time: DateTime<Local>,
}

impl Frame {
    /// Stamp an image with the current time.
    pub fn now(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
            wall_time: Local::now(),
        }
    }

    /// Build a frame with explicit timestamps (replay and tests).
    pub fn at(image: RgbImage, captured_at: Instant, wall_time: DateTime<Local>) -> Self {
        Self {
            image,
            captured_at,
            wall_time,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

// ----------------------------------------------------------------------------
// FramePair / StreamView
// ----------------------------------------------------------------------------

/// Raw and annotated copies of one source frame, published together.
#[derive(Debug)]
pub struct FramePair {
    /// Monotonic publish counter, starting at 1.
    pub sequence: u64,
    pub raw: RgbImage,
    pub annotated: RgbImage,
    pub wall_time: DateTime<Local>,
}

impl FramePair {
    pub fn view(&self, view: StreamView) -> &RgbImage {
        match view {
            StreamView::Raw => &self.raw,
            StreamView::Annotated => &self.annotated,
        }
    }
}

/// Which half of the pair the live stream exposes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamView {
    #[default]
    Annotated,
    Raw,
}

impl std::str::FromStr for StreamView {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "annotated" => Ok(Self::Annotated),
            "raw" => Ok(Self::Raw),
            other => Err(anyhow!(
                "unknown stream view '{}'; expected 'annotated' or 'raw'",
                other
            )),
        }
    }
}

// ----------------------------------------------------------------------------
// SharedFrameState
// ----------------------------------------------------------------------------

/// Latest frame pair, shared between the detection loop and stream handlers.
///
/// Cloning the handle is cheap; all clones observe the same state.
#[derive(Clone, Debug, Default)]
pub struct SharedFrameState {
    inner: Arc<Mutex<Slot>>,
}

#[derive(Debug, Default)]
struct Slot {
    latest: Option<Arc<FramePair>>,
    published: u64,
}

impl SharedFrameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new pair. Both images must come from the same source frame.
    ///
    /// The lock is held only for a pointer swap.
    pub fn publish(&self, raw: RgbImage, annotated: RgbImage, wall_time: DateTime<Local>) -> u64 {
        let mut slot = self.lock();
        slot.published += 1;
        let sequence = slot.published;
        slot.latest = Some(Arc::new(FramePair {
            sequence,
            raw,
            annotated,
            wall_time,
        }));
        sequence
    }

    /// Latest complete pair, or `None` before the first publish.
    pub fn read_latest(&self) -> Option<Arc<FramePair>> {
        self.lock().latest.clone()
    }

    /// Number of pairs published so far.
    pub fn published(&self) -> u64 {
        self.lock().published
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        // A panicking writer cannot leave a half-built pair behind: the slot
        // only ever holds complete `Arc<FramePair>` values.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ----------------------------------------------------------------------------
// JPEG helpers
// ----------------------------------------------------------------------------

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(image)
        .context("encode frame as jpeg")?;
    Ok(buf)
}

/// Encode and write an RGB image as a JPEG file.
pub fn write_jpeg(path: &Path, image: &RgbImage, quality: u8) -> Result<()> {
    let bytes = encode_jpeg(image, quality)?;
    std::fs::write(path, bytes)
        .with_context(|| format!("failed to write image {}", path.display()))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
