//! Drawing detector output onto the annotated frame copy.

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::{BoundingBox, Detection, MotionRegion};

pub const MOTION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const DETECTION_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

const BOX_THICKNESS: u32 = 2;
const LABEL_OFFSET: i32 = 10;
const LABEL_SCALE: f32 = 16.0;

/// Draws motion and detection boxes. Labels need a TrueType font; without
/// one only the boxes are drawn.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    /// Load a `.ttf`/`.otf` font for detection captions.
    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| anyhow!("{} is not a usable TrueType/OpenType font", path.display()))?;
        Ok(Self::new(Some(font)))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw_motion(&self, canvas: &mut RgbImage, regions: &[MotionRegion]) {
        for region in regions {
            draw_box(canvas, &region.bbox, MOTION_COLOR);
        }
    }

    pub fn draw_detections(&self, canvas: &mut RgbImage, detections: &[Detection]) {
        for detection in detections {
            draw_box(canvas, &detection.bbox, DETECTION_COLOR);
            if let Some(font) = &self.font {
                let caption = caption(detection);
                let y = (detection.bbox.y - LABEL_OFFSET).max(0);
                draw_text_mut(
                    canvas,
                    DETECTION_COLOR,
                    detection.bbox.x,
                    y,
                    PxScale::from(LABEL_SCALE),
                    font,
                    &caption,
                );
            }
        }
    }
}

/// `"<label> <confidence>"` with two decimals.
pub fn caption(detection: &Detection) -> String {
    format!("{} {:.2}", detection.label, detection.confidence)
}

/// Hollow box, thickened inwards so the outline stays inside `bbox`.
fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    for inset in 0..BOX_THICKNESS {
        let width = bbox.width.saturating_sub(2 * inset);
        let height = bbox.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at(bbox.x + inset as i32, bbox.y + inset as i32).of_size(width, height);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}
