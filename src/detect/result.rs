use serde::Serialize;

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box spanning two corners, inclusive of both.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        let (left, right) = (x1.min(x2), x1.max(x2));
        let (top, bottom) = (y1.min(y2), y1.max(y2));
        Self {
            x: left,
            y: top,
            width: (right - left + 1) as u32,
            height: (bottom - top + 1) as u32,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width as i32).min(other.x + other.width as i32);
        let bottom = (self.y + self.height as i32).min(other.y + other.height as i32);
        if right <= left || bottom <= top {
            return 0.0;
        }
        let intersection = ((right - left) as u64 * (bottom - top) as u64) as f32;
        let union = (self.area() + other.area()) as f32 - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// One labelled object found by the classifier.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    /// In [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// One foreground region found by the motion detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionRegion {
    pub bbox: BoundingBox,
    /// Contour area in pixels.
    pub area: f64,
}

/// Motion detector output for one frame.
#[derive(Clone, Debug, Default)]
pub struct MotionResult {
    pub motion_detected: bool,
    pub regions: Vec<MotionRegion>,
}

/// Greedy per-label non-maximum suppression. Keeps the highest-confidence box
/// of every overlapping group; boxes with different labels never suppress
/// each other. Output is sorted by descending confidence.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..detections.len() {
        let suppressed = (0..kept).any(|prev| {
            detections[prev].label == detections[index].label
                && detections[prev].bbox.iou(&detections[index].bbox) > iou_threshold
        });
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}
