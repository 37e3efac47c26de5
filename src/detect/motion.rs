//! Background-subtraction motion detector.
//!
//! Per frame: greyscale, 21x21 Gaussian blur, foreground mask against an
//! adaptive per-pixel background model, binarize, erode then dilate (two
//! iterations each), external contours, minimum-area filter.
//!
//! The background model keeps a running mean and variance per pixel, updated
//! with learning rate `1 / min(2n, history)`. A pixel is foreground when its
//! squared distance from the mean exceeds `var_threshold` times the variance.
//! There is no shadow class: every foreground pixel is full foreground.

use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{dilate, erode};
use imageproc::point::Point;

use super::result::{BoundingBox, MotionRegion, MotionResult};

pub const DEFAULT_MIN_AREA: f64 = 1000.0;
pub const DEFAULT_HISTORY: u32 = 500;
pub const DEFAULT_VAR_THRESHOLD: f32 = 16.0;

const BLUR_KERNEL: u32 = 21;
const MASK_THRESHOLD: u8 = 25;
const MORPH_ITERATIONS: u8 = 2;

const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 75.0;
/// Fraction of the learning rate applied to foreground pixels, so a parked
/// object is slowly absorbed into the background.
const FOREGROUND_ABSORB: f32 = 0.05;

const FOREGROUND: u8 = 255;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionConfig {
    /// Minimum contour area (pixels) for a region to count as motion.
    pub min_area: f64,
    /// Background model history window (frames).
    pub history: u32,
    /// Squared Mahalanobis distance threshold.
    pub var_threshold: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            min_area: DEFAULT_MIN_AREA,
            history: DEFAULT_HISTORY,
            var_threshold: DEFAULT_VAR_THRESHOLD,
        }
    }
}

// ----------------------------------------------------------------------------
// BackgroundModel
// ----------------------------------------------------------------------------

/// Exponentially-updated per-pixel Gaussian background.
pub struct BackgroundModel {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
    frames_seen: u64,
    history: u32,
    var_threshold: f32,
}

impl BackgroundModel {
    pub fn new(history: u32, var_threshold: f32) -> Self {
        Self {
            width: 0,
            height: 0,
            mean: Vec::new(),
            variance: Vec::new(),
            frames_seen: 0,
            history: history.max(1),
            var_threshold,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Update the model with `frame` and return its foreground mask (0 or 255).
    pub fn apply(&mut self, frame: &GrayImage) -> GrayImage {
        if frame.width() != self.width || frame.height() != self.height {
            self.reset(frame);
            return GrayImage::new(frame.width(), frame.height());
        }

        self.frames_seen += 1;
        let horizon = (2 * self.frames_seen).min(self.history as u64) as f32;
        let alpha = 1.0 / horizon;

        let mut mask = GrayImage::new(self.width, self.height);
        for (i, (pixel, out)) in frame.pixels().zip(mask.pixels_mut()).enumerate() {
            let value = pixel[0] as f32;
            let diff = value - self.mean[i];
            let dist2 = diff * diff;

            if dist2 > self.var_threshold * self.variance[i] {
                *out = Luma([FOREGROUND]);
                self.mean[i] += alpha * FOREGROUND_ABSORB * diff;
            } else {
                self.mean[i] += alpha * diff;
                self.variance[i] =
                    (self.variance[i] + alpha * (dist2 - self.variance[i])).clamp(VAR_MIN, VAR_MAX);
            }
        }
        mask
    }

    fn reset(&mut self, frame: &GrayImage) {
        self.width = frame.width();
        self.height = frame.height();
        self.mean = frame.pixels().map(|p| p[0] as f32).collect();
        self.variance = vec![VAR_INIT; self.mean.len()];
        self.frames_seen = 1;
    }
}

// ----------------------------------------------------------------------------
// MotionDetector
// ----------------------------------------------------------------------------

pub struct MotionDetector {
    config: MotionConfig,
    model: BackgroundModel,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            model: BackgroundModel::new(config.history, config.var_threshold),
            config,
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Foreground mask after blur, binarization and speckle removal.
    pub fn foreground_mask(&mut self, frame: &RgbImage) -> GrayImage {
        let gray = image::imageops::grayscale(frame);
        let blurred = gaussian_blur_f32(&gray, kernel_sigma(BLUR_KERNEL));
        let mut mask = self.model.apply(&blurred);
        for pixel in mask.pixels_mut() {
            pixel[0] = if pixel[0] > MASK_THRESHOLD { FOREGROUND } else { 0 };
        }
        let eroded = erode(&mask, Norm::LInf, MORPH_ITERATIONS);
        dilate(&eroded, Norm::LInf, MORPH_ITERATIONS)
    }

    /// Run one frame through the detector.
    pub fn detect(&mut self, frame: &RgbImage) -> MotionResult {
        let mask = self.foreground_mask(frame);

        let regions: Vec<MotionRegion> = find_contours::<i32>(&mask)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(|contour| {
                let area = polygon_area(&contour.points);
                if area < self.config.min_area {
                    return None;
                }
                bounding_box(&contour.points).map(|bbox| MotionRegion { bbox, area })
            })
            .collect();

        MotionResult {
            motion_detected: !regions.is_empty(),
            regions,
        }
    }
}

/// Sigma OpenCV derives for a Gaussian kernel of the given size.
fn kernel_sigma(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Shoelace area of a closed contour.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area: i64 = 0;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice_area.abs() as f64 / 2.0
}

fn bounding_box(points: &[Point<i32>]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (mut x1, mut y1, mut x2, mut y2) = (first.x, first.y, first.x, first.y);
    for p in points {
        x1 = x1.min(p.x);
        y1 = y1.min(p.y);
        x2 = x2.max(p.x);
        y2 = y2.max(p.y);
    }
    Some(BoundingBox::from_corners(x1, y1, x2, y2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const W: u32 = 320;
    const H: u32 = 240;

    fn background() -> RgbImage {
        RgbImage::from_fn(W, H, |x, _| {
            let shade = 50 + (x / 20) as u8;
            Rgb([shade, shade, shade])
        })
    }

    fn with_square(left: u32, top: u32, side: u32) -> RgbImage {
        let mut frame = background();
        for y in top..top + side {
            for x in left..left + side {
                frame.put_pixel(x, y, Rgb([240, 240, 240]));
            }
        }
        frame
    }

    #[test]
    fn static_scene_never_reports_motion() {
        let mut detector = MotionDetector::new(MotionConfig::default());
        let frame = background();
        for _ in 0..60 {
            let result = detector.detect(&frame);
            assert!(!result.motion_detected);
            assert!(result.regions.is_empty());
        }
    }

    #[test]
    fn moving_square_is_reported_from_its_first_frame() {
        let mut detector = MotionDetector::new(MotionConfig::default());
        for _ in 0..40 {
            assert!(!detector.detect(&background()).motion_detected);
        }
        for step in 0..10 {
            let result = detector.detect(&with_square(60 + step * 4, 90, 40));
            assert!(result.motion_detected, "no motion at step {}", step);
            assert!(result
                .regions
                .iter()
                .any(|r| r.area >= DEFAULT_MIN_AREA && r.bbox.area() as f64 >= DEFAULT_MIN_AREA));
        }
    }

    #[test]
    fn speckle_noise_is_filtered_out() {
        let mut detector = MotionDetector::new(MotionConfig::default());
        for _ in 0..20 {
            detector.detect(&background());
        }
        let mut noisy = background();
        noisy.put_pixel(100, 100, Rgb([255, 255, 255]));
        noisy.put_pixel(200, 50, Rgb([0, 0, 0]));
        assert!(!detector.detect(&noisy).motion_detected);
    }

    #[test]
    fn small_objects_fall_below_min_area() {
        let mut detector = MotionDetector::new(MotionConfig {
            min_area: 20_000.0,
            ..MotionConfig::default()
        });
        for _ in 0..20 {
            detector.detect(&background());
        }
        assert!(!detector.detect(&with_square(100, 100, 40)).motion_detected);
    }

    #[test]
    fn resolution_change_resets_the_model() {
        let mut detector = MotionDetector::new(MotionConfig::default());
        detector.detect(&background());
        let smaller = RgbImage::from_pixel(160, 120, Rgb([200, 10, 10]));
        assert!(!detector.detect(&smaller).motion_detected);
        assert!(!detector.detect(&smaller).motion_detected);
    }

    #[test]
    fn shoelace_area_of_square_outline() {
        let points = vec![
            Point::new(0, 0),
            Point::new(39, 0),
            Point::new(39, 39),
            Point::new(0, 39),
        ];
        assert_eq!(polygon_area(&points), 1521.0);
        assert_eq!(
            bounding_box(&points),
            Some(BoundingBox::new(0, 0, 40, 40))
        );
    }

    #[test]
    fn opencv_sigma_for_21_kernel() {
        assert!((kernel_sigma(21) - 3.5).abs() < 1e-6);
    }
}
