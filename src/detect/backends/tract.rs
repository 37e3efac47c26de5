#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::ObjectClassifier;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection};

const INPUT_SIZE: u32 = 640;
const BOX_FIELDS: usize = 4;
const NMS_IOU: f32 = 0.45;

/// YOLOv8 object detector running an ONNX export through tract.
///
/// Expects the stock export layout: input `[1, 3, 640, 640]` RGB in [0, 1],
/// output `[1, 4 + classes, anchors]` with centre-format boxes in input
/// pixels followed by per-class scores.
pub struct TractYoloClassifier {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    score_floor: f32,
}

impl TractYoloClassifier {
    /// Load and optimize a model. `labels` must match the model's class count.
    pub fn load<P: AsRef<Path>>(model_path: P, labels: Vec<String>) -> Result<Self> {
        let model_path = model_path.as_ref();
        if labels.is_empty() {
            return Err(anyhow!("classifier needs at least one label"));
        }
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "classifier: loaded {} ({} labels)",
            model_path.display(),
            labels.len()
        );
        Ok(Self {
            model,
            labels,
            score_floor: 0.25,
        })
    }

    /// Candidates scoring below this are dropped before NMS. The pipeline's
    /// confidence threshold is applied on top of it.
    pub fn with_score_floor(mut self, floor: f32) -> Self {
        self.score_floor = floor;
        self
    }

    fn build_input(frame: &RgbImage) -> Tensor {
        let resized = image::imageops::resize(frame, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let size = INPUT_SIZE as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame_w: u32, frame_h: u32) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a [1, 4 + classes, anchors] output")?;

        let (_, fields, anchors) = view.dim();
        let classes = fields.saturating_sub(BOX_FIELDS);
        if classes == 0 {
            return Err(anyhow!("model output has {} fields per anchor", fields));
        }
        if classes != self.labels.len() {
            log::warn!(
                "classifier: model has {} classes but {} labels are configured",
                classes,
                self.labels.len()
            );
        }

        let scale_x = frame_w as f32 / INPUT_SIZE as f32;
        let scale_y = frame_h as f32 / INPUT_SIZE as f32;
        let mut detections = Vec::new();

        for anchor in 0..anchors {
            let (class, score) = (0..classes)
                .map(|c| (c, view[[0, BOX_FIELDS + c, anchor]]))
                .fold((0, f32::NEG_INFINITY), |best, x| if x.1 > best.1 { x } else { best });
            if !score.is_finite() || score < self.score_floor {
                continue;
            }
            let Some(label) = self.labels.get(class) else {
                continue;
            };

            let cx = view[[0, 0, anchor]] * scale_x;
            let cy = view[[0, 1, anchor]] * scale_y;
            let w = view[[0, 2, anchor]] * scale_x;
            let h = view[[0, 3, anchor]] * scale_y;
            let x1 = (cx - w / 2.0).clamp(0.0, frame_w as f32 - 1.0);
            let y1 = (cy - h / 2.0).clamp(0.0, frame_h as f32 - 1.0);
            let x2 = (cx + w / 2.0).clamp(0.0, frame_w as f32 - 1.0);
            let y2 = (cy + h / 2.0).clamp(0.0, frame_h as f32 - 1.0);

            detections.push(Detection {
                label: label.clone(),
                confidence: score.clamp(0.0, 1.0),
                bbox: BoundingBox::from_corners(x1 as i32, y1 as i32, x2 as i32, y2 as i32),
            });
        }

        non_max_suppression(&mut detections, NMS_IOU);
        Ok(detections)
    }
}

impl ObjectClassifier for TractYoloClassifier {
    fn name(&self) -> &'static str {
        "tract-yolov8"
    }

    fn classify(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let input = Self::build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame.width(), frame.height())
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(INPUT_SIZE, INPUT_SIZE);
        self.classify(&blank).map(|_| ())
    }
}
