use image::RgbImage;
use std::time::{Duration, Instant};

use super::backend::ObjectClassifier;
use super::result::Detection;
use super::schedule::Interval;

/// Conditional, confidence-filtered classifier invocation.
///
/// The classifier runs when motion was seen on this frame, or when the
/// re-run interval has elapsed since the previous run. Both conditions on the
/// same frame still produce a single run.
pub struct ClassifierStage {
    classifier: Box<dyn ObjectClassifier>,
    min_confidence: f32,
    schedule: Interval,
    runs: u64,
    failures: u64,
}

impl ClassifierStage {
    pub fn new(classifier: Box<dyn ObjectClassifier>, min_confidence: f32, interval: Duration) -> Self {
        Self {
            classifier,
            min_confidence,
            schedule: Interval::new(interval),
            runs: 0,
            failures: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.classifier.name()
    }

    /// Start the re-run interval at `now` (loop start).
    pub fn arm(&mut self, now: Instant) {
        self.schedule.arm(now);
    }

    pub fn should_run(&self, motion_detected: bool, now: Instant) -> bool {
        motion_detected || self.schedule.ready(now)
    }

    /// Run the classifier if due. `None` when it did not run.
    ///
    /// Classifier errors are logged and reported as an empty result; the
    /// schedule still advances so a failing model is not hammered every frame.
    pub fn maybe_classify(
        &mut self,
        frame: &RgbImage,
        motion_detected: bool,
        now: Instant,
    ) -> Option<Vec<Detection>> {
        if !self.should_run(motion_detected, now) {
            return None;
        }
        self.schedule.mark(now);
        self.runs += 1;

        match self.classifier.classify(frame) {
            Ok(detections) => Some(
                detections
                    .into_iter()
                    .filter(|d| d.confidence >= self.min_confidence)
                    .collect(),
            ),
            Err(err) => {
                self.failures += 1;
                log::warn!(
                    "detector: classifier {} failed: {:#}",
                    self.classifier.name(),
                    err
                );
                Some(Vec::new())
            }
        }
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}
