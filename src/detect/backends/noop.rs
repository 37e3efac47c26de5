use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::ObjectClassifier;
use crate::detect::result::Detection;

/// Classifier used when no model is configured. Never labels anything, so
/// alerts go out as "objects not classified".
#[derive(Debug, Default)]
pub struct NoopClassifier;

impl NoopClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl ObjectClassifier for NoopClassifier {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn classify(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_classifier_returns_nothing() {
        let mut classifier = NoopClassifier::new();
        assert!(classifier.classify(&RgbImage::new(8, 8)).unwrap().is_empty());
    }
}
