use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// Object classifier capability.
///
/// Given a frame, return every object the model recognises together with its
/// confidence and box. Filtering by confidence happens in `ClassifierStage`,
/// so implementations may return low-confidence candidates.
pub trait ObjectClassifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run classification on a frame.
    fn classify(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, called once before the loop starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
