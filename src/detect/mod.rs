//! Motion detection and object classification.
//!
//! - `motion`: background subtraction, speckle removal, contour regions.
//! - `stage`: the interval-gated classifier stage in front of a backend.
//! - `backends`: concrete `ObjectClassifier` implementations.

mod backend;
pub mod backends;
pub mod motion;
mod result;
pub mod schedule;
mod stage;

pub use backend::ObjectClassifier;
pub use backends::labels::{coco_labels, load_labels};
pub use backends::NoopClassifier;
#[cfg(feature = "backend-tract")]
pub use backends::TractYoloClassifier;
pub use motion::{BackgroundModel, MotionConfig, MotionDetector};
pub use result::{non_max_suppression, BoundingBox, Detection, MotionRegion, MotionResult};
pub use schedule::Interval;
pub use stage::ClassifierStage;
