pub mod labels;
pub mod noop;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use noop::NoopClassifier;

#[cfg(feature = "backend-tract")]
pub use tract::TractYoloClassifier;
