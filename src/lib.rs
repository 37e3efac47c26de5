//! Motion Sentry
//!
//! Watches a video source for motion, classifies what moved, serves a live
//! MJPEG stream and sends photo, text and voice alerts.
//!
//! # Architecture
//!
//! Three execution contexts run side by side and never block each other:
//!
//! 1. **Detection loop** (`pipeline`): reads frames, runs background
//!    subtraction every frame and the object classifier on motion or on a
//!    timer, annotates, publishes, and raises rate-limited alerts.
//! 2. **Stream server** (`api`): one thread per client polls the shared
//!    latest frame and pushes new frames as multipart JPEG parts.
//! 3. **Alert dispatcher** (`alert`): a single worker blocked on an
//!    unbounded channel delivers tasks in FIFO order with per-step failure
//!    isolation.
//!
//! # Module Structure
//!
//! - `frame`: frames, the raw/annotated pair and `SharedFrameState`
//! - `ingest`: frame sources and the looping, resizing `VideoInput`
//! - `detect`: motion detector, classifier trait, rate-limited classifier stage
//! - `annotate`: box and label drawing
//! - `pipeline`: `DetectionLoop`
//! - `alert`: tasks, queue, dispatcher, Telegram/speech/relay delivery
//! - `collect`: training image collection
//! - `api`: stream and relay HTTP servers
//! - `config`: file + environment configuration

pub mod alert;
pub mod annotate;
pub mod api;
pub mod collect;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;

pub use alert::{
    AlertDelivery, AlertDispatcher, AlertQueue, AlertTask, DeliveryReport, DispatcherHandle,
    HttpSpeech, Messenger, MessengerDelivery, RelayDelivery, SpeechSynthesizer, StepOutcome,
    TelegramMessenger,
};
pub use annotate::Annotator;
pub use api::{RelayServer, RelayServerConfig, ServerHandle, StreamConfig, StreamServer};
pub use collect::ImageCollector;
pub use config::{DeliveryMode, RelayConfig, SentryConfig};
pub use detect::{
    BoundingBox, ClassifierStage, Detection, Interval, MotionConfig, MotionDetector,
    MotionRegion, MotionResult, NoopClassifier, ObjectClassifier,
};
pub use frame::{Frame, FramePair, SharedFrameState, StreamView};
pub use ingest::{ClipSource, FileConfig, FileSource, FrameSource, VideoInput};
pub use pipeline::{DetectionLoop, FrameReport, LoopSettings, LoopStats};
