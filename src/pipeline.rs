//! The detection loop.
//!
//! One iteration per frame:
//! 1. read the next frame (looping the source on end-of-stream)
//! 2. keep the resized frame as the raw copy
//! 3. motion detection on the raw copy, green boxes on the annotated copy
//! 4. classifier when motion was seen or its interval elapsed, blue boxes
//! 5. on motion with the cool-down elapsed: save the annotated photo and
//!    enqueue an alert
//! 6. on motion with collection enabled and its interval elapsed: save the
//!    raw frame
//! 7. publish the raw/annotated pair, moving both images into shared state
//!
//! All interval timers are armed on the first frame, so the first alert can
//! only fire one full cool-down after the loop starts.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::RgbImage;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alert::{AlertQueue, AlertTask};
use crate::annotate::Annotator;
use crate::collect::ImageCollector;
use crate::detect::{ClassifierStage, Detection, Interval, MotionDetector, MotionResult};
use crate::frame::{write_jpeg, Frame, SharedFrameState, DEFAULT_JPEG_QUALITY};
use crate::ingest::VideoInput;

pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(5);
pub const DEFAULT_COLLECT_INTERVAL: Duration = Duration::from_secs(60);
pub const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Loop policy knobs that are not owned by a component.
#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Flat folder for alert photos; created if missing.
    pub output_folder: PathBuf,
    /// Link embedded in alert texts.
    pub public_url: Option<String>,
    pub alert_cooldown: Duration,
    pub collect_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            output_folder: PathBuf::from("output"),
            public_url: None,
            alert_cooldown: DEFAULT_ALERT_COOLDOWN,
            collect_interval: DEFAULT_COLLECT_INTERVAL,
        }
    }
}

/// Counters logged periodically and returned when the loop stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub motion_frames: u64,
    pub classifier_runs: u64,
    pub alerts_queued: u64,
    pub images_collected: u64,
    pub rewinds: u64,
}

/// What happened to one frame.
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub sequence: u64,
    pub motion: MotionResult,
    /// `None` when the classifier did not run on this frame.
    pub detections: Option<Vec<Detection>>,
    pub alert_photo: Option<PathBuf>,
    pub collected: Option<PathBuf>,
}

pub struct DetectionLoop {
    input: VideoInput,
    motion: MotionDetector,
    classifier: ClassifierStage,
    annotator: Annotator,
    state: SharedFrameState,
    alerts: AlertQueue,
    settings: LoopSettings,
    alert_interval: Interval,
    collector: Option<ImageCollector>,
    collect_interval: Interval,
    stats: LoopStats,
    stats_log: Interval,
    armed: bool,
}

impl DetectionLoop {
    pub fn new(
        input: VideoInput,
        motion: MotionDetector,
        classifier: ClassifierStage,
        annotator: Annotator,
        state: SharedFrameState,
        alerts: AlertQueue,
        settings: LoopSettings,
    ) -> Result<Self> {
        std::fs::create_dir_all(&settings.output_folder).with_context(|| {
            format!(
                "failed to create output folder {}",
                settings.output_folder.display()
            )
        })?;
        Ok(Self {
            input,
            motion,
            classifier,
            annotator,
            state,
            alerts,
            alert_interval: Interval::new(settings.alert_cooldown),
            collect_interval: Interval::new(settings.collect_interval),
            settings,
            collector: None,
            stats: LoopStats::default(),
            stats_log: Interval::new(STATS_LOG_INTERVAL),
            armed: false,
        })
    }

    /// Enable training-image collection.
    pub fn with_collector(mut self, collector: ImageCollector) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn stats(&self) -> LoopStats {
        LoopStats {
            classifier_runs: self.classifier.runs(),
            rewinds: self.input.rewinds(),
            ..self.stats
        }
    }

    /// Run until `shutdown` is set. Returns an error only when the source
    /// can no longer produce frames.
    pub fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<LoopStats> {
        log::info!(
            "detector: running on {} (classifier={}, cooldown={:?})",
            self.input.describe(),
            self.classifier.name(),
            self.settings.alert_cooldown
        );
        while !shutdown.load(Ordering::SeqCst) {
            self.step()?;
        }
        let stats = self.stats();
        log::info!("detector: stopped after {} frames", stats.frames);
        Ok(stats)
    }

    /// Read and process one frame.
    pub fn step(&mut self) -> Result<FrameReport> {
        let frame = self.input.next().context("video source failed")?;
        let report = self.process_frame(frame)?;
        self.maybe_log_stats(Instant::now());
        Ok(report)
    }

    /// Process one already-read frame. Timing decisions use the frame's own
    /// capture instant.
    pub fn process_frame(&mut self, frame: Frame) -> Result<FrameReport> {
        let now = frame.captured_at;
        let wall_time = frame.wall_time;
        if !self.armed {
            self.classifier.arm(now);
            self.alert_interval.arm(now);
            self.collect_interval.arm(now);
            self.stats_log.arm(Instant::now());
            self.armed = true;
        }
        self.stats.frames += 1;

        let raw = frame.image;
        let mut annotated = raw.clone();

        let motion = self.motion.detect(&raw);
        self.annotator.draw_motion(&mut annotated, &motion.regions);
        if motion.motion_detected {
            self.stats.motion_frames += 1;
        }

        let detections = self
            .classifier
            .maybe_classify(&raw, motion.motion_detected, now);
        if let Some(detections) = &detections {
            self.annotator.draw_detections(&mut annotated, detections);
        }

        let alert_photo = if motion.motion_detected && self.alert_interval.try_fire(now) {
            self.raise_alert(&annotated, detections.as_deref().unwrap_or(&[]), wall_time)
        } else {
            None
        };

        let collected = match self.collector.as_mut() {
            Some(collector)
                if motion.motion_detected && self.collect_interval.try_fire(now) =>
            {
                match collector.save(&raw, wall_time) {
                    Ok(path) => {
                        self.stats.images_collected += 1;
                        log::info!("detector: collected {}", path.display());
                        Some(path)
                    }
                    Err(err) => {
                        log::error!("detector: image collection failed: {:#}", err);
                        None
                    }
                }
            }
            _ => None,
        };

        let sequence = self.state.publish(raw, annotated, wall_time);

        Ok(FrameReport {
            sequence,
            motion,
            detections,
            alert_photo,
            collected,
        })
    }

    fn raise_alert(
        &mut self,
        annotated: &RgbImage,
        detections: &[Detection],
        wall_time: DateTime<Local>,
    ) -> Option<PathBuf> {
        let photo_path = alert_photo_path(&self.settings.output_folder, wall_time);
        if let Err(err) = write_jpeg(&photo_path, annotated, DEFAULT_JPEG_QUALITY) {
            // The text step still carries the alert without a photo.
            log::error!("detector: failed to save alert photo: {:#}", err);
        }

        let labels = unique_labels(detections);
        let task = AlertTask::for_motion(
            photo_path.clone(),
            &labels,
            wall_time,
            self.settings.public_url.clone(),
        );
        log::info!("detector: {}", task.message);
        if self.alerts.enqueue(task) {
            self.stats.alerts_queued += 1;
        }
        Some(photo_path)
    }

    fn maybe_log_stats(&mut self, now: Instant) {
        if !self.stats_log.try_fire(now) {
            return;
        }
        let stats = self.stats();
        log::info!(
            "detector: frames={} motion_frames={} classifier_runs={} alerts={} collected={} rewinds={} pending_alerts={}",
            stats.frames,
            stats.motion_frames,
            stats.classifier_runs,
            stats.alerts_queued,
            stats.images_collected,
            stats.rewinds,
            self.alerts.pending()
        );
    }
}

/// Sorted, de-duplicated classifier labels.
/// `motion_detected_YYYYmmdd-HHMMSS.jpg`, with `_N` appended when an alert
/// from the same second already owns that name.
fn alert_photo_path(folder: &Path, wall_time: DateTime<Local>) -> PathBuf {
    let stamp = wall_time.format("%Y%m%d-%H%M%S").to_string();
    let first = folder.join(format!("motion_detected_{}.jpg", stamp));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| folder.join(format!("motion_detected_{}_{}.jpg", stamp, n)))
        .find(|path| !path.exists())
        .unwrap_or(first)
}

pub fn unique_labels(detections: &[Detection]) -> Vec<String> {
    detections
        .iter()
        .map(|d| d.label.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
