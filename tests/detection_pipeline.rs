use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Local, TimeZone};
use crossbeam_channel::Receiver;
use image::{Rgb, RgbImage};
use tempfile::TempDir;

use motion_sentry::annotate::MOTION_COLOR;
use motion_sentry::{
    AlertQueue, AlertTask, Annotator, BoundingBox, ClassifierStage, ClipSource, Detection,
    DetectionLoop, Frame, FrameReport, ImageCollector, LoopSettings, MotionConfig,
    FrameSource, MotionDetector, NoopClassifier, ObjectClassifier, SharedFrameState,
    VideoInput,
};

const W: u32 = 320;
const H: u32 = 240;
const FPS: u64 = 10;
const STATIC_SECS: u64 = 5;
const MOTION_SECS: u64 = 2;
const SQUARE: u32 = 40;

fn background() -> RgbImage {
    RgbImage::from_fn(W, H, |x, y| {
        let shade = 40 + ((x + y) / 16) as u8;
        Rgb([shade, shade, shade])
    })
}

fn with_square(left: u32) -> RgbImage {
    let mut frame = background();
    for y in 90..90 + SQUARE {
        for x in left..left + SQUARE {
            frame.put_pixel(x, y, Rgb([235, 235, 235]));
        }
    }
    frame
}

/// Five seconds of a static scene, then a square sliding right for two
/// seconds, at 10 frames per second.
fn scenario() -> Vec<RgbImage> {
    let static_frames = (STATIC_SECS * FPS) as usize;
    let motion_frames = (MOTION_SECS * FPS) as u32;
    let mut frames = vec![background(); static_frames];
    frames.extend((0..motion_frames).map(|step| with_square(40 + step * 4)));
    frames
}

fn motion_start_frame() -> usize {
    (STATIC_SECS * FPS) as usize
}

fn wall_start() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 5, 18, 21, 30, 0).unwrap()
}

struct Labeller {
    calls: Arc<AtomicUsize>,
}

impl ObjectClassifier for Labeller {
    fn name(&self) -> &'static str {
        "labeller"
    }

    fn classify(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            Detection {
                label: "person".into(),
                confidence: 0.92,
                bbox: BoundingBox::new(40, 90, 40, 40),
            },
            Detection {
                label: "car".into(),
                confidence: 0.71,
                bbox: BoundingBox::new(200, 20, 60, 40),
            },
            Detection {
                label: "person".into(),
                confidence: 0.66,
                bbox: BoundingBox::new(10, 10, 30, 30),
            },
            Detection {
                label: "cat".into(),
                confidence: 0.2,
                bbox: BoundingBox::new(0, 0, 8, 8),
            },
        ])
    }
}

struct Harness {
    detector: DetectionLoop,
    state: SharedFrameState,
    alerts: Receiver<AlertTask>,
    _output: TempDir,
}

fn harness(classifier: Box<dyn ObjectClassifier>, settings: LoopSettings, output: TempDir) -> Harness {
    let (queue, alerts) = AlertQueue::channel();
    let state = SharedFrameState::new();
    let input = VideoInput::new(Box::new(ClipSource::new(vec![background()])), W);
    let detector = DetectionLoop::new(
        input,
        MotionDetector::new(MotionConfig::default()),
        ClassifierStage::new(classifier, 0.5, Duration::from_secs(3)),
        Annotator::new(None),
        state.clone(),
        queue,
        settings,
    )
    .expect("build detection loop");
    Harness {
        detector,
        state,
        alerts,
        _output: output,
    }
}

fn settings_in(output: &Path, cooldown: Duration) -> LoopSettings {
    LoopSettings {
        output_folder: output.join("alerts"),
        public_url: Some("http://localhost:5000/".into()),
        alert_cooldown: cooldown,
        ..LoopSettings::default()
    }
}

/// Feed the frames with synthetic, evenly spaced timestamps.
fn run_frames(detector: &mut DetectionLoop, frames: Vec<RgbImage>) -> Vec<FrameReport> {
    let start = Instant::now();
    let frame_step = Duration::from_millis(1000 / FPS);
    frames
        .into_iter()
        .enumerate()
        .map(|(i, image)| {
            let offset = frame_step * i as u32;
            let wall = wall_start() + chrono::Duration::from_std(offset).unwrap();
            detector
                .process_frame(Frame::at(image, start + offset, wall))
                .expect("process frame")
        })
        .collect()
}

#[test]
fn static_then_moving_square_raises_one_alert() {
    let output = TempDir::new().unwrap();
    let settings = settings_in(output.path(), Duration::from_secs(5));
    let mut h = harness(Box::new(NoopClassifier::new()), settings, output);

    let reports = run_frames(&mut h.detector, scenario());
    let start = motion_start_frame();

    for report in &reports[..start] {
        assert!(!report.motion.motion_detected, "motion on static frame {}", report.sequence);
    }
    for report in &reports[start..] {
        assert!(report.motion.motion_detected, "no motion on frame {}", report.sequence);
    }

    let alerts: Vec<_> = h.alerts.try_iter().collect();
    assert_eq!(alerts.len(), 1);
    assert!(reports[start].alert_photo.is_some());
    assert!(alerts[0].photo_path.exists());
    assert_eq!(
        alerts[0].message,
        "Motion detected! Objects not classified. (21:30:05)"
    );
    assert_eq!(
        alerts[0].voice_text.as_deref(),
        Some("Motion detected. Objects not classified.")
    );
    assert_eq!(alerts[0].stream_url.as_deref(), Some("http://localhost:5000/"));

    let photo = image::open(&alerts[0].photo_path).unwrap();
    assert_eq!((photo.width(), photo.height()), (W, H));

    let stats = h.detector.stats();
    assert_eq!(stats.frames, reports.len() as u64);
    assert_eq!(stats.motion_frames, (MOTION_SECS * FPS));
    assert_eq!(stats.alerts_queued, 1);
}

#[test]
fn zero_cooldown_never_reuses_a_photo_name() {
    let output = TempDir::new().unwrap();
    let settings = settings_in(output.path(), Duration::ZERO);
    let mut h = harness(Box::new(NoopClassifier::new()), settings, output);

    run_frames(&mut h.detector, scenario());

    let alerts: Vec<_> = h.alerts.try_iter().collect();
    assert_eq!(alerts.len(), (MOTION_SECS * FPS) as usize);
    let names: Vec<String> = alerts
        .iter()
        .map(|a| a.photo_path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names[0], "motion_detected_20240518-213005.jpg");
    assert_eq!(names[1], "motion_detected_20240518-213005_1.jpg");
    let distinct: std::collections::HashSet<_> = names.iter().collect();
    assert_eq!(distinct.len(), names.len());
    assert!(alerts.iter().all(|a| a.photo_path.exists()));
}

#[test]
fn cooldown_longer_than_the_clip_suppresses_alerts() {
    let output = TempDir::new().unwrap();
    let settings = settings_in(output.path(), Duration::from_secs(10));
    let mut h = harness(Box::new(NoopClassifier::new()), settings, output);

    let reports = run_frames(&mut h.detector, scenario());

    assert!(reports.iter().any(|r| r.motion.motion_detected));
    assert!(reports.iter().all(|r| r.alert_photo.is_none()));
    assert_eq!(h.alerts.try_iter().count(), 0);
}

#[test]
fn alerts_are_spaced_by_the_cooldown() {
    let output = TempDir::new().unwrap();
    let settings = settings_in(output.path(), Duration::from_secs(1));
    let mut h = harness(Box::new(NoopClassifier::new()), settings, output);

    run_frames(&mut h.detector, scenario());

    let alerts: Vec<_> = h.alerts.try_iter().collect();
    assert_eq!(alerts.len(), 2);
    for pair in alerts.windows(2) {
        let gap = pair[1].created_at - pair[0].created_at;
        assert!(gap >= chrono::Duration::seconds(1), "alerts only {:?} apart", gap);
    }
}

#[test]
fn classifier_labels_reach_the_alert_text() {
    let calls = Arc::new(AtomicUsize::new(0));
    let output = TempDir::new().unwrap();
    let settings = settings_in(output.path(), Duration::from_secs(5));
    let classifier = Labeller {
        calls: Arc::clone(&calls),
    };
    let mut h = harness(Box::new(classifier), settings, output);

    let reports = run_frames(&mut h.detector, scenario());
    let start = motion_start_frame();

    // Interval run at t=3s, then one run per motion frame. The frame at t=6s
    // has both triggers and still runs once.
    let motion_frames = reports.len() - start;
    assert_eq!(calls.load(Ordering::SeqCst), 1 + motion_frames);
    assert_eq!(h.detector.stats().classifier_runs, (1 + motion_frames) as u64);

    let timer_run = &reports[(3 * FPS) as usize];
    assert!(!timer_run.motion.motion_detected);
    let detections = timer_run.detections.as_ref().expect("interval run");
    assert_eq!(detections.len(), 3, "detection below min confidence filtered");
    assert!(reports[(3 * FPS) as usize + 1].detections.is_none());

    let alerts: Vec<_> = h.alerts.try_iter().collect();
    assert_eq!(alerts.len(), 1);
    assert_eq!(
        alerts[0].message,
        "Motion detected! Objects: car, person. (21:30:05)"
    );
    assert_eq!(
        alerts[0].voice_text.as_deref(),
        Some("Motion detected. Objects: car, person.")
    );
}

#[test]
fn published_pair_keeps_raw_and_annotated_apart() {
    let output = TempDir::new().unwrap();
    let settings = settings_in(output.path(), Duration::from_secs(5));
    let mut h = harness(Box::new(NoopClassifier::new()), settings, output);

    let frames = scenario();
    let last_raw = frames.last().cloned().unwrap();
    let reports = run_frames(&mut h.detector, frames);

    let latest = h.state.read_latest().expect("published frame");
    assert_eq!(latest.sequence, reports.last().unwrap().sequence);
    assert_eq!(latest.raw, last_raw);
    assert!(latest.annotated.pixels().any(|p| *p == MOTION_COLOR));
    assert!(!latest.raw.pixels().any(|p| *p == MOTION_COLOR));
    assert_eq!(h.state.published(), reports.len() as u64);
}

#[test]
fn collection_saves_raw_frames_on_motion() {
    let output = TempDir::new().unwrap();
    let collect_base = output.path().join("collected_images");
    let settings = LoopSettings {
        collect_interval: Duration::from_secs(1),
        ..settings_in(output.path(), Duration::from_secs(5))
    };
    let collector = ImageCollector::start_session(&collect_base, wall_start()).unwrap();
    let session_dir = collector.session_dir().to_path_buf();
    let mut h = harness(Box::new(NoopClassifier::new()), settings, output);
    h.detector = h.detector.with_collector(collector);

    let reports = run_frames(&mut h.detector, scenario());

    let collected: Vec<_> = reports.iter().filter_map(|r| r.collected.clone()).collect();
    assert_eq!(collected.len(), 2);
    assert!(reports[..motion_start_frame()]
        .iter()
        .all(|r| r.collected.is_none()));
    assert_eq!(session_dir, collect_base.join("20240518_213000"));
    assert_eq!(
        collected[0],
        session_dir.join("collected_20240518-213005.jpg")
    );

    for path in &collected {
        let saved = image::open(path).unwrap().to_rgb8();
        // Raw frames are grey and white; no green box survives into them.
        assert!(!saved
            .pixels()
            .any(|p| p[1] as i32 > p[0] as i32 + 100 && p[1] as i32 > p[2] as i32 + 100));
    }
    assert_eq!(h.detector.stats().images_collected, 2);
}

#[test]
fn step_loops_the_source_at_end_of_stream() {
    let output = TempDir::new().unwrap();
    let (queue, _alerts) = AlertQueue::channel();
    let input = VideoInput::new(
        Box::new(ClipSource::new(vec![background(), background()])),
        W / 2,
    );
    let mut detector = DetectionLoop::new(
        input,
        MotionDetector::new(MotionConfig::default()),
        ClassifierStage::new(Box::new(NoopClassifier::new()), 0.5, Duration::from_secs(3)),
        Annotator::new(None),
        SharedFrameState::new(),
        queue,
        settings_in(output.path(), Duration::from_secs(5)),
    )
    .unwrap();

    for expected in 1..=5 {
        let report = detector.step().unwrap();
        assert_eq!(report.sequence, expected);
    }
    let stats = detector.stats();
    assert_eq!(stats.frames, 5);
    assert_eq!(stats.rewinds, 2);
}

/// Decodes every frame except the ones listed in `broken`.
struct PartlyBroken {
    len: usize,
    broken: Vec<usize>,
    position: usize,
}

impl FrameSource for PartlyBroken {
    fn describe(&self) -> String {
        "partly broken clip".to_string()
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.position >= self.len {
            return Ok(None);
        }
        let index = self.position;
        self.position += 1;
        if self.broken.contains(&index) {
            anyhow::bail!("decode error at frame {}", index);
        }
        Ok(Some(background()))
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}

#[test]
fn step_survives_transient_read_errors() {
    let output = TempDir::new().unwrap();
    let (queue, _alerts) = AlertQueue::channel();
    let source = PartlyBroken {
        len: 4,
        broken: vec![0, 2],
        position: 0,
    };
    let mut detector = DetectionLoop::new(
        VideoInput::new(Box::new(source), W),
        MotionDetector::new(MotionConfig::default()),
        ClassifierStage::new(Box::new(NoopClassifier::new()), 0.5, Duration::from_secs(3)),
        Annotator::new(None),
        SharedFrameState::new(),
        queue,
        settings_in(output.path(), Duration::from_secs(5)),
    )
    .unwrap();

    for expected in 1..=6 {
        let report = detector.step().expect("read errors are not fatal");
        assert_eq!(report.sequence, expected);
    }
    assert_eq!(detector.stats().frames, 6);
    assert!(detector.stats().rewinds >= 3);
}
