//! sentryd - motion detection daemon
//!
//! This daemon:
//! 1. Reads frames from a video file (looping on end of file)
//! 2. Runs background subtraction on every frame
//! 3. Runs the object classifier on motion or on a timer
//! 4. Serves the annotated frames as an MJPEG stream
//! 5. Queues rate-limited alerts for Telegram (directly or via alert_relay)
//! 6. Optionally collects raw frames for model training

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use motion_sentry::config::ClassifierSettings;
use motion_sentry::{
    AlertDelivery, AlertDispatcher, Annotator, ClassifierStage, DeliveryMode, DetectionLoop,
    FileConfig, FileSource, HttpSpeech, ImageCollector, LoopSettings, MessengerDelivery,
    MotionDetector, NoopClassifier, ObjectClassifier, RelayDelivery, SentryConfig,
    SharedFrameState, StreamServer, TelegramMessenger, VideoInput,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Motion detection daemon with MJPEG stream and alerts")]
struct Args {
    /// Config file (JSON, or TOML when the extension is .toml).
    #[arg(long, env = "SENTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration, print it and exit.
    #[arg(long)]
    check_config: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = SentryConfig::load_from(args.config.as_deref())?;
    if args.check_config {
        println!("{:#?}", cfg);
        return Ok(());
    }

    let source = FileSource::open(FileConfig {
        path: cfg.video_path.clone(),
    })
    .with_context(|| format!("cannot open video source '{}'", cfg.video_path))?;
    let input = VideoInput::new(Box::new(source), cfg.frame_width);

    let classifier = ClassifierStage::new(
        build_classifier(&cfg.classifier)?,
        cfg.classifier.min_confidence,
        cfg.classifier.interval(),
    );
    let annotator = match &cfg.classifier.font_path {
        Some(path) => Annotator::with_font_file(path)?,
        None => {
            log::info!("no font configured; detection boxes are drawn without captions");
            Annotator::new(None)
        }
    };

    let delivery = build_delivery(&cfg)?;
    let (alerts, dispatcher) = AlertDispatcher::start(delivery)?;

    let state = SharedFrameState::new();
    let stream = StreamServer::new(cfg.stream.clone(), state.clone()).spawn()?;
    log::info!(
        "stream listening on http://{}/video_feed ({:?} view)",
        stream.addr,
        cfg.stream.view
    );

    let settings = LoopSettings {
        output_folder: cfg.alert.output_folder.clone(),
        public_url: Some(cfg.alert.public_url.clone()),
        alert_cooldown: cfg.alert.cooldown(),
        collect_interval: cfg.collect.interval(),
    };
    let mut detector = DetectionLoop::new(
        input,
        MotionDetector::new(cfg.motion),
        classifier,
        annotator,
        state,
        alerts,
        settings,
    )?;
    if cfg.collect.enabled {
        let collector = ImageCollector::start_session(&cfg.collect.base_folder, Local::now())?;
        log::info!(
            "collecting training images into {}",
            collector.session_dir().display()
        );
        detector = detector.with_collector(collector);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        signal.store(true, Ordering::SeqCst);
    })
    .context("install signal handler")?;

    let result = detector.run(Arc::clone(&shutdown));

    // Dropping the loop closes the alert queue; the dispatcher drains what is
    // left and exits.
    drop(detector);
    if let Err(err) = stream.stop() {
        log::warn!("stream server did not stop cleanly: {:#}", err);
    }
    let delivered = dispatcher.join();
    log::info!(
        "sentryd stopped: {} alerts processed, {} failed steps",
        delivered.processed,
        delivered.failed_steps
    );

    let stats = result?;
    log::info!(
        "frames={} motion_frames={} alerts={} collected={}",
        stats.frames,
        stats.motion_frames,
        stats.alerts_queued,
        stats.images_collected
    );
    Ok(())
}

fn build_classifier(settings: &ClassifierSettings) -> Result<Box<dyn ObjectClassifier>> {
    let mut classifier: Box<dyn ObjectClassifier> = match &settings.model_path {
        Some(path) => load_model(path, settings)?,
        None => {
            log::warn!("no classifier model configured; alerts will not name objects");
            Box::new(NoopClassifier::new())
        }
    };
    classifier
        .warm_up()
        .with_context(|| format!("classifier '{}' warm-up failed", classifier.name()))?;
    Ok(classifier)
}

#[cfg(feature = "backend-tract")]
fn load_model(path: &std::path::Path, settings: &ClassifierSettings) -> Result<Box<dyn ObjectClassifier>> {
    let labels = match &settings.labels_path {
        Some(labels) => motion_sentry::detect::load_labels(labels)?,
        None => motion_sentry::detect::coco_labels(),
    };
    let model = motion_sentry::detect::TractYoloClassifier::load(path, labels)?;
    Ok(Box::new(model))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(path: &std::path::Path, _settings: &ClassifierSettings) -> Result<Box<dyn ObjectClassifier>> {
    log::warn!(
        "model {} ignored: built without the backend-tract feature",
        path.display()
    );
    Ok(Box::new(NoopClassifier::new()))
}

fn build_delivery(cfg: &SentryConfig) -> Result<Box<dyn AlertDelivery>> {
    let timeout = cfg.alert.timeout();
    match cfg.alert.delivery {
        DeliveryMode::Telegram => {
            let messenger = TelegramMessenger::new(cfg.telegram.messenger_config(timeout)?)?;
            let speech = if cfg.speech.enabled {
                Some(HttpSpeech::new(
                    &cfg.speech.endpoint,
                    &cfg.speech.language,
                    timeout,
                )?)
            } else {
                None
            };
            Ok(Box::new(MessengerDelivery::new(messenger, speech)))
        }
        DeliveryMode::Relay => {
            log::info!("forwarding alerts to {}", cfg.alert.relay_url);
            Ok(Box::new(RelayDelivery::new(&cfg.alert.relay_url, timeout)?))
        }
    }
}
