use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::alert::TelegramConfig;
use crate::api::StreamConfig;
use crate::detect::motion::{DEFAULT_HISTORY, DEFAULT_MIN_AREA, DEFAULT_VAR_THRESHOLD};
use crate::detect::MotionConfig;
use crate::frame::{StreamView, DEFAULT_JPEG_QUALITY};

const DEFAULT_VIDEO_PATH: &str = "videos/video.mp4";
const DEFAULT_FRAME_WIDTH: u32 = 480;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_DETECTION_INTERVAL_SECS: f64 = 3.0;
const DEFAULT_ALERT_COOLDOWN_SECS: f64 = 5.0;
const DEFAULT_OUTPUT_FOLDER: &str = "output";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:5000/";
const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:5001/send_task";
const DEFAULT_DELIVERY_TIMEOUT_SECS: f64 = 5.0;
const DEFAULT_TELEGRAM_API_BASE: &str = crate::alert::DEFAULT_TELEGRAM_API_BASE;
const DEFAULT_SPEECH_ENDPOINT: &str = "https://translate.google.com/translate_tts";
const DEFAULT_SPEECH_LANGUAGE: &str = "en";
const DEFAULT_COLLECT_INTERVAL_SECS: f64 = 60.0;
const DEFAULT_COLLECT_FOLDER: &str = "collected_images";
const DEFAULT_STREAM_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_STREAM_POLL_MS: u64 = 30;
const DEFAULT_STREAM_MAX_CLIENTS: usize = 16;
const DEFAULT_RELAY_ADDR: &str = "0.0.0.0:5001";

// ----------------------------------------------------------------------------
// File layer
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    video_path: Option<String>,
    frame_width: Option<u32>,
    motion: Option<MotionFile>,
    classifier: Option<ClassifierFile>,
    alert: Option<AlertFile>,
    telegram: Option<TelegramFile>,
    speech: Option<SpeechFile>,
    collect: Option<CollectFile>,
    stream: Option<StreamFile>,
    relay: Option<RelayFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionFile {
    min_area: Option<f64>,
    history: Option<u32>,
    var_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierFile {
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    font_path: Option<PathBuf>,
    min_confidence: Option<f32>,
    interval_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertFile {
    cooldown_secs: Option<f64>,
    output_folder: Option<PathBuf>,
    public_url: Option<String>,
    delivery: Option<DeliveryMode>,
    relay_url: Option<String>,
    timeout_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct TelegramFile {
    bot_token: Option<String>,
    chat_id: Option<String>,
    api_base: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SpeechFile {
    enabled: Option<bool>,
    endpoint: Option<String>,
    language: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CollectFile {
    enabled: Option<bool>,
    interval_secs: Option<f64>,
    base_folder: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamFile {
    addr: Option<String>,
    view: Option<StreamView>,
    poll_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    max_clients: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct RelayFile {
    addr: Option<String>,
}

// ----------------------------------------------------------------------------
// Resolved settings
// ----------------------------------------------------------------------------

/// How the daemon delivers alerts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Talk to the Telegram Bot API from this process.
    #[default]
    Telegram,
    /// Forward tasks to an `alert_relay` service.
    Relay,
}

impl FromStr for DeliveryMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "telegram" => Ok(Self::Telegram),
            "relay" => Ok(Self::Relay),
            other => Err(anyhow!(
                "unknown alert delivery '{}'; expected 'telegram' or 'relay'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
    pub min_confidence: f32,
    pub interval_secs: f64,
}

impl ClassifierSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldown_secs: f64,
    pub output_folder: PathBuf,
    pub public_url: String,
    pub delivery: DeliveryMode,
    pub relay_url: String,
    pub timeout_secs: f64,
}

impl AlertSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

#[derive(Clone)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: String,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl TelegramSettings {
    fn require(&self) -> Result<()> {
        if self.bot_token.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(anyhow!(
                "TELEGRAM_BOT_TOKEN is not set; export it or set telegram.bot_token in the config file \
                 (or use SENTRY_ALERT_DELIVERY=relay)"
            ));
        }
        if self.chat_id.as_deref().map_or(true, |c| c.trim().is_empty()) {
            return Err(anyhow!(
                "TELEGRAM_CHAT_ID is not set; export it or set telegram.chat_id in the config file"
            ));
        }
        Ok(())
    }

    /// Messenger configuration; fails when credentials are missing.
    pub fn messenger_config(&self, timeout: Duration) -> Result<TelegramConfig> {
        self.require()?;
        Ok(TelegramConfig {
            bot_token: self.bot_token.clone().unwrap_or_default(),
            chat_id: self.chat_id.clone().unwrap_or_default(),
            api_base: self.api_base.clone(),
            timeout,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SpeechSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct CollectSettings {
    pub enabled: bool,
    pub interval_secs: f64,
    pub base_folder: PathBuf,
}

impl CollectSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

/// Configuration of the `sentryd` daemon.
#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub video_path: String,
    pub frame_width: u32,
    pub motion: MotionConfig,
    pub classifier: ClassifierSettings,
    pub alert: AlertSettings,
    pub telegram: TelegramSettings,
    pub speech: SpeechSettings,
    pub collect: CollectSettings,
    pub stream: StreamConfig,
}

impl SentryConfig {
    /// Defaults, then the file named by `SENTRY_CONFIG` (JSON, or TOML by
    /// extension), then environment overrides, then validation.
    pub fn load() -> Result<Self> {
        Self::load_from(env_string("SENTRY_CONFIG").map(PathBuf::from).as_deref())
    }

    /// Like `load`, with an explicit config file instead of `SENTRY_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = read_optional_file(path)?;
        let mut cfg = Self::from_file(file);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Self {
        let motion = file.motion.unwrap_or_default();
        let classifier = file.classifier.unwrap_or_default();
        let alert = file.alert.unwrap_or_default();
        let collect = file.collect.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();

        Self {
            video_path: file
                .video_path
                .unwrap_or_else(|| DEFAULT_VIDEO_PATH.to_string()),
            frame_width: file.frame_width.unwrap_or(DEFAULT_FRAME_WIDTH),
            motion: MotionConfig {
                min_area: motion.min_area.unwrap_or(DEFAULT_MIN_AREA),
                history: motion.history.unwrap_or(DEFAULT_HISTORY),
                var_threshold: motion.var_threshold.unwrap_or(DEFAULT_VAR_THRESHOLD),
            },
            classifier: ClassifierSettings {
                model_path: classifier.model_path,
                labels_path: classifier.labels_path,
                font_path: classifier.font_path,
                min_confidence: classifier.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                interval_secs: classifier
                    .interval_secs
                    .unwrap_or(DEFAULT_DETECTION_INTERVAL_SECS),
            },
            alert: AlertSettings {
                cooldown_secs: alert.cooldown_secs.unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
                output_folder: alert
                    .output_folder
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FOLDER)),
                public_url: alert
                    .public_url
                    .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string()),
                delivery: alert.delivery.unwrap_or_default(),
                relay_url: alert
                    .relay_url
                    .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
                timeout_secs: alert.timeout_secs.unwrap_or(DEFAULT_DELIVERY_TIMEOUT_SECS),
            },
            telegram: telegram_from_file(file.telegram.unwrap_or_default()),
            speech: speech_from_file(file.speech.unwrap_or_default()),
            collect: CollectSettings {
                enabled: collect.enabled.unwrap_or(false),
                interval_secs: collect
                    .interval_secs
                    .unwrap_or(DEFAULT_COLLECT_INTERVAL_SECS),
                base_folder: collect
                    .base_folder
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_COLLECT_FOLDER)),
            },
            stream: StreamConfig {
                addr: stream
                    .addr
                    .unwrap_or_else(|| DEFAULT_STREAM_ADDR.to_string()),
                view: stream.view.unwrap_or_default(),
                poll_interval: Duration::from_millis(
                    stream.poll_ms.unwrap_or(DEFAULT_STREAM_POLL_MS),
                ),
                jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                max_clients: stream.max_clients.unwrap_or(DEFAULT_STREAM_MAX_CLIENTS),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_string("SENTRY_VIDEO_PATH") {
            self.video_path = path;
        }
        if let Some(width) = env_parse("SENTRY_FRAME_WIDTH", "a positive integer")? {
            self.frame_width = width;
        }
        if let Some(area) = env_parse("SENTRY_MIN_AREA", "a number of pixels")? {
            self.motion.min_area = area;
        }
        if let Some(path) = env_string("SENTRY_MODEL_PATH") {
            self.classifier.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_string("SENTRY_LABELS_PATH") {
            self.classifier.labels_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_string("SENTRY_FONT_PATH") {
            self.classifier.font_path = Some(PathBuf::from(path));
        }
        if let Some(confidence) = env_parse("SENTRY_MIN_CONFIDENCE", "a number in [0, 1]")? {
            self.classifier.min_confidence = confidence;
        }
        if let Some(secs) = env_parse("SENTRY_DETECTION_INTERVAL_SECS", "a number of seconds")? {
            self.classifier.interval_secs = secs;
        }
        if let Some(secs) = env_parse("SENTRY_ALERT_COOLDOWN_SECS", "a number of seconds")? {
            self.alert.cooldown_secs = secs;
        }
        if let Some(folder) = env_string("SENTRY_OUTPUT_FOLDER") {
            self.alert.output_folder = PathBuf::from(folder);
        }
        if let Some(url) = env_string("SENTRY_PUBLIC_URL") {
            self.alert.public_url = url;
        }
        if let Some(mode) = env_string("SENTRY_ALERT_DELIVERY") {
            self.alert.delivery = mode.parse()?;
        }
        if let Some(url) = env_string("SENTRY_RELAY_URL") {
            self.alert.relay_url = url;
        }
        apply_telegram_env(&mut self.telegram);
        apply_speech_env(&mut self.speech)?;
        if let Some(enabled) = env_bool("SENTRY_COLLECT_IMAGES")? {
            self.collect.enabled = enabled;
        }
        if let Some(addr) = env_string("SENTRY_STREAM_ADDR") {
            self.stream.addr = addr;
        }
        if let Some(view) = env_string("SENTRY_STREAM_VIEW") {
            self.stream.view = view.parse()?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.video_path.trim().is_empty() {
            return Err(anyhow!("video_path must not be empty"));
        }
        if self.frame_width == 0 {
            return Err(anyhow!("frame_width must be greater than zero"));
        }
        if !(self.motion.min_area.is_finite() && self.motion.min_area > 0.0) {
            return Err(anyhow!("motion.min_area must be a positive number"));
        }
        if self.motion.history == 0 {
            return Err(anyhow!("motion.history must be greater than zero"));
        }
        if !(self.motion.var_threshold.is_finite() && self.motion.var_threshold > 0.0) {
            return Err(anyhow!("motion.var_threshold must be a positive number"));
        }
        if !(0.0..=1.0).contains(&self.classifier.min_confidence) {
            return Err(anyhow!("classifier.min_confidence must be within [0, 1]"));
        }
        validate_secs("classifier.interval_secs", self.classifier.interval_secs)?;
        validate_secs("alert.cooldown_secs", self.alert.cooldown_secs)?;
        validate_secs("alert.timeout_secs", self.alert.timeout_secs)?;
        validate_secs("collect.interval_secs", self.collect.interval_secs)?;
        url::Url::parse(&self.alert.public_url)
            .with_context(|| format!("alert.public_url '{}' is not a URL", self.alert.public_url))?;

        match self.alert.delivery {
            DeliveryMode::Telegram => {
                self.telegram.require()?;
                url::Url::parse(&self.telegram.api_base).with_context(|| {
                    format!("telegram.api_base '{}' is not a URL", self.telegram.api_base)
                })?;
            }
            DeliveryMode::Relay => {
                url::Url::parse(&self.alert.relay_url).with_context(|| {
                    format!("alert.relay_url '{}' is not a URL", self.alert.relay_url)
                })?;
            }
        }

        self.stream
            .addr
            .parse::<SocketAddr>()
            .with_context(|| format!("stream.addr '{}' is not a socket address", self.stream.addr))?;
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("stream.jpeg_quality must be within [1, 100]"));
        }
        if self.stream.max_clients == 0 {
            return Err(anyhow!("stream.max_clients must be greater than zero"));
        }
        Ok(())
    }
}

/// Configuration of the `alert_relay` service. Reads the same file as the
/// daemon; only the relay, alert timeout, telegram and speech sections apply.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: String,
    pub timeout_secs: f64,
    pub telegram: TelegramSettings,
    pub speech: SpeechSettings,
}

impl RelayConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(env_string("SENTRY_CONFIG").map(PathBuf::from).as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = read_optional_file(path)?;
        let mut cfg = Self::from_file(file);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    fn from_file(file: ConfigFile) -> Self {
        Self {
            addr: file
                .relay
                .and_then(|relay| relay.addr)
                .unwrap_or_else(|| DEFAULT_RELAY_ADDR.to_string()),
            timeout_secs: file
                .alert
                .and_then(|alert| alert.timeout_secs)
                .unwrap_or(DEFAULT_DELIVERY_TIMEOUT_SECS),
            telegram: telegram_from_file(file.telegram.unwrap_or_default()),
            speech: speech_from_file(file.speech.unwrap_or_default()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_string("SENTRY_RELAY_ADDR") {
            self.addr = addr;
        }
        apply_telegram_env(&mut self.telegram);
        apply_speech_env(&mut self.speech)
    }

    fn validate(&self) -> Result<()> {
        self.addr
            .parse::<SocketAddr>()
            .with_context(|| format!("relay.addr '{}' is not a socket address", self.addr))?;
        validate_secs("alert.timeout_secs", self.timeout_secs)?;
        self.telegram.require()
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn telegram_from_file(file: TelegramFile) -> TelegramSettings {
    TelegramSettings {
        bot_token: file.bot_token,
        chat_id: file.chat_id,
        api_base: file
            .api_base
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
    }
}

fn speech_from_file(file: SpeechFile) -> SpeechSettings {
    SpeechSettings {
        enabled: file.enabled.unwrap_or(true),
        endpoint: file
            .endpoint
            .unwrap_or_else(|| DEFAULT_SPEECH_ENDPOINT.to_string()),
        language: file
            .language
            .unwrap_or_else(|| DEFAULT_SPEECH_LANGUAGE.to_string()),
    }
}

fn apply_telegram_env(telegram: &mut TelegramSettings) {
    if let Some(token) = env_string("TELEGRAM_BOT_TOKEN") {
        telegram.bot_token = Some(token);
    }
    if let Some(chat_id) = env_string("TELEGRAM_CHAT_ID") {
        telegram.chat_id = Some(chat_id);
    }
}

fn apply_speech_env(speech: &mut SpeechSettings) -> Result<()> {
    if let Some(enabled) = env_bool("SENTRY_SPEECH_ENABLED")? {
        speech.enabled = enabled;
    }
    if let Some(language) = env_string("SENTRY_SPEECH_LANGUAGE") {
        speech.language = language;
    }
    Ok(())
}

fn read_optional_file(path: Option<&Path>) -> Result<ConfigFile> {
    match path {
        Some(path) => read_config_file(path),
        None => Ok(ConfigFile::default()),
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {} (got '{}')", key, expected, value)),
        None => Ok(None),
    }
}

fn env_bool(key: &str) -> Result<Option<bool>> {
    match env_string(key) {
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(anyhow!("{} must be true or false (got '{}')", key, value)),
        },
        None => Ok(None),
    }
}

fn validate_secs(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 && Duration::try_from_secs_f64(value).is_ok() {
        Ok(())
    } else {
        Err(anyhow!(
            "{} must be a non-negative number of seconds (got {})",
            name,
            value
        ))
    }
}
