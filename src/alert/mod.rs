//! Alert tasks and their asynchronous delivery.
//!
//! The detection loop builds an `AlertTask` and pushes it onto an
//! `AlertQueue`; it never waits for delivery. A single `AlertDispatcher`
//! worker drains the queue in FIFO order and hands every task to an
//! `AlertDelivery` implementation:
//! - `MessengerDelivery`: photo, text and voice steps against a `Messenger`
//!   (Telegram) and a `SpeechSynthesizer`.
//! - `RelayDelivery`: forwards the task as JSON to an `alert_relay` service.

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::path::PathBuf;

mod dispatcher;
mod messenger;
mod relay;
mod speech;
mod telegram;

pub use dispatcher::{AlertDispatcher, DispatcherHandle, DispatcherStats};
pub use messenger::{Messenger, MessengerDelivery};
pub use relay::{RelayDelivery, RelayTask};
pub use speech::{HttpSpeech, SpeechSynthesizer, MAX_SPEECH_CHARS};
pub use telegram::{
    TelegramConfig, TelegramMessenger, DEFAULT_API_BASE as DEFAULT_TELEGRAM_API_BASE,
};

/// One notification: photo artifact, message and optional voice text.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertTask {
    pub photo_path: PathBuf,
    pub message: String,
    pub voice_text: Option<String>,
    /// Live stream link embedded in the text step.
    pub stream_url: Option<String>,
    pub created_at: DateTime<Local>,
}

impl AlertTask {
    /// Task for a motion episode with the given classifier labels.
    pub fn for_motion(
        photo_path: PathBuf,
        labels: &[String],
        at: DateTime<Local>,
        stream_url: Option<String>,
    ) -> Self {
        Self {
            photo_path,
            message: message_text(labels, at),
            voice_text: Some(voice_text(labels)),
            stream_url,
            created_at: at,
        }
    }

    /// Body of the text step as Telegram HTML: the escaped message plus
    /// the stream link, if any.
    pub fn text_with_link(&self) -> String {
        let message = html_escape(&self.message);
        match &self.stream_url {
            Some(url) => format!(
                "{}\n\nWatch the live stream: <a href='{}'>open</a>",
                message,
                html_escape(url)
            ),
            None => message,
        }
    }
}

/// `Motion detected! Objects: a, b. (HH:MM:SS)`
pub fn message_text(labels: &[String], at: DateTime<Local>) -> String {
    let time = at.format("%H:%M:%S");
    if labels.is_empty() {
        format!("Motion detected! Objects not classified. ({})", time)
    } else {
        format!("Motion detected! Objects: {}. ({})", labels.join(", "), time)
    }
}

/// `Motion detected. Objects: a, b.`
pub fn voice_text(labels: &[String]) -> String {
    if labels.is_empty() {
        "Motion detected. Objects not classified.".to_string()
    } else {
        format!("Motion detected. Objects: {}.", labels.join(", "))
    }
}

pub(crate) fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&#39;")
        .replace('"', "&quot;")
}

// ----------------------------------------------------------------------------
// Queue
// ----------------------------------------------------------------------------

/// Producer side of the alert queue. Unbounded: `enqueue` never blocks.
#[derive(Clone, Debug)]
pub struct AlertQueue {
    sender: Sender<AlertTask>,
}

impl AlertQueue {
    /// Queue plus the receiving end a dispatcher worker consumes.
    pub fn channel() -> (Self, Receiver<AlertTask>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }

    /// Returns false if the worker is gone; the task is dropped and logged.
    pub fn enqueue(&self, task: AlertTask) -> bool {
        match self.sender.send(task) {
            Ok(()) => true,
            Err(err) => {
                log::error!(
                    "dispatcher: worker stopped, dropping alert for {}",
                    err.into_inner().photo_path.display()
                );
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.sender.len()
    }
}

// ----------------------------------------------------------------------------
// Delivery
// ----------------------------------------------------------------------------

/// Result of one delivery step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Sent,
    Skipped,
    Failed(String),
}

impl StepOutcome {
    pub fn from_result(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => Self::Sent,
            Err(err) => Self::Failed(format!("{:#}", err)),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => f.write_str("sent"),
            Self::Skipped => f.write_str("skipped"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Per-step outcome of one task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReport {
    pub photo: StepOutcome,
    pub text: StepOutcome,
    pub voice: StepOutcome,
}

impl DeliveryReport {
    pub fn failed_steps(&self) -> usize {
        [&self.photo, &self.text, &self.voice]
            .iter()
            .filter(|step| step.is_failed())
            .count()
    }
}

/// Transport that turns an `AlertTask` into outbound messages.
///
/// Implementations must not panic on transport errors; every failure is
/// reported in the returned `DeliveryReport`.
pub trait AlertDelivery: Send {
    fn name(&self) -> &'static str;
    fn deliver(&mut self, task: &AlertTask) -> DeliveryReport;
}

impl<D: AlertDelivery + ?Sized> AlertDelivery for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn deliver(&mut self, task: &AlertTask) -> DeliveryReport {
        (**self).deliver(task)
    }
}
