use anyhow::{anyhow, Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use super::{AlertDelivery, AlertTask, DeliveryReport, StepOutcome};

/// Wire form of an alert task, as accepted by `POST /send_task`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayTask {
    pub photo_path: String,
    pub message_text: String,
    #[serde(default)]
    pub voice_text: Option<String>,
    #[serde(default)]
    pub web_link: Option<String>,
}

impl RelayTask {
    pub fn from_task(task: &AlertTask) -> Self {
        Self {
            photo_path: task.photo_path.to_string_lossy().into_owned(),
            message_text: task.message.clone(),
            voice_text: task.voice_text.clone(),
            web_link: task.stream_url.clone(),
        }
    }

    /// Rebuild a task on the relay side. Empty voice text means no voice step.
    pub fn into_task(self) -> Result<AlertTask> {
        if self.photo_path.trim().is_empty() {
            return Err(anyhow!("photo_path must not be empty"));
        }
        if self.message_text.trim().is_empty() {
            return Err(anyhow!("message_text must not be empty"));
        }
        Ok(AlertTask {
            photo_path: PathBuf::from(self.photo_path),
            message: self.message_text,
            voice_text: self.voice_text.filter(|text| !text.trim().is_empty()),
            stream_url: self.web_link.filter(|link| !link.trim().is_empty()),
            created_at: Local::now(),
        })
    }
}

/// Forwards each task to a remote `alert_relay` service. The relay performs
/// the photo, text and voice steps, so all of them share one outcome here.
pub struct RelayDelivery {
    agent: ureq::Agent,
    url: Url,
}

impl RelayDelivery {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid relay url '{}'", url))?;
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url,
        })
    }

    fn forward(&self, task: &AlertTask) -> Result<()> {
        match self
            .agent
            .post(self.url.as_str())
            .send_json(RelayTask::from_task(task))
        {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => {
                Err(anyhow!("relay {} answered HTTP {}", self.url, code))
            }
            Err(ureq::Error::Transport(err)) => {
                Err(anyhow!("relay {} unreachable: {}", self.url, err))
            }
        }
    }
}

impl AlertDelivery for RelayDelivery {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn deliver(&mut self, task: &AlertTask) -> DeliveryReport {
        let outcome = StepOutcome::from_result(self.forward(task));
        let voice = if task.voice_text.is_some() {
            outcome.clone()
        } else {
            StepOutcome::Skipped
        };
        DeliveryReport {
            photo: outcome.clone(),
            text: outcome,
            voice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_task_json_uses_wire_names() {
        let task = AlertTask {
            photo_path: PathBuf::from("output/motion.jpg"),
            message: "Motion detected!".into(),
            voice_text: None,
            stream_url: Some("http://localhost:5000/".into()),
            created_at: Local::now(),
        };
        let json = serde_json::to_value(RelayTask::from_task(&task)).unwrap();
        assert_eq!(json["photo_path"], "output/motion.jpg");
        assert_eq!(json["message_text"], "Motion detected!");
        assert!(json["voice_text"].is_null());
        assert_eq!(json["web_link"], "http://localhost:5000/");
    }

    #[test]
    fn minimal_payload_parses_and_blank_voice_is_dropped() {
        let wire: RelayTask = serde_json::from_str(
            r#"{"photo_path":"/tmp/a.jpg","message_text":"hi","voice_text":"  "}"#,
        )
        .unwrap();
        let task = wire.into_task().unwrap();
        assert_eq!(task.photo_path, PathBuf::from("/tmp/a.jpg"));
        assert_eq!(task.voice_text, None);
        assert_eq!(task.stream_url, None);
    }

    #[test]
    fn empty_message_is_rejected() {
        let wire = RelayTask {
            photo_path: "/tmp/a.jpg".into(),
            message_text: "".into(),
            voice_text: None,
            web_link: None,
        };
        assert!(wire.into_task().is_err());
    }

    #[test]
    fn unreachable_relay_fails_every_step_it_owns() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{}/send_task", port);
        let mut delivery = RelayDelivery::new(&url, Duration::from_millis(500)).unwrap();
        let task = AlertTask {
            photo_path: PathBuf::from("a.jpg"),
            message: "m".into(),
            voice_text: None,
            stream_url: None,
            created_at: Local::now(),
        };
        let report = delivery.deliver(&task);
        assert!(report.photo.is_failed());
        assert!(report.text.is_failed());
        assert_eq!(report.voice, StepOutcome::Skipped);
    }
}
