use anyhow::{anyhow, Context, Result};
use std::path::Path;

use super::speech::SpeechSynthesizer;
use super::{html_escape, AlertDelivery, AlertTask, DeliveryReport, StepOutcome};

/// Outbound chat transport bound to one destination.
pub trait Messenger: Send {
    fn name(&self) -> &'static str;
    fn send_photo(&mut self, photo: &Path, caption: &str) -> Result<()>;
    /// `text` is Telegram HTML; callers escape untrusted parts.
    fn send_text(&mut self, text: &str) -> Result<()>;
    fn send_audio(&mut self, audio: &[u8], title: &str) -> Result<()>;
}

/// Three independent steps per task: photo with caption, text with the
/// stream link, then synthesized voice. A failing step never prevents the
/// next one from being attempted.
pub struct MessengerDelivery<M, S> {
    messenger: M,
    speech: Option<S>,
}

impl<M: Messenger, S: SpeechSynthesizer> MessengerDelivery<M, S> {
    /// `speech = None` disables the voice step.
    pub fn new(messenger: M, speech: Option<S>) -> Self {
        Self { messenger, speech }
    }

    fn photo_step(&mut self, task: &AlertTask) -> StepOutcome {
        if !task.photo_path.is_file() {
            let fallback = format!(
                "Motion detected, but the photo was not found: {}",
                html_escape(&task.message)
            );
            if let Err(err) = self.messenger.send_text(&fallback) {
                log::warn!("dispatcher: photo fallback text failed: {:#}", err);
            }
            return StepOutcome::Failed(format!(
                "photo file {} not found",
                task.photo_path.display()
            ));
        }
        StepOutcome::from_result(
            self.messenger
                .send_photo(&task.photo_path, &task.message)
                .with_context(|| format!("send photo {}", task.photo_path.display())),
        )
    }

    fn text_step(&mut self, task: &AlertTask) -> StepOutcome {
        StepOutcome::from_result(
            self.messenger
                .send_text(&task.text_with_link())
                .context("send alert text"),
        )
    }

    fn voice_step(&mut self, task: &AlertTask) -> StepOutcome {
        let Some(voice_text) = task.voice_text.as_deref() else {
            return StepOutcome::Skipped;
        };
        let Some(speech) = self.speech.as_mut() else {
            return StepOutcome::Skipped;
        };
        let result = speech
            .synthesize(voice_text)
            .context("synthesize voice message")
            .and_then(|audio| {
                if audio.is_empty() {
                    return Err(anyhow!("speech synthesizer returned no audio"));
                }
                self.messenger
                    .send_audio(&audio, "Motion alert")
                    .context("send voice message")
            });
        StepOutcome::from_result(result)
    }
}

impl<M: Messenger, S: SpeechSynthesizer> AlertDelivery for MessengerDelivery<M, S> {
    fn name(&self) -> &'static str {
        self.messenger.name()
    }

    fn deliver(&mut self, task: &AlertTask) -> DeliveryReport {
        let photo = self.photo_step(task);
        let text = self.text_step(task);
        let voice = self.voice_step(task);
        DeliveryReport { photo, text, voice }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Outbox {
        sent: Vec<String>,
        fail_text: bool,
    }

    impl Messenger for Outbox {
        fn name(&self) -> &'static str {
            "outbox"
        }

        fn send_photo(&mut self, photo: &Path, caption: &str) -> Result<()> {
            self.sent
                .push(format!("photo:{}:{}", photo.display(), caption));
            Ok(())
        }

        fn send_text(&mut self, text: &str) -> Result<()> {
            if self.fail_text {
                return Err(anyhow!("chat unreachable"));
            }
            self.sent.push(format!("text:{}", text));
            Ok(())
        }

        fn send_audio(&mut self, audio: &[u8], _title: &str) -> Result<()> {
            self.sent.push(format!("audio:{}", audio.len()));
            Ok(())
        }
    }

    struct FixedSpeech(Vec<u8>);

    impl SpeechSynthesizer for FixedSpeech {
        fn synthesize(&mut self, _text: &str) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    fn task(photo: PathBuf) -> AlertTask {
        AlertTask {
            photo_path: photo,
            message: "Motion detected!".into(),
            voice_text: Some("Motion detected.".into()),
            stream_url: None,
            created_at: Local::now(),
        }
    }

    #[test]
    fn all_steps_sent_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("alert.jpg");
        std::fs::write(&photo, b"jpeg").unwrap();

        let mut delivery =
            MessengerDelivery::new(Outbox::default(), Some(FixedSpeech(vec![1, 2, 3])));
        let report = delivery.deliver(&task(photo.clone()));

        assert_eq!(report.photo, StepOutcome::Sent);
        assert_eq!(report.text, StepOutcome::Sent);
        assert_eq!(report.voice, StepOutcome::Sent);
        assert_eq!(
            delivery.messenger.sent,
            vec![
                format!("photo:{}:Motion detected!", photo.display()),
                "text:Motion detected!".to_string(),
                "audio:3".to_string(),
            ]
        );
    }

    #[test]
    fn missing_photo_sends_fallback_and_still_runs_text_step() {
        let mut delivery = MessengerDelivery::new(Outbox::default(), None::<FixedSpeech>);
        let report = delivery.deliver(&task(PathBuf::from("/no/such/photo.jpg")));

        assert!(report.photo.is_failed());
        assert_eq!(report.text, StepOutcome::Sent);
        assert_eq!(report.voice, StepOutcome::Skipped);
        assert_eq!(delivery.messenger.sent.len(), 2);
        assert!(delivery.messenger.sent[0].contains("photo was not found"));
    }

    #[test]
    fn text_failure_does_not_skip_voice() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("alert.jpg");
        std::fs::write(&photo, b"jpeg").unwrap();

        let outbox = Outbox {
            fail_text: true,
            ..Outbox::default()
        };
        let mut delivery = MessengerDelivery::new(outbox, Some(FixedSpeech(vec![9])));
        let report = delivery.deliver(&task(photo));

        assert_eq!(report.photo, StepOutcome::Sent);
        assert!(report.text.is_failed());
        assert_eq!(report.voice, StepOutcome::Sent);
    }

    #[test]
    fn empty_audio_is_a_voice_failure() {
        let mut delivery =
            MessengerDelivery::new(Outbox::default(), Some(FixedSpeech(Vec::new())));
        let report = delivery.deliver(&task(PathBuf::from("/no/photo.jpg")));
        assert!(report.voice.is_failed());
    }
}
