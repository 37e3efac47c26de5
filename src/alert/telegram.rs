//! Telegram Bot API messenger.
//!
//! Uses `sendPhoto`, `sendMessage` and `sendAudio` against one chat. File
//! uploads go out as `multipart/form-data` forms.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::messenger::Messenger;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub struct TelegramMessenger {
    config: TelegramConfig,
    client: Client,
}

/// Envelope every Bot API method answers with.
#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramMessenger {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(anyhow!("telegram bot token is empty"));
        }
        if config.chat_id.trim().is_empty() {
            return Err(anyhow!("telegram chat id is empty"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .context("failed to build telegram http client")?;
        Ok(Self { config, client })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    fn post(&self, method: &str) -> RequestBuilder {
        self.client.post(self.method_url(method))
    }
}

impl Messenger for TelegramMessenger {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn send_photo(&mut self, photo: &Path, caption: &str) -> Result<()> {
        let bytes = std::fs::read(photo)
            .with_context(|| format!("failed to read photo {}", photo.display()))?;
        let file_name = photo
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo.jpg".to_string());

        let form = Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("caption", caption.to_string())
            .part(
                "photo",
                Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("image/jpeg")?,
            );
        check_reply("sendPhoto", self.post("sendPhoto").multipart(form).send())
    }

    fn send_text(&mut self, text: &str) -> Result<()> {
        let payload = serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        check_reply("sendMessage", self.post("sendMessage").json(&payload).send())
    }

    fn send_audio(&mut self, audio: &[u8], title: &str) -> Result<()> {
        let form = Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("title", title.to_string())
            .part(
                "audio",
                Part::bytes(audio.to_vec())
                    .file_name("alert.mp3")
                    .mime_str("audio/mpeg")?,
            );
        check_reply("sendAudio", self.post("sendAudio").multipart(form).send())
    }
}

fn check_reply(
    method: &str,
    response: reqwest::Result<reqwest::blocking::Response>,
) -> Result<()> {
    // Request errors carry the full URL, which includes the bot token.
    let response = response
        .map_err(|err| anyhow!("telegram {} request failed: {}", method, err.without_url()))?;
    let status = response.status();
    let reply = response.json::<ApiReply>().ok();

    match reply {
        Some(reply) if reply.ok && status.is_success() => Ok(()),
        Some(reply) => Err(anyhow!(
            "telegram {} rejected with HTTP {}: {}",
            method,
            status.as_u16(),
            reply.description.unwrap_or_default()
        )),
        None if status.is_success() => Err(anyhow!("telegram {}: unreadable reply", method)),
        None => Err(anyhow!(
            "telegram {} failed with HTTP {}",
            method,
            status.as_u16()
        )),
    }
}
