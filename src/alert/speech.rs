use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;
use url::Url;

/// Longest text a single speech request accepts.
pub const MAX_SPEECH_CHARS: usize = 200;
const MAX_AUDIO_BYTES: u64 = 5 * 1024 * 1024;

/// Text to audio blob.
pub trait SpeechSynthesizer: Send {
    fn synthesize(&mut self, text: &str) -> Result<Vec<u8>>;
}

/// MP3 speech from a gTTS-compatible HTTP endpoint.
pub struct HttpSpeech {
    agent: ureq::Agent,
    endpoint: Url,
    language: String,
}

impl HttpSpeech {
    pub fn new(endpoint: &str, language: &str, timeout: Duration) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("invalid speech endpoint '{}'", endpoint))?;
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            endpoint,
            language: language.to_string(),
        })
    }

    pub fn request_url(&self, text: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("ie", "UTF-8")
            .append_pair("client", "tw-ob")
            .append_pair("tl", &self.language)
            .append_pair("q", &clip_text(text, MAX_SPEECH_CHARS));
        url
    }
}

impl SpeechSynthesizer for HttpSpeech {
    fn synthesize(&mut self, text: &str) -> Result<Vec<u8>> {
        let url = self.request_url(text);
        let response = self
            .agent
            .get(url.as_str())
            .set("User-Agent", "Mozilla/5.0")
            .call()
            .with_context(|| format!("speech request to {}", self.endpoint))?;

        let mut audio = Vec::new();
        response
            .into_reader()
            .take(MAX_AUDIO_BYTES)
            .read_to_end(&mut audio)
            .context("read speech audio")?;
        if audio.is_empty() {
            return Err(anyhow!("speech endpoint returned an empty body"));
        }
        Ok(audio)
    }
}

/// Trim to at most `max` characters, cutting on a word boundary when there
/// is one.
pub(crate) fn clip_text(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max).collect();
    match clipped.rfind(char::is_whitespace) {
        Some(cut) if cut > 0 => clipped[..cut].trim_end().to_string(),
        _ => clipped,
    }
}
