//! Text-to-speech post-processing.
//!
//! After a turn the final answer can be spoken by an external TTS service.
//! The text is cleaned first: reasoning blocks are dropped, `*` emphasis
//! becomes a pause, and anything outside ASCII is removed.

use lyra_config::TtsConfig;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::markers::{THINK_CLOSE, THINK_OPEN};

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("TTS request failed: {0}")]
    Request(String),

    #[error("TTS service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("TTS response could not be read: {0}")]
    Decode(String),
}

/// Prepare model output for speaking.
pub fn cleanup_speech(text: &str) -> String {
    let spoken = strip_reasoning(text);
    spoken.replace('*', ", ").chars().filter(char::is_ascii).collect()
}

/// Drop `<think>...</think>` blocks. Text before a stray closing tag is
/// reasoning too; an unclosed opening tag hides the rest.
fn strip_reasoning(text: &str) -> String {
    let mut rest = match (text.find(THINK_OPEN), text.find(THINK_CLOSE)) {
        (open, Some(close)) if open.is_none_or(|o| close < o) => &text[close + THINK_CLOSE.len()..],
        _ => text,
    };

    let mut out = String::with_capacity(rest.len());
    while let Some(open) = rest.find(THINK_OPEN) {
        out.push_str(&rest[..open]);
        let after = &rest[open + THINK_OPEN.len()..];
        match after.find(THINK_CLOSE) {
            Some(close) => rest = &after[close + THINK_CLOSE.len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

#[derive(Serialize)]
struct SpeakRequest<'a> {
    voice: String,
    speak: &'a str,
    emotion: &'a str,
}

/// Client for the TTS service.
#[derive(Clone)]
pub struct SpeechClient {
    client: reqwest::Client,
    base_url: String,
    emotion: String,
}

impl SpeechClient {
    pub fn new(base_url: &str, emotion: &str, timeout: Duration) -> Result<Self, SpeechError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SpeechError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            emotion: emotion.to_string(),
        })
    }

    pub fn from_config(config: &TtsConfig) -> Result<Self, SpeechError> {
        Self::new(&config.url, &config.emotion, Duration::from_secs(config.timeout_secs))
    }

    /// Speak `text` with `voice` after cleaning it.
    pub async fn speak(&self, voice: &str, text: &str) -> Result<(), SpeechError> {
        let cleaned = cleanup_speech(text);
        debug!(voice, chars = cleaned.len(), "Cleaned response for audio");

        let body = SpeakRequest {
            voice: format!("voices/{voice}"),
            speak: &cleaned,
            emotion: &self.emotion,
        };
        let response = self
            .client
            .post(format!("{}/", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeechError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Status {
                status: status.as_u16(),
                body,
            });
        }
        info!(voice, "Spoke the answer");
        Ok(())
    }

    /// The voices the service offers, as it reports them.
    pub async fn voices(&self) -> Result<serde_json::Value, SpeechError> {
        let response = self
            .client
            .get(format!("{}/voices", self.base_url))
            .send()
            .await
            .map_err(|e| SpeechError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| SpeechError::Decode(e.to_string()))
    }
}
