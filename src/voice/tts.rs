//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Turns reply text into encoded speech
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` in the given voice
    ///
    /// # Returns
    ///
    /// Encoded audio bytes (MP3 for `OpenAI`)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>>;
}

/// Synthesizes speech with the `OpenAI` speech endpoint
pub struct OpenAiSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    speed: f64,
}

impl OpenAiSpeech {
    /// Create a new `OpenAI` TTS instance
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        api_key: SecretString,
        base_url: impl Into<String>,
        model: impl Into<String>,
        speed: f64,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            speed,
        })
    }
}

#[derive(serde::Serialize)]
struct TtsRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f64,
}

#[async_trait]
impl Synthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            speed: self.speed,
        };

        tracing::debug!(voice, chars = text.len(), "requesting speech synthesis");

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(audio_bytes = audio.len(), "speech synthesized");
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        let result = OpenAiSpeech::new(SecretString::from(""), "https://api.openai.com/v1", "tts-1", 1.0);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn request_carries_voice() {
        let request = TtsRequest {
            model: "tts-1",
            input: "Welcome aboard.",
            voice: "echo",
            speed: 1.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["voice"], "echo");
        assert_eq!(json["model"], "tts-1");
    }
}
