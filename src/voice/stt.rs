//! Speech-to-text (STT) processing

use std::path::Path;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Turns a recorded WAV file into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the WAV file at `wav`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or transcription fails
    async fn transcribe(&self, wav: &Path) -> Result<String>;
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech with `OpenAI` Whisper
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl WhisperTranscriber {
    /// Create a new Whisper transcriber
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for Whisper".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, wav: &Path) -> Result<String> {
        let audio = tokio::fs::read(wav).await?;
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        let result = WhisperTranscriber::new(SecretString::from(""), "https://api.openai.com/v1", "whisper-1");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let stt =
            WhisperTranscriber::new(SecretString::from("sk-test"), "http://localhost:9/v1/", "whisper-1").unwrap();
        assert_eq!(stt.base_url, "http://localhost:9/v1");
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let stt = WhisperTranscriber::new(SecretString::from("sk-test"), "http://127.0.0.1:9", "whisper-1").unwrap();
        let result = stt.transcribe(Path::new("/nonexistent/utterance.wav")).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
