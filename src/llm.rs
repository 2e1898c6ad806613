//! Chat completion client
//!
//! Both the relay and the text dialogue path complete over a full
//! role-tagged history through the [`ChatModel`] trait.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::conversation::Turn;
use crate::{Error, Result};

/// Sampling parameters for one completion request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

impl SamplingParams {
    /// Parameters used for voice turns on the relay
    pub const RELAY: Self = Self {
        temperature: 0.85,
        max_tokens: 150,
        top_p: None,
        frequency_penalty: None,
        presence_penalty: None,
    };

    /// Parameters used for typed dialogue
    pub const DIALOGUE: Self = Self {
        temperature: 0.85,
        max_tokens: 150,
        top_p: Some(0.95),
        frequency_penalty: Some(0.2),
        presence_penalty: Some(0.1),
    };
}

/// Produces the next assistant turn for a conversation
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete over `messages`, system prompt first
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or yields no content
    async fn complete(&self, messages: &[Turn], params: &SamplingParams) -> Result<String>;
}

/// `OpenAI` chat completions client
pub struct OpenAiChat {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl OpenAiChat {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for chat".to_string()));
        }

        Ok(Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Model identifier sent with each request
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[Turn], params: &SamplingParams) -> Result<String> {
        let request = ChatCompletionRequest::new(&self.model, messages, params);

        tracing::debug!(model = %self.model, messages = messages.len(), "requesting completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Llm(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("OpenAI API error: {status} - {body}")));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Llm(format!("Failed to parse OpenAI response: {e}")))?;

        let reply = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Llm("completion returned no content".to_string()))?;

        tracing::debug!(chars = reply.len(), "completion received");
        Ok(reply)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
}

impl<'a> ChatCompletionRequest<'a> {
    const fn new(model: &'a str, messages: &'a [Turn], params: &SamplingParams) -> Self {
        Self {
            model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
