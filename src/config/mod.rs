//! Configuration management for the office NPC game and relay
//!
//! Values resolve env > TOML file > defaults.

pub mod file;

use std::time::Duration;

use secrecy::SecretString;

use crate::voice::SAMPLE_RATE;
use crate::voice::segmenter::{DEFAULT_FRAME_SIZE, DEFAULT_SILENCE_THRESHOLD};
use crate::{Error, Result};

pub use file::{ConfigFile, config_file_path, load_config_file, load_config_file_from};

/// Default relay listen port
pub const DEFAULT_RELAY_PORT: u16 = 8765;

/// Default `OpenAI` API base URL
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Full application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay server configuration
    pub relay: RelayServerConfig,

    /// Relay client configuration
    pub client: RelayClientConfig,

    /// Microphone capture configuration
    pub capture: CaptureConfig,

    /// Chat completion configuration
    pub llm: LlmConfig,

    /// Speech service configuration
    pub voice: VoiceConfig,

    /// Dialogue and office configuration
    pub dialogue: DialogueConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Relay server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayServerConfig {
    /// Bind address
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Sample rate assumed for incoming audio chunks
    pub sample_rate: u32,
}

impl RelayServerConfig {
    /// `host:port` for binding a listener
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_RELAY_PORT,
            sample_rate: SAMPLE_RATE,
        }
    }
}

/// Relay client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayClientConfig {
    /// Websocket URL of the relay
    pub url: String,

    /// Maximum time to wait for the websocket handshake
    pub connect_timeout: Duration,
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self {
            url: format!("ws://127.0.0.1:{DEFAULT_RELAY_PORT}"),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Microphone capture configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Samples per gating frame
    pub frame_size: usize,

    /// Peak amplitude above which a frame counts as speech
    pub silence_threshold: f32,

    /// Utterances buffered between capture and the network task
    pub queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            queue_capacity: 8,
        }
    }
}

/// Chat completion configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    /// API base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: "gpt-4-0125-preview".to_string(),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_speed: 1.0,
        }
    }
}

/// Dialogue and office configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueConfig {
    /// ISO 639-3 code replies are expected in
    pub expected_language: String,

    /// Distance at which an NPC starts a conversation
    pub interaction_distance: f32,

    /// Minimum time between conversation-starting proximity checks
    pub interaction_cooldown: Duration,

    /// Game loop ticks per second
    pub frame_rate: u32,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            expected_language: "eng".to_string(),
            interaction_distance: 2.0,
            interaction_cooldown: Duration::from_millis(500),
            frame_rate: 60,
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (for Whisper, chat, and TTS)
    pub openai: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        Self::from_sources(load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an env lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn from_sources<F>(fc: ConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let relay_defaults = RelayServerConfig::default();
        let relay = RelayServerConfig {
            host: env("OFFICE_RELAY_HOST")
                .or(fc.relay.host)
                .unwrap_or(relay_defaults.host),
            port: match env("OFFICE_RELAY_PORT") {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| Error::Config(format!("OFFICE_RELAY_PORT is not a port: {raw}")))?,
                None => fc.relay.port.unwrap_or(relay_defaults.port),
            },
            sample_rate: fc.relay.sample_rate.unwrap_or(relay_defaults.sample_rate),
        };

        let client_defaults = RelayClientConfig::default();
        let client = RelayClientConfig {
            url: env("OFFICE_RELAY_URL")
                .or(fc.client.url)
                .unwrap_or_else(|| format!("ws://{}:{}", connect_host(&relay.host), relay.port)),
            connect_timeout: fc
                .client
                .connect_timeout_secs
                .map_or(client_defaults.connect_timeout, Duration::from_secs),
        };

        let capture_defaults = CaptureConfig::default();
        let capture = CaptureConfig {
            sample_rate: fc.capture.sample_rate.unwrap_or(capture_defaults.sample_rate),
            frame_size: fc.capture.frame_size.unwrap_or(capture_defaults.frame_size),
            silence_threshold: fc
                .capture
                .silence_threshold
                .unwrap_or(capture_defaults.silence_threshold),
            queue_capacity: fc
                .capture
                .queue_capacity
                .unwrap_or(capture_defaults.queue_capacity),
        };

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            base_url: env("OFFICE_OPENAI_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or(llm_defaults.base_url),
            model: env("OFFICE_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or(llm_defaults.model),
        };

        let voice_defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            stt_model: env("OFFICE_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or(voice_defaults.stt_model),
            tts_model: env("OFFICE_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or(voice_defaults.tts_model),
            tts_speed: fc.voice.tts_speed.unwrap_or(voice_defaults.tts_speed),
        };

        let dialogue_defaults = DialogueConfig::default();
        let dialogue = DialogueConfig {
            expected_language: fc
                .dialogue
                .expected_language
                .unwrap_or(dialogue_defaults.expected_language),
            interaction_distance: fc
                .dialogue
                .interaction_distance
                .unwrap_or(dialogue_defaults.interaction_distance),
            interaction_cooldown: match fc.dialogue.interaction_cooldown_secs {
                Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                    Error::Config(format!("interaction_cooldown_secs is not a duration: {secs}"))
                })?,
                None => dialogue_defaults.interaction_cooldown,
            },
            frame_rate: fc.dialogue.frame_rate.unwrap_or(dialogue_defaults.frame_rate),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
        };

        let config = Self {
            relay,
            client,
            capture,
            llm,
            voice,
            dialogue,
            api_keys,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns a config error naming the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.relay.sample_rate == 0 || self.capture.sample_rate == 0 {
            return Err(Error::Config("sample rate must be positive".to_string()));
        }
        if self.capture.frame_size == 0 {
            return Err(Error::Config("frame_size must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.capture.silence_threshold) {
            return Err(Error::Config(format!(
                "silence_threshold must be in [0, 1): {}",
                self.capture.silence_threshold
            )));
        }
        if self.capture.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be positive".to_string()));
        }
        if !(self.client.url.starts_with("ws://") || self.client.url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "relay url must use ws:// or wss://: {}",
                self.client.url
            )));
        }
        if !(0.25..=4.0).contains(&self.voice.tts_speed) {
            return Err(Error::Config(format!(
                "tts_speed must be between 0.25 and 4.0: {}",
                self.voice.tts_speed
            )));
        }
        if self.dialogue.interaction_distance <= 0.0 {
            return Err(Error::Config("interaction_distance must be positive".to_string()));
        }
        if self.dialogue.frame_rate == 0 {
            return Err(Error::Config("frame_rate must be positive".to_string()));
        }
        Ok(())
    }

    /// The `OpenAI` key, required by every speech and chat service
    ///
    /// # Errors
    ///
    /// Returns error if no key is configured
    pub fn require_openai_key(&self) -> Result<SecretString> {
        self.api_keys
            .openai
            .clone()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))
    }
}

/// Host a local client should dial for a server bound to `host`
fn connect_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
        other => other,
    }
}
