//! TOML configuration file loading
//!
//! Supports `~/.config/office-npcs/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Relay server configuration
    #[serde(default)]
    pub relay: RelayFileConfig,

    /// Relay client configuration
    #[serde(default)]
    pub client: ClientFileConfig,

    /// Microphone capture configuration
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech-to-text and text-to-speech configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Dialogue and office configuration
    #[serde(default)]
    pub dialogue: DialogueFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct RelayFileConfig {
    /// Bind address (e.g. "127.0.0.1")
    pub host: Option<String>,

    /// Listen port
    pub port: Option<u16>,

    /// Sample rate of incoming audio chunks
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientFileConfig {
    /// Relay websocket URL (e.g. "ws://127.0.0.1:8765")
    pub url: Option<String>,

    /// Connection timeout in seconds
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_size: Option<usize>,
    pub silence_threshold: Option<f32>,
    pub queue_capacity: Option<usize>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "gpt-4-0125-preview")
    pub model: Option<String>,

    /// API base URL
    pub base_url: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DialogueFileConfig {
    /// Language replies are expected in, as an ISO 639-3 code
    pub expected_language: Option<String>,

    /// Distance at which an NPC starts a conversation
    pub interaction_distance: Option<f32>,

    /// Minimum seconds between proximity checks that start a conversation
    pub interaction_cooldown_secs: Option<f64>,

    /// Game loop ticks per second
    pub frame_rate: Option<u32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    config_file_path().map_or_else(ConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or unparseable files yield `ConfigFile::default()`.
pub fn load_config_file_from(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/office-npcs/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("office-npcs").join("config.toml"))
}
