//! Relay wire protocol
//!
//! JSON envelopes tagged by `type`, exchanged as websocket text frames.
//! Audio travels hex-encoded: little-endian `f32` mono samples upstream,
//! encoded speech bytes (MP3) downstream.

use serde::{Deserialize, Serialize};

use crate::npc::NpcRole;
use crate::{Error, Result};

/// Message sent from the game client to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A run of captured samples
    AudioChunk {
        /// Hex-encoded little-endian `f32` samples
        chunk: String,
        /// NPC the player is addressing, kept as the raw tag so an unknown
        /// role leaves the session role as is instead of dropping audio
        #[serde(default, skip_serializing_if = "Option::is_none")]
        npc_role: Option<String>,
    },
    /// The current utterance is complete
    EndOfAudio,
    /// Discard whatever has been accumulated for the current utterance
    Interrupt,
}

impl ClientMessage {
    /// Build an `audio_chunk` carrying the given samples
    #[must_use]
    pub fn audio_chunk(samples: &[f32], npc_role: Option<NpcRole>) -> Self {
        Self::AudioChunk {
            chunk: encode_samples(samples),
            npc_role: npc_role.map(|r| r.as_str().to_string()),
        }
    }

    /// Parse a text frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is not a known envelope
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("invalid client message: {e}")))
    }
}

/// Message sent from the relay back to the game client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Assistant reply with synthesized speech
    AudioResponse {
        text: String,
        /// Hex-encoded audio bytes
        audio: String,
    },
    /// Acknowledges an `interrupt`
    Interrupted,
    /// A turn failed upstream; the session stays open
    Error { message: String },
}

impl ServerMessage {
    /// Build an `audio_response` from raw speech bytes
    #[must_use]
    pub fn audio_response(text: impl Into<String>, audio: &[u8]) -> Self {
        Self::AudioResponse {
            text: text.into(),
            audio: hex::encode(audio),
        }
    }

    /// Build an `error` message
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Parse a text frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is not a known envelope
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("invalid server message: {e}")))
    }

    /// Serialize to a text frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Hex-encode samples as little-endian `f32` bytes
#[must_use]
pub fn encode_samples(samples: &[f32]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    hex::encode(bytes)
}

/// Decode a hex payload of little-endian `f32` samples
///
/// # Errors
///
/// Returns a protocol error if the payload is not hex or not a whole
/// number of samples
pub fn decode_samples(chunk: &str) -> Result<Vec<f32>> {
    let bytes = hex::decode(chunk)?;
    if bytes.len() % 4 != 0 {
        return Err(Error::Protocol(format!(
            "audio chunk of {} bytes is not a whole number of f32 samples",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Decode the hex audio carried by an `audio_response`
///
/// # Errors
///
/// Returns a protocol error if the payload is not hex
pub fn decode_audio(audio: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(audio)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_chunk_wire_shape() {
        let msg = ClientMessage::audio_chunk(&[1.0], Some(NpcRole::Ceo));
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"audio_chunk","chunk":"0000803f","npc_role":"CEO"}"#);
    }

    #[test]
    fn npc_role_is_optional() {
        let msg = ClientMessage::parse(r#"{"type":"audio_chunk","chunk":""}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::AudioChunk {
                chunk: String::new(),
                npc_role: None
            }
        );

        let json = serde_json::to_string(&ClientMessage::audio_chunk(&[], None)).unwrap();
        assert!(!json.contains("npc_role"));
    }

    #[test]
    fn unit_messages_parse() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"end_of_audio"}"#).unwrap(),
            ClientMessage::EndOfAudio
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"interrupt"}"#).unwrap(),
            ClientMessage::Interrupt
        );
        assert_eq!(
            ServerMessage::parse(r#"{"type":"interrupted"}"#).unwrap(),
            ServerMessage::Interrupted
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(ClientMessage::parse(r#"{"type":"hello"}"#).is_err());
        assert!(ClientMessage::parse("not json").is_err());
    }

    #[test]
    fn server_messages_serialize() {
        let json = ServerMessage::audio_response("hi", &[0xff, 0x01]).to_json().unwrap();
        assert_eq!(json, r#"{"type":"audio_response","text":"hi","audio":"ff01"}"#);

        let json = ServerMessage::error("boom").to_json().unwrap();
        assert_eq!(json, r#"{"type":"error","message":"boom"}"#);
    }

    #[test]
    fn sample_payload_decodes() {
        let samples = vec![0.0, -0.5, 0.25];
        assert_eq!(decode_samples(&encode_samples(&samples)).unwrap(), samples);
    }

    #[test]
    fn truncated_sample_payload_is_rejected() {
        assert!(matches!(decode_samples("0000803"), Err(Error::Protocol(_))));
        assert!(matches!(decode_samples("000080"), Err(Error::Protocol(_))));
        assert!(matches!(decode_samples("zz"), Err(Error::Protocol(_))));
    }
}
