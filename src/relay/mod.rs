//! Voice relay between the game client and speech/LLM services
//!
//! The server reassembles `audio_chunk` messages per connection, runs each
//! utterance through transcription, completion, and synthesis, and answers
//! with one `audio_response`. The client frames captured utterances and
//! awaits those replies.

mod client;
mod server;
mod session;

pub use client::RelayClient;
pub use server::{RelayServer, RelayServices};
pub use session::{ConnectionId, Phase, Session, SessionRegistry, SharedSession};
