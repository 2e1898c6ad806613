//! Websocket relay server
//!
//! Each connection gets its own [`Session`](super::Session). Turns on a
//! connection are processed one at a time in arrival order, so a client
//! always sees exactly one reply per `end_of_audio`.

use std::io::Write;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use super::session::{ConnectionId, SessionRegistry, SharedSession};
use crate::config::RelayServerConfig;
use crate::llm::{ChatModel, SamplingParams};
use crate::npc::{NpcRole, voice_for};
use crate::protocol::{ClientMessage, ServerMessage, decode_samples};
use crate::voice::{Synthesizer, Transcriber, samples_to_wav};
use crate::{Error, Result};

/// Upstream services a relay turn runs through
#[derive(Clone)]
pub struct RelayServices {
    pub transcriber: Arc<dyn Transcriber>,
    pub chat: Arc<dyn ChatModel>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

struct RelayState {
    services: RelayServices,
    sessions: SessionRegistry,
    sample_rate: u32,
}

/// Relay server
pub struct RelayServer {
    state: Arc<RelayState>,
    config: RelayServerConfig,
}

impl RelayServer {
    #[must_use]
    pub fn new(config: RelayServerConfig, services: RelayServices) -> Self {
        Self {
            state: Arc::new(RelayState {
                services,
                sessions: SessionRegistry::new(),
                sample_rate: config.sample_rate,
            }),
            config,
        }
    }

    /// Handle to the live session registry
    #[must_use]
    pub fn sessions(&self) -> SessionRegistry {
        self.state.sessions.clone()
    }

    /// Build the router; the websocket lives at `/`
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(ws_upgrade))
            .with_state(Arc::clone(&self.state))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until the process ends
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Connection(format!("failed to bind relay on {addr}: {e}")))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the server stops with an IO failure
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "relay server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Connection(format!("relay server error: {e}")))?;

        Ok(())
    }

    /// Run the relay server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

async fn ws_upgrade(State(state): State<Arc<RelayState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut sender, mut receiver) = socket.split();
    let (id, session) = state.sessions.open().await;

    tracing::info!(connection = %id, "relay client connected");

    // Create channel for sending messages back to client
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(32);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg.to_json() {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to encode relay message"),
            }
        }
    });

    let recv_state = Arc::clone(&state);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_message(text.as_str(), &recv_state, id, &session, &tx).await;
                }
                Message::Binary(data) => {
                    tracing::warn!(connection = %id, len = data.len(), "ignoring binary frame");
                }
                Message::Close(_) => {
                    tracing::info!(connection = %id, "relay client closed connection");
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.sessions.close(id).await;
    tracing::info!(connection = %id, "relay client disconnected");
}

/// Handle a single incoming message
///
/// Malformed input is logged and dropped; the connection stays open.
async fn handle_message(
    text: &str,
    state: &RelayState,
    id: ConnectionId,
    session: &SharedSession,
    tx: &mpsc::Sender<ServerMessage>,
) {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(connection = %id, error = %e, "ignoring malformed message");
            return;
        }
    };

    match message {
        ClientMessage::AudioChunk { chunk, npc_role } => {
            let samples = match decode_samples(&chunk) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!(connection = %id, error = %e, "ignoring undecodable audio chunk");
                    return;
                }
            };
            let role = npc_role.as_deref().and_then(|raw| match raw.parse::<NpcRole>() {
                Ok(role) => Some(role),
                Err(_) => {
                    tracing::warn!(connection = %id, npc_role = raw, "unknown npc role, keeping current");
                    None
                }
            });

            let mut guard = session.lock().await;
            guard.append_chunk(&samples, role);
            tracing::trace!(connection = %id, samples = samples.len(), buffered = guard.buffered(), "audio chunk");
        }
        ClientMessage::EndOfAudio => {
            let Some(samples) = session.lock().await.take_utterance() else {
                tracing::debug!(connection = %id, "end_of_audio with empty buffer");
                return;
            };

            tracing::info!(connection = %id, samples = samples.len(), "processing utterance");
            let outcome = process_turn(state, session, &samples).await;
            session.lock().await.finish_turn();

            let reply = outcome.unwrap_or_else(|e| {
                tracing::error!(connection = %id, error = %e, "relay turn failed");
                ServerMessage::error(e.to_string())
            });
            if tx.send(reply).await.is_err() {
                tracing::debug!(connection = %id, "client gone before reply");
            }
        }
        ClientMessage::Interrupt => {
            let dropped = session.lock().await.interrupt();
            tracing::info!(connection = %id, dropped, "utterance interrupted");
            if tx.send(ServerMessage::Interrupted).await.is_err() {
                tracing::debug!(connection = %id, "client gone before interrupt acknowledgement");
            }
        }
    }
}

/// Transcribe, complete, and synthesize one utterance
async fn process_turn(state: &RelayState, session: &SharedSession, samples: &[f32]) -> Result<ServerMessage> {
    let wav = samples_to_wav(samples, state.sample_rate)?;
    let mut file = tempfile::Builder::new()
        .prefix("relay-utterance-")
        .suffix(".wav")
        .tempfile()?;
    file.write_all(&wav)?;
    file.flush()?;

    let transcript = state.services.transcriber.transcribe(file.path()).await?;
    drop(file);
    tracing::info!(transcript = %transcript, "utterance transcribed");

    let (messages, role) = {
        let mut guard = session.lock().await;
        (guard.prepare_messages(&transcript), guard.role())
    };

    let reply = state
        .services
        .chat
        .complete(&messages, &SamplingParams::RELAY)
        .await?;
    session.lock().await.record_exchange(transcript, reply.clone());

    let voice = voice_for(role);
    let audio = state.services.synthesizer.synthesize(&reply, voice).await?;
    tracing::info!(voice, audio_bytes = audio.len(), "reply synthesized");

    Ok(ServerMessage::audio_response(reply, &audio))
}
