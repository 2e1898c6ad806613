//! Background voice conversation task
//!
//! The controller never touches the microphone or the network itself. It
//! spawns a [`VoiceTask`] running a [`VoicePipeline`], reads its events once
//! per tick, and cancels it through a watch channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{CaptureConfig, RelayClientConfig};
use crate::npc::NpcRole;
use crate::protocol::{ServerMessage, decode_audio};
use crate::relay::RelayClient;
use crate::voice::{AudioCapture, AudioPlayback, Utterance};
use crate::{Error, Result};

/// How long to wait for the relay to acknowledge an interrupt on shutdown
const INTERRUPT_GRACE: Duration = Duration::from_secs(1);

/// Progress reported by a running voice task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// Microphone is open and the relay connected
    Listening,
    /// The NPC answered
    Reply { text: String },
    /// The task ended with an error
    Failed(String),
    /// The task ended after being cancelled
    Stopped,
}

/// A voice conversation loop for one NPC
#[async_trait]
pub trait VoicePipeline: Send + Sync {
    /// Run until `stop` flips to true
    ///
    /// # Errors
    ///
    /// Returns error if the loop cannot start or the relay fails
    async fn run(
        &self,
        role: NpcRole,
        events: mpsc::UnboundedSender<VoiceEvent>,
        stop: watch::Receiver<bool>,
    ) -> Result<()>;
}

/// Handle to a running voice pipeline
pub struct VoiceTask {
    stop: watch::Sender<bool>,
    events: mpsc::UnboundedReceiver<VoiceEvent>,
    handle: JoinHandle<()>,
}

impl VoiceTask {
    /// Spawn `pipeline` for `role` on `runtime`
    #[must_use]
    pub fn spawn(runtime: &Handle, pipeline: Arc<dyn VoicePipeline>, role: NpcRole) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let (events_tx, events) = mpsc::unbounded_channel();

        let handle = runtime.spawn(async move {
            let outcome = pipeline.run(role, events_tx.clone(), stop_rx).await;
            let last = match outcome {
                Ok(()) => VoiceEvent::Stopped,
                Err(e) => {
                    tracing::warn!(error = %e, "voice task failed");
                    VoiceEvent::Failed(e.to_string())
                }
            };
            let _ = events_tx.send(last);
        });

        Self { stop, events, handle }
    }

    /// Request cancellation; the task winds down in the background
    pub fn cancel(&self) {
        let _ = self.stop.send(true);
    }

    /// Drain events reported since the last call
    pub fn poll_events(&mut self) -> Vec<VoiceEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Capture, relay round trip, and playback against the real devices
pub struct RelayVoicePipeline {
    client: RelayClientConfig,
    capture: CaptureConfig,
}

impl RelayVoicePipeline {
    #[must_use]
    pub const fn new(client: RelayClientConfig, capture: CaptureConfig) -> Self {
        Self { client, capture }
    }
}

#[async_trait]
impl VoicePipeline for RelayVoicePipeline {
    async fn run(
        &self,
        role: NpcRole,
        events: mpsc::UnboundedSender<VoiceEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut client = RelayClient::connect(&self.client.url, self.client.connect_timeout).await?;

        let (tx, mut utterances) = mpsc::channel::<Utterance>(self.capture.queue_capacity);
        let config = self.capture.clone();
        let started = tokio::task::spawn_blocking(move || {
            let mut capture = AudioCapture::new(config);
            capture.start(tx).map(|()| capture)
        })
        .await
        .map_err(|e| Error::Audio(format!("capture start task failed: {e}")));

        let capture = match started {
            Ok(Ok(capture)) => capture,
            Ok(Err(e)) | Err(e) => {
                let _ = client.close().await;
                return Err(e);
            }
        };

        let _ = events.send(VoiceEvent::Listening);
        tracing::info!(%role, "voice conversation started");

        let playback = AudioPlayback::new();
        let outcome = converse(&mut client, role, &mut utterances, &mut stop, &events, &playback).await;

        // Stopping flushes any open utterance into the queue; it is discarded
        let _ = tokio::task::spawn_blocking(move || drop(capture)).await;
        hang_up(client, utterances).await;
        tracing::info!(%role, "voice conversation ended");
        outcome
    }
}

/// Drop unsent utterances and close the relay connection
async fn hang_up(client: RelayClient, mut utterances: mpsc::Receiver<Utterance>) {
    utterances.close();
    let mut dropped = 0usize;
    while utterances.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        tracing::debug!(dropped, "discarded queued utterances");
    }

    if let Err(e) = client.close().await {
        tracing::debug!(error = %e, "relay close failed");
    }
}

async fn converse(
    client: &mut RelayClient,
    role: NpcRole,
    utterances: &mut mpsc::Receiver<Utterance>,
    stop: &mut watch::Receiver<bool>,
    events: &mpsc::UnboundedSender<VoiceEvent>,
    playback: &AudioPlayback,
) -> Result<()> {
    loop {
        if *stop.borrow() {
            return Ok(());
        }

        let utterance = tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return Ok(());
                }
                continue;
            }
            next = utterances.recv() => match next {
                Some(utterance) => utterance,
                None => return Ok(()),
            },
        };

        let reply = {
            let round_trip = client.send_utterance(utterance.samples(), Some(role));
            tokio::pin!(round_trip);
            tokio::select! {
                reply = &mut round_trip => reply?,
                _ = stop.changed() => None,
            }
        };

        if *stop.borrow() {
            // Abandoned mid-turn; tell the relay to drop what it has
            match tokio::time::timeout(INTERRUPT_GRACE, client.interrupt()).await {
                Ok(Ok(())) => tracing::debug!("relay acknowledged interrupt"),
                Ok(Err(e)) => tracing::debug!(error = %e, "interrupt failed"),
                Err(_) => tracing::debug!("interrupt not acknowledged in time"),
            }
            return Ok(());
        }

        match reply {
            None => {
                tracing::info!("relay closed the connection");
                return Ok(());
            }
            Some(ServerMessage::AudioResponse { text, audio }) => {
                let _ = events.send(VoiceEvent::Reply { text });
                match decode_audio(&audio) {
                    Ok(bytes) => play_unless_stopped(playback, &bytes, stop).await,
                    Err(e) => tracing::warn!(error = %e, "ignoring undecodable response audio"),
                }
            }
            Some(ServerMessage::Error { message }) => {
                tracing::warn!(message = %message, "relay reported an error");
            }
            Some(ServerMessage::Interrupted) => {
                tracing::debug!("unexpected interrupted acknowledgement");
            }
        }
    }
}

async fn play_unless_stopped(playback: &AudioPlayback, audio: &[u8], stop: &mut watch::Receiver<bool>) {
    // Re-arm before checking `stop` so a halt from here on is never lost
    playback.reset();
    if *stop.borrow() {
        return;
    }

    let play = playback.play_transient(audio);
    tokio::pin!(play);

    let result = tokio::select! {
        result = &mut play => result,
        _ = stop.changed() => {
            playback.halt();
            play.await
        }
    };

    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to play response audio");
    }
}
