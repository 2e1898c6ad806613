//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use office_npcs::config::RelayServerConfig;
use office_npcs::dialogue::{VoiceEvent, VoicePipeline};
use office_npcs::llm::{ChatModel, SamplingParams};
use office_npcs::npc::NpcRole;
use office_npcs::relay::{RelayServer, RelayServices, SessionRegistry};
use office_npcs::voice::{Synthesizer, Transcriber};
use office_npcs::{Error, Result, Turn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Transcribes a WAV as "<n> samples", recording every call
#[derive(Default)]
pub struct CountingTranscriber {
    pub calls: AtomicUsize,
    pub paths: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Transcriber for CountingTranscriber {
    async fn transcribe(&self, wav: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().push(wav.to_path_buf());
        let reader = hound::WavReader::open(wav).map_err(|e| Error::Stt(e.to_string()))?;
        Ok(format!("{} samples", reader.len()))
    }
}

/// Replies "reply to: <last user turn>", recording every request
#[derive(Default)]
pub struct EchoChat {
    pub requests: Mutex<Vec<(Vec<Turn>, SamplingParams)>>,
    pub fail: AtomicBool,
}

impl EchoChat {
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_messages(&self) -> Vec<Turn> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|(messages, _)| messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for EchoChat {
    async fn complete(&self, messages: &[Turn], params: &SamplingParams) -> Result<String> {
        self.requests.lock().unwrap().push((messages.to_vec(), *params));
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Llm("upstream unavailable".to_string()));
        }
        let last = messages.last().map(|t| t.content.as_str()).unwrap_or_default();
        Ok(format!("reply to: {last}"))
    }
}

/// "Synthesizes" by returning the text bytes, recording the voice used
#[derive(Default)]
pub struct RecordingSynth {
    pub voices: Mutex<Vec<String>>,
}

impl RecordingSynth {
    pub fn voices(&self) -> Vec<String> {
        self.voices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynth {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        self.voices.lock().unwrap().push(voice.to_string());
        Ok(text.as_bytes().to_vec())
    }
}

/// A relay server on an ephemeral loopback port with fake upstreams
pub struct TestRelay {
    pub url: String,
    pub sessions: SessionRegistry,
    pub transcriber: Arc<CountingTranscriber>,
    pub chat: Arc<EchoChat>,
    pub synth: Arc<RecordingSynth>,
}

impl TestRelay {
    pub async fn start() -> Self {
        let transcriber = Arc::new(CountingTranscriber::default());
        let chat = Arc::new(EchoChat::default());
        let synth = Arc::new(RecordingSynth::default());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = RelayServer::new(
            RelayServerConfig {
                host: addr.ip().to_string(),
                port: addr.port(),
                sample_rate: 16000,
            },
            RelayServices {
                transcriber: transcriber.clone(),
                chat: chat.clone(),
                synthesizer: synth.clone(),
            },
        );
        let sessions = server.sessions();
        tokio::spawn(server.serve(listener));

        Self {
            url: format!("ws://{addr}"),
            sessions,
            transcriber,
            chat,
            synth,
        }
    }

    /// Wait until the registry holds `count` sessions
    pub async fn wait_for_sessions(&self, count: usize) {
        for _ in 0..200 {
            if self.sessions.len().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} sessions, found {}", self.sessions.len().await);
    }
}

/// Bare websocket for sending arbitrary frames
pub struct RawSocket {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RawSocket {
    pub async fn connect(url: &str) -> Self {
        let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        Self { socket }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.socket.send(Message::Text(text.into())).await.unwrap();
    }

    pub async fn send_json(&mut self, value: serde_json::Value) {
        self.send_text(&value.to_string()).await;
    }

    /// Next text frame as JSON, failing after a timeout
    pub async fn next_json(&mut self) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.socket.next())
            .await
            .expect("timed out waiting for relay")
            .expect("connection closed")
            .unwrap();
        match frame {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Voice pipeline that replays canned replies, then waits to be stopped
pub struct ScriptedPipeline {
    pub replies: Vec<String>,
    pub started: AtomicUsize,
}

impl ScriptedPipeline {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: replies.iter().map(|r| (*r).to_string()).collect(),
            started: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VoicePipeline for ScriptedPipeline {
    async fn run(
        &self,
        _role: NpcRole,
        events: mpsc::UnboundedSender<VoiceEvent>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _ = events.send(VoiceEvent::Listening);
        let mut replies: VecDeque<String> = self.replies.iter().cloned().collect();
        while let Some(text) = replies.pop_front() {
            let _ = events.send(VoiceEvent::Reply { text });
        }
        while !*stop.borrow() {
            if stop.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Voice pipeline whose relay is unreachable
pub struct UnreachablePipeline;

#[async_trait]
impl VoicePipeline for UnreachablePipeline {
    async fn run(
        &self,
        _role: NpcRole,
        _events: mpsc::UnboundedSender<VoiceEvent>,
        _stop: watch::Receiver<bool>,
    ) -> Result<()> {
        Err(Error::Connection("timed out connecting to ws://127.0.0.1:8765".to_string()))
    }
}

/// Generate sine wave samples at 16kHz
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sine(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (16000.0 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / 16000.0;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence at 16kHz
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn silence(duration_secs: f32) -> Vec<f32> {
    vec![0.0; (16000.0 * duration_secs) as usize]
}
