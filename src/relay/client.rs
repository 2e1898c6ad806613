//! Websocket relay client
//!
//! One persistent connection, one outstanding round trip at a time.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::npc::NpcRole;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client side of the relay protocol
pub struct RelayClient {
    socket: Socket,
    url: String,
}

impl RelayClient {
    /// Connect to the relay, giving up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns a connection error on timeout or refusal
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(url, ?timeout, "connecting to relay");

        let (socket, _response) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| Error::Connection(format!("timed out connecting to {url} after {timeout:?}")))?
            .map_err(|e| Error::Connection(format!("failed to connect to {url}: {e}")))?;

        tracing::info!(url, "connected to relay");
        Ok(Self {
            socket,
            url: url.to_string(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one utterance and wait for its reply
    ///
    /// Returns `Ok(None)` if the relay closed the connection instead of
    /// answering.
    ///
    /// # Errors
    ///
    /// Returns error if sending fails or the transport breaks
    pub async fn send_utterance(&mut self, samples: &[f32], npc_role: Option<NpcRole>) -> Result<Option<ServerMessage>> {
        tracing::debug!(samples = samples.len(), ?npc_role, "sending utterance");
        self.send(&ClientMessage::audio_chunk(samples, npc_role)).await?;
        self.send(&ClientMessage::EndOfAudio).await?;
        self.recv_reply().await
    }

    /// Ask the relay to discard its buffer and wait for the acknowledgement
    ///
    /// Replies still in flight for earlier turns are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if sending fails or the transport breaks
    pub async fn interrupt(&mut self) -> Result<()> {
        self.send(&ClientMessage::Interrupt).await?;
        loop {
            match self.recv_reply().await? {
                Some(ServerMessage::Interrupted) | None => return Ok(()),
                Some(stale) => tracing::debug!(?stale, "discarding reply superseded by interrupt"),
            }
        }
    }

    /// Next well-formed server message; `None` once the connection is closed
    ///
    /// # Errors
    ///
    /// Returns error on transport failure other than a normal close
    pub async fn recv_reply(&mut self) -> Result<Option<ServerMessage>> {
        while let Some(frame) = self.socket.next().await {
            match frame {
                Ok(Message::Text(text)) => match ServerMessage::parse(text.as_str()) {
                    Ok(message) => return Ok(Some(message)),
                    Err(e) => tracing::warn!(error = %e, "ignoring malformed relay message"),
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "relay closed connection");
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) if is_closed(&e) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Close the connection cleanly
    ///
    /// # Errors
    ///
    /// Returns error if the close handshake fails for a reason other than
    /// the peer already being gone
    pub async fn close(mut self) -> Result<()> {
        match self.socket.close(None).await {
            Err(e) if !is_closed(&e) => Err(e.into()),
            _ => {
                tracing::debug!(url = %self.url, "relay connection closed");
                Ok(())
            }
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.socket.send(Message::Text(text.into())).await?;
        Ok(())
    }
}

fn is_closed(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = RelayClient::connect(&format!("ws://127.0.0.1:{port}"), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        // Accepts TCP but never completes the websocket handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _accept = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let result = RelayClient::connect(&format!("ws://{addr}"), Duration::from_millis(100)).await;
        match result {
            Err(Error::Connection(message)) => assert!(message.contains("timed out")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connected to a silent server"),
        }
    }
}
