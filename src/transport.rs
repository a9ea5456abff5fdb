//! Websocket session transport: connection lifecycle, setup handshake, and
//! message framing for one conversational session.
//!
//! The transport is an actor: it owns the connection and its state machine,
//! reads commands from one channel and emits events on another. No other
//! component ever touches `SessionState`.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::audio::AudioFrame;
use crate::config::Config;
use crate::error::SessionError;
use crate::protocol::{self, ServerEvent};

/// Consecutive protocol errors tolerated before the session fails.
/// One bad frame must not kill a live conversation; a stream of them means
/// the peer is not speaking our protocol.
pub const PROTOCOL_ERROR_LIMIT: u32 = 5;

/// Connection lifecycle. `Failed` is reachable from `Connecting` or `Open`
/// on unrecoverable transport error; everything else moves left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

/// Events emitted toward the session controller. Channel order is
/// delivery order, which is what guarantees an `Interrupted` reaches the
/// listener before any chunk that followed it on the wire.
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake done; the session accepts audio from here on.
    Open,
    /// One PCM16 payload from the server's current turn.
    AudioChunk(Bytes),
    /// The server detected barge-in; scheduled playback is stale.
    Interrupted,
    /// End of the server's turn. Advisory.
    TurnComplete,
    /// Clean close, either end.
    Closed,
    /// Unrecoverable failure; the session is over.
    Error(SessionError),
}

#[derive(Debug)]
pub enum TransportCommand {
    /// Serialize and transmit one capture frame. Dropped with a warning
    /// outside `Open` — capture can drain frames for a moment around a
    /// remote close, and that must not raise.
    SendAudio(AudioFrame),
    /// Close the connection cleanly.
    Close,
}

pub struct SessionTransport {
    config: Config,
    system_prompt: String,
    state: SessionState,
    protocol_errors: u32,
    tx: mpsc::Sender<TransportEvent>,
    rx_cmd: mpsc::Receiver<TransportCommand>,
}

impl SessionTransport {
    pub fn new(
        config: Config,
        system_prompt: &str,
        tx: mpsc::Sender<TransportEvent>,
        rx_cmd: mpsc::Receiver<TransportCommand>,
    ) -> Self {
        Self {
            config,
            system_prompt: system_prompt.to_string(),
            state: SessionState::Idle,
            protocol_errors: 0,
            tx,
            rx_cmd,
        }
    }

    /// Drive the session to completion. Consumes the transport: there is no
    /// reconnect — a reconnected session would have lost the conversation's
    /// turn context, so recovery is a fresh session.
    pub async fn run(mut self) {
        if self.state != SessionState::Idle {
            self.state = SessionState::Failed;
            let _ = self
                .tx
                .send(TransportEvent::Error(SessionError::Connection(
                    "transport already started".into(),
                )))
                .await;
            return;
        }

        match self.connect_and_loop().await {
            Ok(()) => {
                self.state = SessionState::Closed;
                let _ = self.tx.send(TransportEvent::Closed).await;
            }
            Err(e) => {
                self.state = SessionState::Failed;
                log::error!("Transport failed: {}", e);
                let _ = self.tx.send(TransportEvent::Error(e)).await;
            }
        }
    }

    // 进入连接和主循环，处理WebSocket消息和发送命令
    async fn connect_and_loop(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Connecting;

        let url = self.session_url()?;
        log::info!(
            "Connecting to {}...",
            url.host_str().unwrap_or("<unknown host>")
        );
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        log::info!("Connected");

        let (mut write, mut read) = ws_stream.split();

        // Exactly one setup message leaves this connection, and it leaves
        // before any audio does.
        let setup =
            protocol::setup_message(self.config.model, self.config.voice, &self.system_prompt);
        let setup_json =
            serde_json::to_string(&setup).map_err(|e| SessionError::Protocol(e.to_string()))?;
        write
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        self.state = SessionState::Open;
        if self.tx.send(TransportEvent::Open).await.is_err() {
            // Controller is gone; nothing left to serve.
            return Ok(());
        }

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()).await?,
                        Some(Ok(Message::Binary(data))) => {
                            // Some backends deliver the JSON envelope as a
                            // binary blob.
                            match std::str::from_utf8(&data) {
                                Ok(text) => self.dispatch(text).await?,
                                Err(e) => {
                                    self.protocol_failure(&SessionError::Protocol(format!(
                                        "non-UTF8 binary message: {e}"
                                    )))?;
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            self.state = SessionState::Closing;
                            break;
                        }
                        Some(Ok(_)) => {} // ping/pong, handled by the stack
                        Some(Err(e)) => return Err(SessionError::Connection(e.to_string())),
                        None => return Err(SessionError::Connection("connection dropped".into())),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(TransportCommand::SendAudio(frame)) => {
                            if self.state != SessionState::Open {
                                log::warn!(
                                    "Dropping audio frame sent while {:?}",
                                    self.state
                                );
                                continue;
                            }
                            let msg = protocol::realtime_input(&frame);
                            let json = serde_json::to_string(&msg)
                                .map_err(|e| SessionError::Protocol(e.to_string()))?;
                            write
                                .send(Message::Text(json.into()))
                                .await
                                .map_err(|e| SessionError::Connection(e.to_string()))?;
                        }
                        Some(TransportCommand::Close) | None => {
                            self.state = SessionState::Closing;
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Parse one server message and forward its events in order. Protocol
    /// errors drop the message; too many in a row fail the session.
    async fn dispatch(&mut self, text: &str) -> Result<(), SessionError> {
        match protocol::parse_server_message(text) {
            Ok(events) => {
                self.protocol_errors = 0;
                if events.is_empty() {
                    log::debug!("Ignoring server message without session content");
                }
                for ev in events {
                    let event = match ev {
                        ServerEvent::Interrupted => TransportEvent::Interrupted,
                        ServerEvent::AudioChunk(payload) => TransportEvent::AudioChunk(payload),
                        ServerEvent::TurnComplete => TransportEvent::TurnComplete,
                    };
                    if self.tx.send(event).await.is_err() {
                        return Err(SessionError::Connection("event channel closed".into()));
                    }
                }
                Ok(())
            }
            Err(e) => self.protocol_failure(&e),
        }
    }

    fn protocol_failure(&mut self, e: &SessionError) -> Result<(), SessionError> {
        self.protocol_errors += 1;
        log::warn!(
            "Dropping bad server message ({} consecutive): {}",
            self.protocol_errors,
            e
        );
        if self.protocol_errors >= PROTOCOL_ERROR_LIMIT {
            return Err(SessionError::Protocol(format!(
                "{} consecutive protocol errors, giving up",
                self.protocol_errors
            )));
        }
        Ok(())
    }

    // 根据配置构建WebSocket请求：API key 作为查询参数附加
    fn session_url(&self) -> Result<Url, SessionError> {
        let mut url = Url::parse(self.config.ws_url)
            .map_err(|e| SessionError::Connection(format!("bad endpoint url: {e}")))?;
        url.query_pairs_mut().append_pair("key", self.config.api_key);
        Ok(url)
    }
}
