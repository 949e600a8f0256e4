use super::messages::{
    demux, ClientContent, ClientContentFrame, Content, MediaChunk, RealtimeInput,
    RealtimeInputFrame, ServerFrame, SetupFrame, SetupPayload, TransportEvent,
};
use crate::error::EngineError;
use futures::{SinkExt, StreamExt};
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

/// Protocol connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Duplex channel to the live conversational model.
///
/// Implemented by `RealtimeTransportClient` and by test doubles; the
/// orchestrator only sees this seam.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel, send the setup frame, and resolve once the remote
    /// side acknowledges setup.
    async fn connect(&self, setup: SetupPayload) -> Result<(), EngineError>;

    /// Wrap one audio chunk in the realtime-input envelope and send it
    async fn send_audio(&self, chunk: MediaChunk) -> Result<(), EngineError>;

    /// Send a text message with an explicit turn-boundary flag
    async fn send_text(&self, text: &str, end_of_turn: bool) -> Result<(), EngineError>;

    /// Close the channel. Idempotent; does not wait for in-flight sends.
    async fn disconnect(&self) -> Result<(), EngineError>;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Full WebSocket URL including any auth query parameters
    pub url: String,
}

/// WebSocket client for the model's bidirectional streaming protocol.
///
/// State machine over {Disconnected, Connecting, Connected}: the setup
/// frame goes out on channel open before any other traffic, and the client
/// only reports Connected once the setup ack arrives. Concurrent `connect`
/// calls share the in-flight attempt instead of dialing twice.
pub struct RealtimeTransportClient {
    config: TransportConfig,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::Sender<TransportEvent>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
}

impl RealtimeTransportClient {
    /// Create a client and the receiver for its demultiplexed events.
    pub fn new(config: TransportConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        (
            Self {
                config,
                state_tx,
                events_tx,
                outbound: Mutex::new(None),
                reader_task: StdMutex::new(None),
            },
            events_rx,
        )
    }

    /// Wait until the in-flight attempt settles one way or the other.
    async fn await_settled(&self) -> Result<(), EngineError> {
        let mut rx = self.state_tx.subscribe();
        loop {
            match *rx.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected => {
                    return Err(EngineError::Transport(
                        "connection attempt failed".to_string(),
                    ))
                }
                ConnectionState::Connecting => {}
            }
            if rx.changed().await.is_err() {
                return Err(EngineError::Transport("client dropped".to_string()));
            }
        }
    }

    async fn dial(&self, setup: SetupPayload) -> Result<(), EngineError> {
        info!("Connecting to live model at {}", redact(&self.config.url));

        let (ws, _response) = tokio_tungstenite::connect_async(&self.config.url)
            .await
            .map_err(|e| {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                EngineError::Transport(format!("failed to open channel: {e}"))
            })?;

        let (mut ws_sink, mut ws_stream) = ws.split();

        // Setup goes out before any other traffic
        let setup_json = serde_json::to_string(&SetupFrame { setup }).map_err(|e| {
            self.state_tx.send_replace(ConnectionState::Disconnected);
            EngineError::Protocol(format!("failed to encode setup frame: {e}"))
        })?;

        ws_sink
            .send(Message::Text(setup_json))
            .await
            .map_err(|e| {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                EngineError::Transport(format!("failed to send setup frame: {e}"))
            })?;

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(100);

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = ws_sink.send(msg).await {
                    warn!("Outbound send failed: {}", e);
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        let state_tx = self.state_tx.clone();
        let events_tx = self.events_tx.clone();

        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        handle_inbound(text.as_bytes(), &state_tx, &events_tx).await;
                    }
                    Ok(Message::Binary(bytes)) => {
                        handle_inbound(&bytes, &state_tx, &events_tx).await;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events_tx
                            .send(TransportEvent::Error {
                                message: format!("transport error: {e}"),
                            })
                            .await;
                        break;
                    }
                }
            }

            let was = state_tx.send_replace(ConnectionState::Disconnected);
            if was != ConnectionState::Disconnected {
                info!("Channel closed");
                let _ = events_tx.send(TransportEvent::Disconnected).await;
            }
        });

        {
            let mut outbound = self.outbound.lock().await;
            *outbound = Some(out_tx);
        }
        {
            let mut task = self.reader_task.lock().expect("transport lock poisoned");
            *task = Some(reader);
        }

        // Connected only once the reader sees the setup ack
        self.await_settled().await
    }

    async fn send_frame<T: serde::Serialize>(&self, frame: &T) -> Result<(), EngineError> {
        let json = serde_json::to_string(frame)
            .map_err(|e| EngineError::Protocol(format!("failed to encode frame: {e}")))?;

        let outbound = self.outbound.lock().await;
        let tx = outbound
            .as_ref()
            .ok_or_else(|| EngineError::Transport("not connected".to_string()))?;

        tx.send(Message::Text(json))
            .await
            .map_err(|_| EngineError::Transport("connection closed".to_string()))
    }
}

#[async_trait::async_trait]
impl Transport for RealtimeTransportClient {
    async fn connect(&self, setup: SetupPayload) -> Result<(), EngineError> {
        // Atomically claim the Connecting slot; losers share the winner's
        // in-flight attempt
        let claimed = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if claimed {
            self.dial(setup).await
        } else if self.is_connected() {
            Ok(())
        } else {
            self.await_settled().await
        }
    }

    async fn send_audio(&self, chunk: MediaChunk) -> Result<(), EngineError> {
        self.send_frame(&RealtimeInputFrame {
            realtime_input: RealtimeInput {
                media_chunks: vec![chunk],
            },
        })
        .await
    }

    async fn send_text(&self, text: &str, end_of_turn: bool) -> Result<(), EngineError> {
        self.send_frame(&ClientContentFrame {
            client_content: ClientContent {
                turns: vec![Content::user_text(text)],
                turn_complete: end_of_turn,
            },
        })
        .await
    }

    async fn disconnect(&self) -> Result<(), EngineError> {
        // Dropping the outbound sender ends the writer task, which closes
        // the socket
        {
            let mut outbound = self.outbound.lock().await;
            if outbound.take().is_none() && self.state() == ConnectionState::Disconnected {
                return Ok(());
            }
        }

        {
            let mut task = self.reader_task.lock().expect("transport lock poisoned");
            if let Some(reader) = task.take() {
                reader.abort();
            }
        }

        let was = self.state_tx.send_replace(ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            info!("Disconnected from live model");
            let _ = self.events_tx.send(TransportEvent::Disconnected).await;
        }

        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }
}

async fn handle_inbound(
    bytes: &[u8],
    state_tx: &watch::Sender<ConnectionState>,
    events_tx: &mpsc::Sender<TransportEvent>,
) {
    let frame: ServerFrame = match serde_json::from_slice(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            // One malformed frame must not kill a live conversation
            warn!("Dropping unparseable server frame: {}", e);
            return;
        }
    };

    for event in demux(frame) {
        if matches!(event, TransportEvent::Connected) {
            state_tx.send_replace(ConnectionState::Connected);
        }
        if events_tx.send(event).await.is_err() {
            return;
        }
    }
}

/// Strip query parameters (the API key) before logging a URL.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_strips_query() {
        assert_eq!(redact("wss://host/ws?key=secret"), "wss://host/ws");
        assert_eq!(redact("wss://host/ws"), "wss://host/ws");
    }
}
