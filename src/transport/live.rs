//! # Live Streaming Transport
//!
//! WebSocket client for the provider's realtime speech endpoint. Maps the
//! provider's JSON wire messages onto the neutral event vocabulary in
//! `call::events`; nothing outside this file knows the provider's format.
//!
//! ## Session Shape:
//! 1. Connect, send a `setup` message carrying the system prompt and the
//!    audio response modality
//! 2. Forward outbound capture frames as `audio` messages
//! 3. Translate inbound messages to `TransportEvent`s until close or error

use crate::audio::pcm::WireFrame;
use crate::call::events::TransportEvent;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::StreamingTransport;

/// Inbound provider message, deserialized before translation.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProviderMessage {
    SetupComplete,
    InputTranscript { text: String },
    OutputTranscript { text: String },
    TurnComplete,
    Audio { mime_type: String, data: String },
    Interrupted,
    Error { message: String },
}

/// WebSocket transport against the realtime provider endpoint.
pub struct LiveTransport {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl LiveTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shutdown: None,
        }
    }
}

#[async_trait]
impl StreamingTransport for LiveTransport {
    async fn open(
        &mut self,
        system_prompt: &str,
        mut outbound: mpsc::UnboundedReceiver<WireFrame>,
    ) -> AppResult<mpsc::UnboundedReceiver<TransportEvent>> {
        let (ws, _) = connect_async(&self.url)
            .await
            .map_err(|e| AppError::Transport(format!("connection failed: {}", e)))?;
        let (mut write, mut read) = ws.split();

        let setup = json!({
            "type": "setup",
            "system_prompt": system_prompt,
            "response_modality": "audio",
        });
        write
            .send(Message::Text(setup.to_string()))
            .await
            .map_err(|e| AppError::Transport(format!("setup send failed: {}", e)))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown = Some(shutdown_tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    frame = outbound.recv() => {
                        match frame {
                            Some(frame) => {
                                let msg = json!({
                                    "type": "audio",
                                    "mime_type": frame.mime_type,
                                    "data": frame.data,
                                });
                                if write.send(Message::Text(msg.to_string())).await.is_err() {
                                    let _ = event_tx.send(TransportEvent::Error {
                                        message: "outbound send failed".to_string(),
                                    });
                                    break;
                                }
                            }
                            // Capture pipeline stopped; keep the read side alive
                            // until the provider closes or we are shut down.
                            None => outbound.close(),
                        }
                    }
                    inbound = read.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                match translate(&text) {
                                    Some(event) => {
                                        if event_tx.send(event).is_err() {
                                            break;
                                        }
                                    }
                                    None => debug!("ignoring unrecognized provider message"),
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let reason = frame.map(|f| f.reason.to_string());
                                let _ = event_tx.send(TransportEvent::Closed { reason });
                                break;
                            }
                            Some(Ok(_)) => {} // ping/pong/binary handled by tungstenite
                            Some(Err(e)) => {
                                let _ = event_tx.send(TransportEvent::Error {
                                    message: format!("stream error: {}", e),
                                });
                                break;
                            }
                            None => {
                                let _ = event_tx.send(TransportEvent::Closed { reason: None });
                                break;
                            }
                        }
                    }
                }
            }
            debug!("live transport task finished");
        });

        Ok(event_rx)
    }

    async fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            if shutdown.send(()).is_err() {
                warn!("live transport task already gone at close");
            }
        }
    }
}

/// Translate one provider JSON message into a transport event.
fn translate(text: &str) -> Option<TransportEvent> {
    let message: ProviderMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("undecodable provider message: {}", e);
            return None;
        }
    };

    Some(match message {
        ProviderMessage::SetupComplete => TransportEvent::Opened,
        ProviderMessage::InputTranscript { text } => TransportEvent::InputTranscript { text },
        ProviderMessage::OutputTranscript { text } => TransportEvent::OutputTranscript { text },
        ProviderMessage::TurnComplete => TransportEvent::TurnComplete,
        ProviderMessage::Audio { mime_type, data } => TransportEvent::Audio {
            frame: WireFrame { mime_type, data },
        },
        ProviderMessage::Interrupted => TransportEvent::Interrupted,
        ProviderMessage::Error { message } => TransportEvent::Error { message },
    })
}
