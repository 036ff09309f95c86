//! # WebSocket Call Handler
//!
//! The realtime surface of the simulator. A client connects to `/ws/call`,
//! sends one `start_call` message with the simulation setup, then streams
//! raw microphone samples as binary frames. The server streams back playback
//! placements, transcript updates, interruptions, and status changes.
//!
//! ## WebSocket Protocol:
//! - **Client → Server (text)**: `start_call`, `end_call`, `visualization`,
//!   `pong`
//! - **Client → Server (binary)**: little-endian f32 PCM microphone samples
//! - **Server → Client (text)**: `status`, `playback`, `transcript`,
//!   `interrupted`, `visualization`, `call_ended`, `error`, `ping`
//!
//! One connection owns at most one [`CallSession`]; the session's state
//! machine decides what is legal, the actor only translates between wire
//! messages and session calls.

use crate::call::events::TransportEvent;
use crate::call::session::{AudioRates, CallSession, CallState, CallUpdate};
use crate::call::transcript::TranscriptEntry;
use crate::simulation::SimulationConfig;
use crate::state::AppState;
use crate::transport::LiveTransport;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// Default bin count for visualization requests that omit one.
const DEFAULT_VISUALIZATION_BINS: usize = 32;

/// Messages the client may send as text frames.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Begin a call with the given simulation setup.
    #[serde(rename_all = "camelCase")]
    StartCall {
        config: SimulationConfig,
        /// Outcome of the client's microphone permission prompt.
        microphone_granted: bool,
    },

    /// End the call and receive the finalized transcript.
    EndCall,

    /// Request frequency-domain data for the audio currently playing.
    Visualization { bins: Option<usize> },

    /// Heartbeat response.
    Pong { timestamp: u64 },
}

/// Messages the server sends as text frames.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Call lifecycle change: connecting, active, idle, error.
    Status {
        status: String,
        message: Option<String>,
    },

    /// A customer-audio chunk with its slot on the playback timeline. The
    /// client renders `data` starting at `startTime` on its audio clock.
    #[serde(rename_all = "camelCase")]
    Playback {
        source_id: u64,
        start_time: f64,
        duration: f64,
        mime_type: String,
        data: String,
    },

    /// Turn-complete entries appended to the running transcript.
    Transcript { entries: Vec<TranscriptEntry> },

    /// The customer was talked over; stop rendering these sources now.
    #[serde(rename_all = "camelCase")]
    Interrupted { dropped_sources: Vec<u64> },

    /// Frequency bins for the currently playing audio.
    Visualization { bins: Vec<f32> },

    /// The call ended; this transcript is what evaluation should score.
    CallEnded { transcription: Vec<TranscriptEntry> },

    /// Something went wrong. The connection stays open.
    Error { code: String, message: String },

    /// Heartbeat.
    Ping { timestamp: u64 },
}

/// WebSocket actor owning one call session.
///
/// Each connection is an independent actor, so all session access is
/// single-threaded and the state machine needs no internal locking.
pub struct CallWebSocket {
    app_state: web::Data<AppState>,
    session: Option<CallSession>,
    last_heartbeat: Instant,
    /// Whether this connection currently holds an active-call slot.
    counted_active: bool,
}

impl CallWebSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        Self {
            app_state,
            session: None,
            last_heartbeat: Instant::now(),
            counted_active: false,
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => error!("failed to serialize server message: {}", e),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!("call websocket error {}: {}", code, message);
        self.send(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// Give back the active-call slot, once.
    fn release_active_slot(&mut self) {
        if self.counted_active {
            self.app_state.decrement_active_calls();
            self.counted_active = false;
        }
    }

    fn handle_start_call(
        &mut self,
        config: SimulationConfig,
        microphone_granted: bool,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        match self.session.as_ref().map(CallSession::state) {
            Some(CallState::Idle) | None => {}
            Some(CallState::Error) => {
                self.send_error(ctx, "call_failed", "previous call failed; send end_call first");
                return;
            }
            Some(_) => {
                self.send_error(ctx, "call_in_progress", "a call is already in progress");
                return;
            }
        }

        let app_config = self.app_state.get_config();
        if self.app_state.active_calls() >= app_config.performance.max_concurrent_calls as u32 {
            self.send_error(ctx, "capacity", "maximum concurrent calls reached");
            return;
        }

        let rates = AudioRates {
            input: app_config.audio.input_sample_rate,
            output: app_config.audio.output_sample_rate,
            block_size: app_config.audio.capture_block_size,
        };
        let transport = LiveTransport::new(app_config.streaming.url.clone());
        let mut session = CallSession::new(Box::new(transport), rates);

        info!(call_id = %session.id(), agent = %config.agent_name, "starting call");

        // The connect handshake is async; the actor waits for it before
        // processing further messages, so mic frames cannot race the open.
        let fut = async move {
            let result = session.connect(config, microphone_granted).await;
            (session, result)
        };
        ctx.wait(fut.into_actor(self).map(|(session, result), act, ctx| {
            act.session = Some(session);
            match result {
                Ok(events) => {
                    act.app_state.increment_active_calls();
                    act.counted_active = true;
                    ctx.add_stream(UnboundedReceiverStream::new(events));
                    act.send(
                        ctx,
                        &ServerMessage::Status {
                            status: "connecting".to_string(),
                            message: None,
                        },
                    );
                }
                Err(e) => {
                    act.send_error(ctx, "connect_failed", &e.to_string());
                    act.send(
                        ctx,
                        &ServerMessage::Status {
                            status: act
                                .session
                                .as_ref()
                                .map(|s| s.state().as_str().to_string())
                                .unwrap_or_else(|| "idle".to_string()),
                            message: None,
                        },
                    );
                }
            }
        }));
    }

    fn handle_end_call(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(mut session) = self.session.take() else {
            self.send_error(ctx, "no_call", "no call to end");
            return;
        };

        let fut = async move {
            let transcription = session.disconnect().await;
            (session, transcription)
        };
        ctx.wait(
            fut.into_actor(self)
                .map(|(session, transcription), act, ctx| {
                    act.session = Some(session);
                    act.release_active_slot();
                    act.send(ctx, &ServerMessage::CallEnded { transcription });
                    act.send(
                        ctx,
                        &ServerMessage::Status {
                            status: "idle".to_string(),
                            message: None,
                        },
                    );
                }),
        );
    }

    fn handle_mic_frame(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        let Some(samples) = decode_f32le(data) else {
            self.send_error(
                ctx,
                "audio_error",
                "binary frames must be little-endian f32 samples",
            );
            return;
        };

        if let Some(session) = &mut self.session {
            session.push_mic_samples(&samples);
        }
    }

    fn handle_visualization(&mut self, bins: Option<usize>, ctx: &mut ws::WebsocketContext<Self>) {
        let bin_count = bins.unwrap_or(DEFAULT_VISUALIZATION_BINS);
        let bins = match &mut self.session {
            Some(session) => session.frequency_bins(bin_count),
            None => Vec::new(),
        };
        self.send(ctx, &ServerMessage::Visualization { bins });
    }

    fn dispatch_update(&mut self, update: CallUpdate, ctx: &mut ws::WebsocketContext<Self>) {
        match update {
            CallUpdate::Activated => {
                self.send(
                    ctx,
                    &ServerMessage::Status {
                        status: "active".to_string(),
                        message: None,
                    },
                );
            }
            CallUpdate::Playback { placement, frame } => {
                self.send(
                    ctx,
                    &ServerMessage::Playback {
                        source_id: placement.source_id,
                        start_time: placement.start_time,
                        duration: placement.duration,
                        mime_type: frame.mime_type,
                        data: frame.data,
                    },
                );
            }
            CallUpdate::TranscriptUpdated { entries } => {
                self.send(ctx, &ServerMessage::Transcript { entries });
            }
            CallUpdate::Interrupted { dropped_sources } => {
                self.send(ctx, &ServerMessage::Interrupted { dropped_sources });
            }
            CallUpdate::Failed { message } => {
                self.release_active_slot();
                self.send_error(ctx, "call_error", &message);
                self.send(
                    ctx,
                    &ServerMessage::Status {
                        status: "error".to_string(),
                        message: Some(message),
                    },
                );
            }
            CallUpdate::None => {}
        }
    }
}

impl Actor for CallWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("call websocket connected");

        ctx.run_interval(Duration::from_secs(30), |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > Duration::from_secs(60) {
                warn!("call websocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                let ping = ServerMessage::Ping {
                    timestamp: chrono::Utc::now().timestamp_millis() as u64,
                };
                act.send(ctx, &ping);
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("call websocket disconnected");
        self.release_active_slot();

        // Teardown runs off-actor; the session is gone from this connection
        // either way.
        if let Some(mut session) = self.session.take() {
            tokio::spawn(async move {
                session.disconnect().await;
            });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for CallWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::StartCall {
                    config,
                    microphone_granted,
                }) => self.handle_start_call(config, microphone_granted, ctx),
                Ok(ClientMessage::EndCall) => self.handle_end_call(ctx),
                Ok(ClientMessage::Visualization { bins }) => self.handle_visualization(bins, ctx),
                Ok(ClientMessage::Pong { .. }) => {
                    self.last_heartbeat = Instant::now();
                }
                Err(e) => {
                    self.send_error(ctx, "invalid_json", &format!("invalid message: {}", e));
                }
            },
            Ok(ws::Message::Binary(data)) => {
                self.handle_mic_frame(&data, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("call websocket closed: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!("websocket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}

/// Inbound transport events, pumped through the session state machine.
impl StreamHandler<TransportEvent> for CallWebSocket {
    fn handle(&mut self, event: TransportEvent, ctx: &mut Self::Context) {
        if let Some(session) = &mut self.session {
            let update = session.handle_event(event);
            self.dispatch_update(update, ctx);
        } else {
            debug!("transport event with no session, dropping");
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // The transport stream ending is part of normal teardown; the
        // connection itself stays open for the next call.
        debug!("transport event stream finished");
    }
}

/// Parse a binary microphone frame of little-endian f32 samples.
fn decode_f32le(data: &[u8]) -> Option<Vec<f32>> {
    if data.is_empty() || data.len() % 4 != 0 {
        return None;
    }

    let mut cursor = std::io::Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 4);
    while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
        samples.push(sample);
    }
    Some(samples)
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a [`CallWebSocket`] actor.
pub async fn call_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "new call websocket request from: {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(CallWebSocket::new(app_state), &req, stream)
}
