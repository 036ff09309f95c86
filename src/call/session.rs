//! # Call Session State Machine
//!
//! Owns the lifecycle of one simulated call — connect, stream, interruption
//! handling, disconnect — and aggregates the capture pipeline, playback
//! scheduler, and transcript accumulator behind one explicit state machine.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: no call; the only state `connect` accepts
//! 2. **Connecting**: microphone granted, transport opening
//! 3. **Active**: transport acknowledged; audio and text events routed
//! 4. **Disconnecting**: teardown in progress
//! 5. **Error**: transport failure or denied microphone; a fresh `connect`
//!    requires an explicit `disconnect` back to Idle first — no retry loop
//!
//! ## Event Routing (Active only):
//! Inbound audio → playback scheduler; partial transcripts and turn
//! boundaries → transcript accumulator; an interruption flushes playback and
//! leaves the transcript untouched. Events arriving outside Active are
//! dropped, which is what makes teardown safe against stragglers.

use crate::audio::capture::CapturePipeline;
use crate::audio::pcm::{self, WireFrame};
use crate::audio::playback::{MonotonicClock, Placement, PlaybackScheduler};
use crate::call::events::TransportEvent;
use crate::call::transcript::{Speaker, TranscriptAccumulator, TranscriptEntry};
use crate::error::{AppError, AppResult};
use crate::simulation::SimulationConfig;
use crate::transport::StreamingTransport;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Current state of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Connecting,
    Active,
    Disconnecting,
    Error,
}

impl CallState {
    /// Status string used in messages to the host UI.
    pub fn as_str(&self) -> &str {
        match self {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Active => "active",
            CallState::Disconnecting => "disconnecting",
            CallState::Error => "error",
        }
    }
}

/// What an inbound transport event produced, for the host to act on.
///
/// This is the session's outward face: the hosting context (the WebSocket
/// actor) forwards these to the UI instead of wiring its own handler
/// closures into the internals.
#[derive(Debug)]
pub enum CallUpdate {
    /// The transport acknowledged the open; the call is now live.
    Activated,
    /// A customer-audio chunk was placed on the playback timeline.
    Playback {
        placement: Placement,
        frame: WireFrame,
    },
    /// A turn boundary committed new transcript entries.
    TranscriptUpdated { entries: Vec<TranscriptEntry> },
    /// The customer was talked over; these sources must stop rendering.
    Interrupted { dropped_sources: Vec<u64> },
    /// Transport failed or closed unexpectedly; the session is in Error and
    /// the host must surface it and re-initiate explicitly.
    Failed { message: String },
    /// Nothing for the host to do.
    None,
}

/// Audio rates the session encodes/decodes at.
#[derive(Debug, Clone, Copy)]
pub struct AudioRates {
    /// Capture (microphone) sample rate.
    pub input: u32,
    /// Playback rate assumed when an inbound frame's mime tag omits one.
    pub output: u32,
    /// Capture block size in samples.
    pub block_size: usize,
}

/// One simulated call from connect to disconnect.
pub struct CallSession {
    id: Uuid,
    state: CallState,
    rates: AudioRates,
    transport: Box<dyn StreamingTransport>,
    config: Option<SimulationConfig>,
    capture: Option<CapturePipeline>,
    playback: PlaybackScheduler,
    transcript: TranscriptAccumulator,
    /// Transcript as finalized by the last disconnect.
    final_transcript: Vec<TranscriptEntry>,
}

impl CallSession {
    pub fn new(transport: Box<dyn StreamingTransport>, rates: AudioRates) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: CallState::Idle,
            rates,
            transport,
            config: None,
            capture: None,
            playback: PlaybackScheduler::new(Box::new(MonotonicClock::new())),
            transcript: TranscriptAccumulator::new(),
            final_transcript: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Open the call.
    ///
    /// ## State Transition:
    /// Idle → Connecting. The Active transition happens when the transport's
    /// `Opened` acknowledgment comes back through [`handle_event`].
    ///
    /// ## Parameters:
    /// - `config`: immutable per-session simulation setup
    /// - `microphone_granted`: the browser's `getUserMedia` outcome; denial
    ///   is fatal to connect and lands the session in Error
    ///
    /// ## Returns:
    /// The transport's inbound event stream for the host to pump into
    /// [`handle_event`].
    ///
    /// ## Errors:
    /// - `AppError::BadRequest` if a call is already in progress (the device
    ///   and audio contexts are exclusively owned by one active session)
    /// - `AppError::Permission` if the microphone was denied
    /// - `AppError::Transport` if the transport open fails
    pub async fn connect(
        &mut self,
        config: SimulationConfig,
        microphone_granted: bool,
    ) -> AppResult<mpsc::UnboundedReceiver<TransportEvent>> {
        if self.state != CallState::Idle {
            return Err(AppError::BadRequest(format!(
                "cannot connect while call is {}",
                self.state.as_str()
            )));
        }

        self.state = CallState::Connecting;
        self.transcript.reset();
        self.final_transcript.clear();

        if !microphone_granted {
            self.state = CallState::Error;
            return Err(AppError::Permission(
                "microphone access was denied".to_string(),
            ));
        }

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        self.capture = Some(CapturePipeline::new(
            self.rates.block_size,
            self.rates.input,
            frame_tx,
        ));

        let system_prompt = config.system_prompt();
        let events = match self.transport.open(&system_prompt, frame_rx).await {
            Ok(events) => events,
            Err(e) => {
                self.state = CallState::Error;
                if let Some(capture) = &mut self.capture {
                    capture.stop();
                }
                return Err(e);
            }
        };

        info!(call_id = %self.id, agent = %config.agent_name, "call connecting");
        self.config = Some(config);
        Ok(events)
    }

    /// Feed microphone samples into the capture pipeline.
    ///
    /// Only routed while the call is Active; anything else is dropped.
    pub fn push_mic_samples(&mut self, samples: &[f32]) {
        if self.state != CallState::Active {
            debug!(call_id = %self.id, "dropping mic samples outside active state");
            return;
        }
        if let Some(capture) = &mut self.capture {
            capture.push_samples(samples);
        }
    }

    /// Route one inbound transport event.
    ///
    /// The full Active-state transition table lives here; see the module
    /// docs. Late events after disconnect come through as no-ops.
    pub fn handle_event(&mut self, event: TransportEvent) -> CallUpdate {
        match self.state {
            CallState::Idle | CallState::Disconnecting => {
                debug!(call_id = %self.id, "dropping late transport event");
                return CallUpdate::None;
            }
            CallState::Error => {
                // Already failed; stragglers carry no new information.
                return CallUpdate::None;
            }
            CallState::Connecting => {
                return match event {
                    TransportEvent::Opened => {
                        self.state = CallState::Active;
                        info!(call_id = %self.id, "call active");
                        CallUpdate::Activated
                    }
                    TransportEvent::Closed { reason } => self.fail(format!(
                        "transport closed during connect: {}",
                        reason.unwrap_or_else(|| "no reason given".to_string())
                    )),
                    TransportEvent::Error { message } => self.fail(message),
                    other => {
                        debug!(call_id = %self.id, ?other, "event before open acknowledgment");
                        CallUpdate::None
                    }
                };
            }
            CallState::Active => {}
        }

        match event {
            TransportEvent::Opened => CallUpdate::None,
            TransportEvent::Audio { frame } => self.schedule_audio(frame),
            TransportEvent::InputTranscript { text } => {
                self.transcript.push_partial(Speaker::Agent, &text);
                CallUpdate::None
            }
            TransportEvent::OutputTranscript { text } => {
                self.transcript.push_partial(Speaker::Customer, &text);
                CallUpdate::None
            }
            TransportEvent::TurnComplete => {
                let entries = self.transcript.complete_turn();
                if entries.is_empty() {
                    CallUpdate::None
                } else {
                    CallUpdate::TranscriptUpdated { entries }
                }
            }
            TransportEvent::Interrupted => {
                let dropped_sources = self.playback.interrupt();
                debug!(call_id = %self.id, dropped = dropped_sources.len(), "playback interrupted");
                CallUpdate::Interrupted { dropped_sources }
            }
            TransportEvent::Closed { reason } => self.fail(format!(
                "transport closed unexpectedly: {}",
                reason.unwrap_or_else(|| "no reason given".to_string())
            )),
            TransportEvent::Error { message } => self.fail(message),
        }
    }

    /// End the call and release everything.
    ///
    /// Safe to call from any state, any number of times, including when
    /// sub-resources were never initialized: the transcript flushes, the
    /// capture pipeline and playback sources stop, the transport closes, and
    /// the session returns to Idle.
    ///
    /// ## Returns:
    /// The finalized transcript. Repeat calls return the same transcript.
    pub async fn disconnect(&mut self) -> Vec<TranscriptEntry> {
        if self.state == CallState::Idle {
            return self.final_transcript.clone();
        }

        self.state = CallState::Disconnecting;

        if self.transcript.has_pending() {
            debug!(call_id = %self.id, "flushing mid-turn transcript at teardown");
        }
        self.transcript.flush();
        self.final_transcript = self.transcript.entries().to_vec();

        if let Some(capture) = &mut self.capture {
            capture.stop();
        }
        self.capture = None;
        self.playback.interrupt();
        self.transport.close().await;

        self.state = CallState::Idle;
        info!(call_id = %self.id, entries = self.final_transcript.len(), "call disconnected");
        self.final_transcript.clone()
    }

    /// Finalized transcript of the last completed call.
    pub fn final_transcript(&self) -> &[TranscriptEntry] {
        &self.final_transcript
    }

    /// The configuration this session was connected with.
    pub fn config(&self) -> Option<&SimulationConfig> {
        self.config.as_ref()
    }

    /// Visualization data for whatever the customer is saying right now.
    pub fn frequency_bins(&mut self, bin_count: usize) -> Vec<f32> {
        self.playback.prune_finished();
        self.playback.frequency_bins(bin_count)
    }

    fn schedule_audio(&mut self, frame: WireFrame) -> CallUpdate {
        let sample_rate =
            pcm::sample_rate_from_mime(&frame.mime_type).unwrap_or(self.rates.output);

        // A malformed chunk is dropped; playback continues with the next one.
        let samples = match pcm::decode_mono(&frame.data) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(call_id = %self.id, "dropping undecodable audio chunk: {}", e);
                return CallUpdate::None;
            }
        };

        self.playback.prune_finished();
        let placement = self.playback.schedule(samples, sample_rate);
        CallUpdate::Playback { placement, frame }
    }

    fn fail(&mut self, message: String) -> CallUpdate {
        warn!(call_id = %self.id, "call failed: {}", message);
        self.state = CallState::Error;
        if let Some(capture) = &mut self.capture {
            capture.stop();
        }
        CallUpdate::Failed { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm;
    use crate::eval::rubric::Rubric;
    use crate::simulation::Difficulty;
    use crate::transport::{ChannelTransport, TransportHarness};

    fn rates() -> AudioRates {
        AudioRates {
            input: 16000,
            output: 24000,
            block_size: 4,
        }
    }

    fn simulation_config() -> SimulationConfig {
        SimulationConfig {
            agent_name: "Dana".to_string(),
            scenario: "Billing dispute".to_string(),
            language: "English".to_string(),
            difficulty: Difficulty::Easy,
            rubric: Rubric::Freeform("be nice".to_string()),
            persona_context: None,
        }
    }

    async fn active_session() -> (CallSession, TransportHarness) {
        let (transport, harness) = ChannelTransport::new();
        let mut session = CallSession::new(Box::new(transport), rates());
        let mut events = session
            .connect(simulation_config(), true)
            .await
            .unwrap();

        // ChannelTransport acknowledges immediately.
        let opened = events.recv().await.unwrap();
        assert!(matches!(
            session.handle_event(opened),
            CallUpdate::Activated
        ));
        (session, harness)
    }

    #[test]
    fn test_session_moves_to_a_worker_thread() {
        // Teardown of an abandoned connection runs under tokio::spawn, so the
        // whole session (transport, scheduler, clock) must cross threads.
        fn require_send<T: Send>(_: &T) {}

        let (transport, _harness) = ChannelTransport::new();
        let session = CallSession::new(Box::new(transport), rates());
        require_send(&session);
    }

    #[tokio::test]
    async fn test_denied_microphone_fails_connect() {
        let (transport, _harness) = ChannelTransport::new();
        let mut session = CallSession::new(Box::new(transport), rates());

        let result = session.connect(simulation_config(), false).await;
        assert!(matches!(result, Err(AppError::Permission(_))));
        assert_eq!(session.state(), CallState::Error);
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected_while_active() {
        let (mut session, _harness) = active_session().await;

        let result = session.connect(simulation_config(), true).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(session.state(), CallState::Active);
    }

    #[tokio::test]
    async fn test_mic_samples_reach_transport_as_encoded_blocks() {
        let (mut session, harness) = active_session().await;
        let mut outbound = harness.take_outbound().unwrap();

        session.push_mic_samples(&[0.25; 8]); // two 4-sample blocks

        let first = outbound.try_recv().unwrap();
        let second = outbound.try_recv().unwrap();
        assert!(outbound.try_recv().is_err());
        assert_eq!(first.mime_type, "audio/pcm;rate=16000");
        assert_eq!(pcm::decode_mono(&second.data).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_audio_events_schedule_gap_free_playback() {
        let (mut session, _harness) = active_session().await;

        let frame = pcm::encode(&vec![0.5; 2400], 24000); // 0.1s at 24kHz
        let first = session.handle_event(TransportEvent::Audio { frame: frame.clone() });
        let second = session.handle_event(TransportEvent::Audio { frame });

        let (p1, p2) = match (first, second) {
            (
                CallUpdate::Playback { placement: p1, .. },
                CallUpdate::Playback { placement: p2, .. },
            ) => (p1, p2),
            other => panic!("expected playback updates, got {:?}", other),
        };
        assert!((p2.start_time - (p1.start_time + p1.duration)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_malformed_audio_chunk_is_dropped_not_fatal() {
        let (mut session, _harness) = active_session().await;

        let bad = WireFrame {
            mime_type: "audio/pcm;rate=24000".to_string(),
            data: "!!!not-base64!!!".to_string(),
        };
        assert!(matches!(
            session.handle_event(TransportEvent::Audio { frame: bad }),
            CallUpdate::None
        ));
        assert_eq!(session.state(), CallState::Active);

        // Subsequent chunks still play.
        let good = pcm::encode(&[0.5; 240], 24000);
        assert!(matches!(
            session.handle_event(TransportEvent::Audio { frame: good }),
            CallUpdate::Playback { .. }
        ));
    }

    #[tokio::test]
    async fn test_interruption_flushes_playback_but_not_transcript() {
        let (mut session, _harness) = active_session().await;

        session.handle_event(TransportEvent::OutputTranscript {
            text: "Let me expl".to_string(),
        });
        let frame = pcm::encode(&vec![0.5; 24000], 24000);
        session.handle_event(TransportEvent::Audio { frame });

        let update = session.handle_event(TransportEvent::Interrupted);
        match update {
            CallUpdate::Interrupted { dropped_sources } => {
                assert_eq!(dropped_sources.len(), 1)
            }
            other => panic!("expected interruption, got {:?}", other),
        }

        // The open customer turn survived the flush.
        let entries = session.handle_event(TransportEvent::TurnComplete);
        assert!(matches!(entries, CallUpdate::TranscriptUpdated { .. }));
    }

    #[tokio::test]
    async fn test_transcript_orders_by_turn_completion() {
        let (mut session, _harness) = active_session().await;

        session.handle_event(TransportEvent::InputTranscript {
            text: "Hello, how can I help?".to_string(),
        });
        session.handle_event(TransportEvent::OutputTranscript {
            text: "My router is broken.".to_string(),
        });
        session.handle_event(TransportEvent::TurnComplete);
        session.handle_event(TransportEvent::OutputTranscript {
            text: "Also my bill is wrong.".to_string(),
        });
        session.handle_event(TransportEvent::TurnComplete);

        let transcript = session.disconnect().await;
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[0].speaker, Speaker::Agent);
        assert_eq!(transcript[1].speaker, Speaker::Customer);
        assert_eq!(transcript[2].speaker, Speaker::Customer);
    }

    #[tokio::test]
    async fn test_disconnect_flushes_pending_turn() {
        let (mut session, harness) = active_session().await;

        session.handle_event(TransportEvent::OutputTranscript {
            text: "One more thi".to_string(),
        });

        let transcript = session.disconnect().await;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].text, "One more thi");
        assert!(harness.is_closed());
        assert_eq!(session.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (mut session, _harness) = active_session().await;

        session.handle_event(TransportEvent::InputTranscript {
            text: "Goodbye".to_string(),
        });
        let first = session.disconnect().await;
        let second = session.disconnect().await;

        assert_eq!(first, second);
        assert_eq!(session.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_before_connect_does_not_panic() {
        let (transport, _harness) = ChannelTransport::new();
        let mut session = CallSession::new(Box::new(transport), rates());

        assert!(session.disconnect().await.is_empty());
        assert_eq!(session.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn test_late_events_after_disconnect_are_dropped() {
        let (mut session, _harness) = active_session().await;
        session.disconnect().await;

        let update = session.handle_event(TransportEvent::OutputTranscript {
            text: "straggler".to_string(),
        });
        assert!(matches!(update, CallUpdate::None));
        assert!(session.final_transcript().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_moves_session_to_error() {
        let (mut session, _harness) = active_session().await;

        let update = session.handle_event(TransportEvent::Error {
            message: "stream reset".to_string(),
        });
        assert!(matches!(update, CallUpdate::Failed { .. }));
        assert_eq!(session.state(), CallState::Error);

        // Recovery path: explicit disconnect back to Idle, then reconnect.
        session.disconnect().await;
        assert_eq!(session.state(), CallState::Idle);
    }
}
