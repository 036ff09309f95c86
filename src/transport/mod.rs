//! # Streaming Transport
//!
//! The remote speech service consumed by a call session, reduced to the one
//! contract the core cares about: open with a system prompt, feed it audio
//! frames, receive the event vocabulary of `call::events` back.
//!
//! ## Implementations:
//! - [`live::LiveTransport`]: WebSocket client against the real provider
//! - [`ChannelTransport`]: in-process loopback for tests and local drills

pub mod live;

pub use live::LiveTransport;

use crate::audio::pcm::WireFrame;
use crate::call::events::TransportEvent;
use crate::error::AppResult;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A bidirectional streaming session with the remote speech service.
///
/// `open` hands the transport ownership of the outbound frame stream (the
/// capture pipeline's sink) and returns the inbound event stream. The
/// transport forwards frames as they arrive and never pushes back on the
/// capture path.
#[async_trait]
pub trait StreamingTransport: Send {
    /// Open the session.
    ///
    /// ## Parameters:
    /// - `system_prompt`: persona/scenario instructions for the model
    /// - `outbound`: encoded capture frames to forward upstream
    ///
    /// ## Returns:
    /// The inbound event stream. An `Opened` event on that stream is the
    /// acknowledgment that streaming may begin.
    async fn open(
        &mut self,
        system_prompt: &str,
        outbound: mpsc::UnboundedReceiver<WireFrame>,
    ) -> AppResult<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Close the session. Must be safe to call when the session never opened
    /// or already closed.
    async fn close(&mut self);
}

/// In-process transport backed by channels.
///
/// The paired [`TransportHarness`] injects inbound events and observes
/// outbound frames; used by session tests and offline drills.
pub struct ChannelTransport {
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    outbound_slot: Arc<Mutex<Option<mpsc::UnboundedReceiver<WireFrame>>>>,
    closed: Arc<Mutex<bool>>,
}

/// Test-side handle for a [`ChannelTransport`].
pub struct TransportHarness {
    /// Inject inbound events (transcripts, audio, interruptions...).
    pub events: mpsc::UnboundedSender<TransportEvent>,
    outbound_slot: Arc<Mutex<Option<mpsc::UnboundedReceiver<WireFrame>>>>,
    closed: Arc<Mutex<bool>>,
}

impl ChannelTransport {
    pub fn new() -> (Self, TransportHarness) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let outbound_slot = Arc::new(Mutex::new(None));
        let closed = Arc::new(Mutex::new(false));

        let harness = TransportHarness {
            events: event_tx.clone(),
            outbound_slot: outbound_slot.clone(),
            closed: closed.clone(),
        };

        (
            Self {
                event_tx,
                event_rx: Some(event_rx),
                outbound_slot,
                closed,
            },
            harness,
        )
    }
}

#[async_trait]
impl StreamingTransport for ChannelTransport {
    async fn open(
        &mut self,
        _system_prompt: &str,
        outbound: mpsc::UnboundedReceiver<WireFrame>,
    ) -> AppResult<mpsc::UnboundedReceiver<TransportEvent>> {
        *self.outbound_slot.lock().unwrap() = Some(outbound);

        // Loopback acknowledges immediately.
        let _ = self.event_tx.send(TransportEvent::Opened);

        self.event_rx
            .take()
            .ok_or_else(|| crate::error::AppError::Transport("transport already opened".to_string()))
    }

    async fn close(&mut self) {
        *self.closed.lock().unwrap() = true;
    }
}

impl TransportHarness {
    /// Take the outbound frame stream the session wired up at open time.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<WireFrame>> {
        self.outbound_slot.lock().unwrap().take()
    }

    /// Whether the session has closed the transport.
    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}
