//! # Transport Event Vocabulary
//!
//! Everything the remote streaming service can say to a call session, as one
//! inbound enum. The session state machine consumes these from a single
//! stream rather than scattering handler closures, which keeps the
//! ACTIVE-state routing table exhaustively testable.
//!
//! The provider's wire format is out of scope here; `transport::live` maps
//! its JSON onto this vocabulary.

use crate::audio::pcm::WireFrame;
use actix::Message;

/// An inbound event from the streaming transport.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub enum TransportEvent {
    /// The transport acknowledged the session open; streaming may begin.
    Opened,

    /// Partial transcription of the trainee's microphone audio.
    InputTranscript { text: String },

    /// Partial transcription of the customer model's spoken reply.
    OutputTranscript { text: String },

    /// The current turn finished; accumulated partials become entries.
    TurnComplete,

    /// Inline audio from the customer model.
    Audio { frame: WireFrame },

    /// The customer was talked over; pending playback must be flushed.
    Interrupted,

    /// The transport closed. `reason` is provider text when available.
    Closed { reason: Option<String> },

    /// A transport-level failure.
    Error { message: String },
}
