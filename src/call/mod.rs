//! # Call Module
//!
//! One simulated call from connect to disconnect.
//!
//! ## Key Components:
//! - **Session**: the lifecycle state machine aggregating capture, playback,
//!   and transcript handling
//! - **Events**: the single inbound event vocabulary of the streaming
//!   transport
//! - **Transcript**: per-speaker partial buffers merged into ordered entries
//!   at turn boundaries

pub mod events;      // Inbound transport event enum
pub mod session;     // Call lifecycle state machine
pub mod transcript;  // Turn-structured transcript accumulation
