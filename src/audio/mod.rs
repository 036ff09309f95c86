//! # Audio Pipeline Module
//!
//! The realtime audio path for one simulated call.
//!
//! ## Key Components:
//! - **PCM Codec**: float ↔ base64-framed 16-bit PCM wire conversion
//! - **Capture Pipeline**: fixed-block mic delivery into the transport
//! - **Playback Scheduler**: gap-free sequential output scheduling with
//!   interruption flush and visualization data
//!
//! ## Audio Format:
//! - **Capture**: mono float samples at the input rate (16kHz default),
//!   encoded to 16-bit little-endian PCM on the wire
//! - **Playback**: mono 16-bit PCM from the streaming model at the output
//!   rate (24kHz default), decoded back to floats for scheduling

pub mod capture;   // Fixed-block capture delivery
pub mod pcm;       // PCM wire codec
pub mod playback;  // Sequential playback scheduling
