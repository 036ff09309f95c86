//! # PCM Wire Codec
//!
//! Converts between floating-point audio samples and the base64-framed 16-bit
//! PCM wire format the streaming model speaks, in both directions.
//!
//! ## Wire Format:
//! - **Samples**: 16-bit signed integers, little-endian
//! - **Framing**: base64 payload plus an `audio/pcm;rate=N` mime tag
//! - **Channels**: interleaved when more than one channel is present
//!
//! ## Scaling:
//! Encoding scales negative samples by 0x8000 and non-negative samples by
//! 0x7FFF. The asymmetry is intentional: it matches the numerics the rest of
//! the pipeline was calibrated against, and round-trips stay within one
//! 16-bit quantization step either way. Decoding divides by 32768.

use crate::error::{AppError, AppResult};
use base64::{engine::general_purpose, Engine as _};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// One encoded audio frame ready for the streaming transport.
///
/// ## Fields:
/// - `mime_type`: declares the payload format and sample rate, e.g.
///   `audio/pcm;rate=16000`
/// - `data`: base64-encoded little-endian 16-bit PCM samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    pub mime_type: String,
    pub data: String,
}

impl WireFrame {
    /// Number of mono samples carried by this frame, without decoding the payload.
    ///
    /// Base64 expands 3 bytes to 4 characters; each sample is 2 bytes.
    pub fn sample_count_hint(&self) -> usize {
        let padding = self.data.bytes().rev().take_while(|&b| b == b'=').count();
        ((self.data.len() / 4) * 3).saturating_sub(padding) / 2
    }
}

/// Encode float samples into a wire frame.
///
/// ## Process:
/// 1. Clamp each sample to [-1.0, 1.0]
/// 2. Scale to the signed 16-bit range (0x8000 negative / 0x7FFF non-negative)
/// 3. Pack little-endian and base64-encode
///
/// Pure and stateless; never fails.
pub fn encode(samples: &[f32], sample_rate: u32) -> WireFrame {
    let mut bytes = vec![0u8; samples.len() * 2];

    for (i, &sample) in samples.iter().enumerate() {
        let clamped = sample.clamp(-1.0, 1.0);
        let scaled = if clamped < 0.0 {
            clamped * 0x8000 as f32
        } else {
            clamped * 0x7FFF as f32
        };
        // Round to the nearest step; truncation would cost positive samples
        // up to a full extra step on the round trip.
        LittleEndian::write_i16(&mut bytes[i * 2..i * 2 + 2], scaled.round() as i16);
    }

    WireFrame {
        mime_type: format!("audio/pcm;rate={}", sample_rate),
        data: general_purpose::STANDARD.encode(&bytes),
    }
}

/// Decode a base64 PCM payload into per-channel float buffers.
///
/// ## Parameters:
/// - `data`: base64-encoded little-endian 16-bit PCM
/// - `channels`: number of interleaved channels (1 for everything this
///   pipeline currently does)
///
/// ## Returns:
/// One `Vec<f32>` per channel, samples rescaled by 1/32768.
///
/// ## Errors:
/// `AppError::Decode` for malformed base64, truncated buffers (odd byte
/// count), a zero channel count, or a byte count that does not divide evenly
/// across channels. Callers drop the offending chunk and continue.
pub fn decode(data: &str, channels: usize) -> AppResult<Vec<Vec<f32>>> {
    if channels == 0 {
        return Err(AppError::Decode("channel count must be at least 1".to_string()));
    }

    let bytes = general_purpose::STANDARD
        .decode(data)
        .map_err(|e| AppError::Decode(format!("invalid base64 payload: {}", e)))?;

    if bytes.len() % 2 != 0 {
        return Err(AppError::Decode(format!(
            "truncated PCM buffer: {} bytes is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }

    let total_samples = bytes.len() / 2;
    if total_samples % channels != 0 {
        return Err(AppError::Decode(format!(
            "{} samples do not de-interleave into {} channels",
            total_samples, channels
        )));
    }

    let frames = total_samples / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];

    for frame in 0..frames {
        for ch in 0..channels {
            let offset = (frame * channels + ch) * 2;
            let sample = LittleEndian::read_i16(&bytes[offset..offset + 2]);
            out[ch].push(sample as f32 / 32768.0);
        }
    }

    Ok(out)
}

/// Decode a mono payload directly into a single sample buffer.
///
/// Convenience wrapper for the common case; same error behavior as [`decode`].
pub fn decode_mono(data: &str) -> AppResult<Vec<f32>> {
    let mut channels = decode(data, 1)?;
    Ok(channels.remove(0))
}

/// Parse the sample rate out of an `audio/pcm;rate=N` mime tag.
pub fn sample_rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .find_map(|part| part.trim().strip_prefix("rate="))
        .and_then(|rate| rate.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_within_quantization_error() {
        let samples: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.013).sin() * 0.8)
            .collect();

        let frame = encode(&samples, 16000);
        let decoded = decode_mono(&frame.data).unwrap();

        assert_eq!(decoded.len(), samples.len());
        for (original, recovered) in samples.iter().zip(decoded.iter()) {
            let diff = (original - recovered).abs();
            assert!(
                diff <= 1.0 / 32768.0 + f32::EPSILON,
                "round-trip error too large: {} vs {}",
                original,
                recovered
            );
        }
    }

    #[test]
    fn test_encode_clamps_out_of_range_samples() {
        let frame = encode(&[2.5, -3.0], 16000);
        let decoded = decode_mono(&frame.data).unwrap();

        // 2.5 clamps to 1.0 -> 0x7FFF / 32768, -3.0 clamps to -1.0 -> -0x8000 / 32768
        assert!((decoded[0] - (0x7FFF as f32 / 32768.0)).abs() < f32::EPSILON);
        assert!((decoded[1] - (-1.0)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_asymmetric_scaling_is_preserved() {
        // Full scale shows the asymmetry: +1.0 scales by 0x7FFF, -1.0 by 0x8000.
        let frame = encode(&[1.0, -1.0], 16000);
        let decoded = decode_mono(&frame.data).unwrap();

        let positive = (decoded[0] * 32768.0).round() as i32;
        let negative = (decoded[1] * 32768.0).round() as i32;
        assert_eq!(positive, 0x7FFF);
        assert_eq!(negative, -0x8000);
    }

    #[test]
    fn test_positive_samples_round_to_nearest_step() {
        // A value just above a step boundary; truncating instead of rounding
        // would land it a full step low.
        let sample = 0.0933866f32;
        let frame = encode(&[sample], 16000);
        let recovered = decode_mono(&frame.data).unwrap()[0];

        assert!(
            (sample - recovered).abs() <= 0.5 / 32768.0 + f32::EPSILON,
            "nearest-step bound violated: {} vs {}",
            sample,
            recovered
        );
    }

    #[test]
    fn test_mime_tag_declares_sample_rate() {
        let frame = encode(&[0.0; 8], 24000);
        assert_eq!(frame.mime_type, "audio/pcm;rate=24000");
        assert_eq!(sample_rate_from_mime(&frame.mime_type), Some(24000));
        assert_eq!(sample_rate_from_mime("audio/pcm"), None);
    }

    #[test]
    fn test_decode_rejects_malformed_base64() {
        let result = decode_mono("not$valid$base64!!");
        assert!(matches!(result, Err(AppError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_buffer() {
        // Three raw bytes is one and a half samples.
        let data = general_purpose::STANDARD.encode([0u8, 1u8, 2u8]);
        let result = decode_mono(&data);
        assert!(matches!(result, Err(AppError::Decode(_))));
    }

    #[test]
    fn test_decode_deinterleaves_stereo() {
        // Interleaved L/R pairs: L = 8192 (0.25), R = -16384 (-0.5)
        let mut bytes = Vec::new();
        for _ in 0..4 {
            bytes.extend_from_slice(&8192i16.to_le_bytes());
            bytes.extend_from_slice(&(-16384i16).to_le_bytes());
        }
        let data = general_purpose::STANDARD.encode(&bytes);

        let channels = decode(&data, 2).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].len(), 4);
        assert!(channels[0].iter().all(|&s| (s - 0.25).abs() < f32::EPSILON));
        assert!(channels[1].iter().all(|&s| (s + 0.5).abs() < f32::EPSILON));
    }

    #[test]
    fn test_sample_count_hint_matches_payload() {
        let frame = encode(&[0.1; 1000], 16000);
        assert_eq!(frame.sample_count_hint(), 1000);
    }
}
