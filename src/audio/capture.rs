//! # Capture Pipeline
//!
//! Collects microphone samples for the lifetime of a call and forwards them
//! to the streaming transport in fixed-size encoded blocks.
//!
//! ## Delivery Contract:
//! - Blocks are exactly `block_size` samples (4096 by default) and leave in
//!   the order the samples arrived; ordering is a natural consequence of
//!   single-context delivery.
//! - Enqueueing is fire-and-forget over an unbounded channel, so a slow
//!   network never backs up into the capture path.
//! - `stop()` flushes the residual partial block, releases the transport
//!   sender, and is idempotent; samples arriving after stop are dropped.

use crate::audio::pcm::{self, WireFrame};
use tokio::sync::mpsc;
use tracing::debug;

/// Default capture block size in samples.
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Accumulates mic samples into fixed blocks and pushes encoded frames at the
/// transport sender.
pub struct CapturePipeline {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    sink: Option<mpsc::UnboundedSender<WireFrame>>,
    blocks_sent: u64,
}

impl CapturePipeline {
    /// Create a pipeline that encodes at `sample_rate` and delivers into `sink`.
    pub fn new(block_size: usize, sample_rate: u32, sink: mpsc::UnboundedSender<WireFrame>) -> Self {
        Self {
            block_size,
            sample_rate,
            pending: Vec::with_capacity(block_size),
            sink: Some(sink),
            blocks_sent: 0,
        }
    }

    /// Feed raw microphone samples into the pipeline.
    ///
    /// Every completed block is encoded and enqueued immediately. Samples
    /// arriving after `stop()` are dropped.
    pub fn push_samples(&mut self, samples: &[f32]) {
        if self.sink.is_none() {
            debug!("capture pipeline stopped, dropping {} samples", samples.len());
            return;
        }

        self.pending.extend_from_slice(samples);

        while self.pending.len() >= self.block_size {
            let block: Vec<f32> = self.pending.drain(..self.block_size).collect();
            self.deliver(&block);
        }
    }

    /// Stop the pipeline and release the transport sender.
    ///
    /// Flushes any residual partial block first so trailing speech is not
    /// lost. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.sink.is_none() {
            return;
        }

        if !self.pending.is_empty() {
            let residual: Vec<f32> = self.pending.drain(..).collect();
            self.deliver(&residual);
        }

        self.sink = None;
        debug!("capture pipeline stopped after {} blocks", self.blocks_sent);
    }

    /// Whether `stop()` has been called.
    pub fn is_stopped(&self) -> bool {
        self.sink.is_none()
    }

    /// Number of encoded blocks handed to the transport so far.
    pub fn blocks_sent(&self) -> u64 {
        self.blocks_sent
    }

    fn deliver(&mut self, block: &[f32]) {
        let frame = pcm::encode(block, self.sample_rate);
        if let Some(sink) = &self.sink {
            // The receiver disappearing just means the transport closed under
            // us; teardown will follow through the session.
            if sink.send(frame).is_err() {
                debug!("transport sink closed, dropping capture block");
            } else {
                self.blocks_sent += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm;

    fn pipeline_with_sink(block_size: usize) -> (CapturePipeline, mpsc::UnboundedReceiver<WireFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CapturePipeline::new(block_size, 16000, tx), rx)
    }

    #[test]
    fn test_blocks_delivered_in_order_at_fixed_size() {
        let (mut pipeline, mut rx) = pipeline_with_sink(4);

        // 10 samples -> two full blocks, 2 samples left pending.
        let samples: Vec<f32> = (0..10).map(|i| i as f32 / 100.0).collect();
        pipeline.push_samples(&samples);

        let first = pcm::decode_mono(&rx.try_recv().unwrap().data).unwrap();
        let second = pcm::decode_mono(&rx.try_recv().unwrap().data).unwrap();
        assert!(rx.try_recv().is_err());

        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 4);
        // First sample of the second block is sample index 4.
        assert!((second[0] - 0.04).abs() < 1.0 / 32768.0 + f32::EPSILON);
        assert_eq!(pipeline.blocks_sent(), 2);
    }

    #[test]
    fn test_stop_flushes_residual_block() {
        let (mut pipeline, mut rx) = pipeline_with_sink(4096);

        pipeline.push_samples(&[0.5; 100]);
        assert!(rx.try_recv().is_err());

        pipeline.stop();
        let residual = pcm::decode_mono(&rx.try_recv().unwrap().data).unwrap();
        assert_eq!(residual.len(), 100);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut pipeline, _rx) = pipeline_with_sink(4096);

        pipeline.stop();
        pipeline.stop();
        assert!(pipeline.is_stopped());
    }

    #[test]
    fn test_samples_after_stop_are_dropped() {
        let (mut pipeline, mut rx) = pipeline_with_sink(4);

        pipeline.stop();
        pipeline.push_samples(&[0.1; 8]);

        assert!(rx.try_recv().is_err());
        assert_eq!(pipeline.blocks_sent(), 0);
    }

    #[test]
    fn test_frames_carry_configured_sample_rate() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pipeline = CapturePipeline::new(2, 48000, tx);

        pipeline.push_samples(&[0.0, 0.0]);
        assert_eq!(rx.try_recv().unwrap().mime_type, "audio/pcm;rate=48000");
    }
}
