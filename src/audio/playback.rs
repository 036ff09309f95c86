//! # Playback Scheduler
//!
//! Queues decoded output-audio chunks for gap-free sequential playback,
//! tracks which sources are live for visualization, and supports the hard
//! flush that fires when the customer voice gets talked over.
//!
//! ## Scheduling Invariant:
//! Each chunk starts at `max(next_start_time, now)` and advances the cursor
//! by its own duration, so chunks play back strictly in arrival order with
//! no overlap and no gap regardless of decode latency jitter.
//!
//! ## Interruption:
//! `interrupt()` force-drops every pending or playing source and resets the
//! cursor to zero. Applying it with nothing scheduled is a no-op.

use std::collections::BTreeMap;
use std::time::Instant;

/// Playback clock abstraction.
///
/// The scheduler only ever asks "what time is it on the playback timeline";
/// injecting the clock keeps the scheduling math testable without sleeping.
/// `Send` because the owning session may finish teardown on another thread.
pub trait PlaybackClock: Send {
    /// Seconds since the playback timeline began.
    fn now(&self) -> f64;
}

/// Wall clock anchored at construction time.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A chunk that has been placed on the playback timeline.
#[derive(Debug, Clone)]
pub struct ScheduledSource {
    pub id: u64,
    /// Start position on the playback timeline, seconds.
    pub start_time: f64,
    /// Chunk duration, seconds.
    pub duration: f64,
    samples: Vec<f32>,
    sample_rate: u32,
}

impl ScheduledSource {
    fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Placement handed back to the caller when a chunk is scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub source_id: u64,
    pub start_time: f64,
    pub duration: f64,
}

/// Sequential playback scheduler over an injected clock.
pub struct PlaybackScheduler {
    clock: Box<dyn PlaybackClock>,
    /// Monotonic cursor into the playback timeline.
    next_start_time: f64,
    /// All currently scheduled (pending or playing) sources, in schedule order.
    active: BTreeMap<u64, ScheduledSource>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(clock: Box<dyn PlaybackClock>) -> Self {
        Self {
            clock,
            next_start_time: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Place a decoded chunk on the timeline.
    ///
    /// ## Returns:
    /// The assigned source id, start time, and duration, so the caller can
    /// forward the placement to whatever is rendering the audio.
    pub fn schedule(&mut self, samples: Vec<f32>, sample_rate: u32) -> Placement {
        let now = self.clock.now();
        let start_time = self.next_start_time.max(now);
        let duration = samples.len() as f64 / sample_rate as f64;

        let id = self.next_id;
        self.next_id += 1;

        self.active.insert(
            id,
            ScheduledSource {
                id,
                start_time,
                duration,
                samples,
                sample_rate,
            },
        );
        self.next_start_time = start_time + duration;

        Placement {
            source_id: id,
            start_time,
            duration,
        }
    }

    /// Force-stop every pending and playing source and reset the cursor.
    ///
    /// ## Returns:
    /// The ids of the sources that were dropped, so the renderer can be told
    /// to cut them off. Idempotent: an empty scheduler stays empty.
    pub fn interrupt(&mut self) -> Vec<u64> {
        let dropped: Vec<u64> = self.active.keys().copied().collect();
        self.active.clear();
        self.next_start_time = 0.0;
        dropped
    }

    /// Drop sources whose playback window has fully elapsed.
    ///
    /// Called on every animation tick; finished sources stop contributing
    /// frequency data the moment they leave the set.
    pub fn prune_finished(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.active.len();
        self.active.retain(|_, source| source.end_time() > now);
        before - self.active.len()
    }

    /// Number of sources still scheduled or playing.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Current cursor position (next chunk start), seconds.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Frequency-bin amplitude data for the source playing right now.
    ///
    /// ## Process:
    /// Takes the most recent window of samples at the playhead and folds it
    /// into `bin_count` magnitude bins via a direct DFT. Cheap at
    /// visualization sizes (a few hundred samples, 16-32 bins).
    ///
    /// ## Returns:
    /// An empty vector when no source is under the playhead — emission stops
    /// the instant a source leaves the active set.
    pub fn frequency_bins(&self, bin_count: usize) -> Vec<f32> {
        let now = self.clock.now();
        let playing = self
            .active
            .values()
            .find(|s| s.start_time <= now && now < s.end_time());

        let source = match playing {
            Some(source) => source,
            None => return Vec::new(),
        };

        let playhead = ((now - source.start_time) * source.sample_rate as f64) as usize;
        let playhead = playhead.min(source.samples.len());
        let window_len = 512.min(source.samples.len());
        let window_start = playhead.saturating_sub(window_len);
        let window = &source.samples[window_start..window_start + window_len];

        magnitude_bins(window, bin_count)
    }
}

/// Fold a sample window into `bin_count` DFT magnitude bins, normalized to [0, 1].
fn magnitude_bins(window: &[f32], bin_count: usize) -> Vec<f32> {
    if window.is_empty() || bin_count == 0 {
        return vec![0.0; bin_count];
    }

    let n = window.len() as f32;
    (0..bin_count)
        .map(|bin| {
            // Spread bins across the lower half of the spectrum, skipping DC.
            let k = (bin + 1) as f32 * (window.len() as f32 / 2.0) / (bin_count + 1) as f32;
            let mut re = 0.0f32;
            let mut im = 0.0f32;
            for (i, &sample) in window.iter().enumerate() {
                let angle = -2.0 * std::f32::consts::PI * k * i as f32 / n;
                re += sample * angle.cos();
                im += sample * angle.sin();
            }
            ((re * re + im * im).sqrt() * 2.0 / n).min(1.0)
        })
        .collect()
}
