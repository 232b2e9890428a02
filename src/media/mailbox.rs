//! Per-client mailbox (SPEC_FULL.md §4.5): a last-writer-wins video slot plus a
//! bounded, drop-oldest audio FIFO. Grounded in the teacher's `cache::GridCache`
//! contract (snapshot-without-holding-the-lock, sequence-numbered last-writer-wins
//! cell writes), generalized here from a 2D cell grid down to a single slot. The
//! video slot uses `arc_swap::ArcSwapOption`, the lock-free atomic-pointer-swap crate
//! the wider ecosystem reaches for instead of hand-rolling `AtomicPtr` + manual
//! `Arc::into_raw`/`from_raw` bookkeeping.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use super::frame::Frame;
use crate::telemetry::metrics;

/// A 20ms (at 48kHz, 960 samples) mono float32 audio chunk (SPEC_FULL.md §3).
pub const SAMPLE_RATE: u32 = 48_000;
pub const SAMPLES_PER_CHUNK: usize = 960;

#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
}

/// ~200ms of buffered audio at the nominal 20ms chunk size (SPEC_FULL.md §4.5, §8).
const MAX_QUEUED_CHUNKS: usize = 10;

/// Per-source mailbox: a last-writer-wins video slot, a bounded drop-oldest audio
/// FIFO, and the three activity clocks SPEC_FULL.md §4.5 names. Writers are the
/// receive loop for this source; readers are every other participant's render loop.
pub struct Mailbox {
    video: ArcSwapOption<Frame>,
    audio: Mutex<VecDeque<AudioChunk>>,
    last_frame_ts_micros: AtomicU64,
    last_audio_ts_micros: AtomicU64,
    last_any_packet_ts_micros: AtomicU64,
    dropped_audio_chunks: AtomicU64,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self {
            video: ArcSwapOption::from(None),
            audio: Mutex::new(VecDeque::with_capacity(MAX_QUEUED_CHUNKS)),
            last_frame_ts_micros: AtomicU64::new(0),
            last_audio_ts_micros: AtomicU64::new(0),
            last_any_packet_ts_micros: AtomicU64::new(0),
            dropped_audio_chunks: AtomicU64::new(0),
        }
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a freshly decoded frame. Out-of-order delivery (an older capture
    /// timestamp arriving after a newer one) is dropped rather than overwriting the
    /// newer frame, preserving the SPEC_FULL.md §8 invariant that the slot always
    /// holds the frame with the greatest capture timestamp observed so far.
    pub fn write_frame(&self, frame: Frame, now_micros: u64) {
        let is_newer = match self.video.load().as_ref() {
            Some(current) => frame.captured_at_micros >= current.captured_at_micros,
            None => true,
        };
        if is_newer {
            self.video.store(Some(Arc::new(frame)));
        }
        self.last_frame_ts_micros.store(now_micros, Ordering::Release);
        self.last_any_packet_ts_micros.store(now_micros, Ordering::Release);
    }

    /// Returns a shared snapshot of the current video frame without ever blocking
    /// the writer (SPEC_FULL.md §4.5, §5).
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.video.load_full()
    }

    /// Pushes a decoded audio chunk, dropping the oldest queued chunk on overflow
    /// and incrementing the process-wide dropped-chunks counter (SPEC_FULL.md §4.5,
    /// §8: "the oldest-drop counter increases iff a producer observed a full queue").
    pub fn push_audio(&self, chunk: AudioChunk, now_micros: u64) {
        let mut queue = self.audio.lock();
        if queue.len() >= MAX_QUEUED_CHUNKS {
            queue.pop_front();
            self.dropped_audio_chunks.fetch_add(1, Ordering::Relaxed);
            metrics::global().dropped_audio_chunks.inc();
        }
        queue.push_back(chunk);
        drop(queue);
        self.last_audio_ts_micros.store(now_micros, Ordering::Release);
        self.last_any_packet_ts_micros.store(now_micros, Ordering::Release);
    }

    /// Drains every currently queued audio chunk for this tick's mix-down.
    pub fn drain_audio(&self) -> Vec<AudioChunk> {
        let mut queue = self.audio.lock();
        queue.drain(..).collect()
    }

    pub fn dropped_audio_chunks(&self) -> u64 {
        self.dropped_audio_chunks.load(Ordering::Relaxed)
    }

    pub fn last_any_packet_ts_micros(&self) -> u64 {
        self.last_any_packet_ts_micros.load(Ordering::Acquire)
    }

    /// Records activity without writing media, for packet kinds (`Ping`,
    /// `RekeyRequest`, ...) that prove the source is alive but carry no frame or
    /// audio of their own.
    pub fn touch(&self, now_micros: u64) {
        self.last_any_packet_ts_micros.store(now_micros, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_slot_is_last_writer_wins() {
        let mailbox = Mailbox::new();
        assert!(mailbox.current_frame().is_none());
        mailbox.write_frame(Frame::new(2, 1, vec![1, 2, 3, 4, 5, 6], 10), 100);
        mailbox.write_frame(Frame::new(2, 1, vec![9, 9, 9, 9, 9, 9], 20), 200);
        let current = mailbox.current_frame().unwrap();
        assert_eq!(current.captured_at_micros, 20);
    }

    #[test]
    fn stale_frame_does_not_overwrite_a_newer_one() {
        let mailbox = Mailbox::new();
        mailbox.write_frame(Frame::new(1, 1, vec![1, 1, 1], 100), 100);
        mailbox.write_frame(Frame::new(1, 1, vec![2, 2, 2], 50), 150);
        assert_eq!(mailbox.current_frame().unwrap().captured_at_micros, 100);
    }

    #[test]
    fn audio_queue_drops_oldest_on_overflow() {
        let mailbox = Mailbox::new();
        for i in 0..MAX_QUEUED_CHUNKS + 3 {
            mailbox.push_audio(
                AudioChunk {
                    samples: vec![i as f32],
                },
                i as u64,
            );
        }
        assert_eq!(mailbox.dropped_audio_chunks(), 3);
        let drained = mailbox.drain_audio();
        assert_eq!(drained.len(), MAX_QUEUED_CHUNKS);
        // The three oldest chunks (samples 0, 1, 2) must have been evicted.
        assert_eq!(drained[0].samples, vec![3.0]);
    }

    #[test]
    fn drain_empties_the_queue() {
        let mailbox = Mailbox::new();
        mailbox.push_audio(AudioChunk { samples: vec![1.0] }, 1);
        assert_eq!(mailbox.drain_audio().len(), 1);
        assert!(mailbox.drain_audio().is_empty());
    }
}
