//! Gapless playback scheduling with barge-in flush.
//!
//! ## Timeline
//!
//! ```text
//! device clock ──────────────────────────────────────────────►
//!                 │ buf 0 │ buf 1 │ buf 2 │        │ buf 3 │
//!                 ^start0         ^next_start_time  ^now (late arrival:
//!                                                    catch up, never in the past)
//! ```
//!
//! Each buffer starts at `max(now, next_start_time)` and pushes
//! `next_start_time` to its own end, so buffers never overlap and drift can
//! never accumulate. The scheduler is the only reader/writer of that clock
//! value; the session loop owns the scheduler, so `enqueue`, `flush` and
//! `complete` never interleave.
//!
//! Every scheduled buffer gets a [`SourceId`]. Completion notices from the
//! device carry that id; ids unknown to the scheduler (e.g. a source that
//! finished just as it was flushed) are ignored.

use std::collections::BTreeMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::buffering::frame::PlaybackBuffer;
use crate::error::Result;

/// Arena-style handle for one scheduled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// An audio output with its own hardware clock.
///
/// Implementors: [`crate::audio::output::SpeakerOutput`] (cpal) and the
/// manual-clock fakes used in tests.
pub trait OutputDevice: Send + 'static {
    /// Device clock in seconds. Monotonic; starts at 0 when the device opens.
    fn current_time(&self) -> f64;

    /// Start `buffer` at device time `start_at`.
    ///
    /// When the buffer has played to the end the device sends `id` on
    /// `on_ended`. The channel is unbounded so a burst of completions is
    /// never lost. Stopped sources need not report.
    fn play_at(
        &mut self,
        id: SourceId,
        buffer: &PlaybackBuffer,
        start_at: f64,
        on_ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<()>;

    /// Stop a source immediately, whether it is playing or still waiting for
    /// its start time.
    fn stop(&mut self, id: SourceId);

    /// Release the device. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Where a buffer landed on the device timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Device time (s) the buffer starts.
    pub start: f64,
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Result of a successful [`PlaybackScheduler::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Enqueued {
    pub source: ScheduledSource,
    /// The scheduler was idle before this buffer: playback just began.
    pub started_playback: bool,
}

/// Owns the output device and the "next available start time" clock.
pub struct PlaybackScheduler {
    device: Box<dyn OutputDevice>,
    next_start_time: f64,
    pending: BTreeMap<SourceId, ScheduledSource>,
    next_id: u64,
    ended_tx: mpsc::UnboundedSender<SourceId>,
    closed: bool,
}

impl PlaybackScheduler {
    /// Completion notices for scheduled buffers are delivered on `ended_tx`'s
    /// receiver and must be fed back through [`complete`](Self::complete).
    pub fn new(device: Box<dyn OutputDevice>, ended_tx: mpsc::UnboundedSender<SourceId>) -> Self {
        let now = device.current_time();
        Self {
            device,
            next_start_time: now,
            pending: BTreeMap::new(),
            next_id: 0,
            ended_tx,
            closed: false,
        }
    }

    /// Schedule `buffer` at `max(now, next_start_time)`.
    ///
    /// # Errors
    /// Propagates device failures; the scheduler state is left untouched.
    pub fn enqueue(&mut self, buffer: PlaybackBuffer) -> Result<Enqueued> {
        let now = self.device.current_time();
        let start = now.max(self.next_start_time);
        if start > self.next_start_time {
            debug!(
                behind = start - self.next_start_time,
                "playback fell behind, starting at now"
            );
        }

        let id = SourceId(self.next_id);
        self.device
            .play_at(id, &buffer, start, self.ended_tx.clone())?;
        self.next_id += 1;

        let source = ScheduledSource {
            id,
            start,
            duration: buffer.duration(),
        };
        let started_playback = self.pending.is_empty();
        self.pending.insert(id, source);
        self.next_start_time = source.end();

        Ok(Enqueued {
            source,
            started_playback,
        })
    }

    /// Record that the device finished `id`.
    ///
    /// Returns `true` when this emptied the pending set (playback idle).
    pub fn complete(&mut self, id: SourceId) -> bool {
        if self.pending.remove(&id).is_none() {
            debug!(%id, "completion for unknown source ignored");
            return false;
        }
        self.pending.is_empty()
    }

    /// Stop everything scheduled, clear the pending set and reset the clock
    /// to the device's current time. Returns how many sources were stopped.
    pub fn flush(&mut self) -> usize {
        let stopped = self.pending.len();
        for id in std::mem::take(&mut self.pending).into_keys() {
            self.device.stop(id);
        }
        self.next_start_time = self.device.current_time();
        if stopped > 0 {
            debug!(stopped, "playback flushed");
        }
        stopped
    }

    /// Flush and release the output device. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.flush();
        self.device.close()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Earliest start time for the next buffer; never behind the device clock.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time.max(self.device.current_time())
    }

    pub fn current_time(&self) -> f64 {
        self.device.current_time()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("output device close on drop failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use parking_lot::Mutex;

    use super::*;
    use crate::buffering::frame::OUTPUT_SAMPLE_RATE;

    #[derive(Default)]
    struct FakeState {
        now: f64,
        started: Vec<(SourceId, f64, f64)>,
        stopped: Vec<SourceId>,
        closed: usize,
    }

    struct FakeOutput(Arc<Mutex<FakeState>>);

    impl OutputDevice for FakeOutput {
        fn current_time(&self) -> f64 {
            self.0.lock().now
        }

        fn play_at(
            &mut self,
            id: SourceId,
            buffer: &PlaybackBuffer,
            start_at: f64,
            _on_ended: mpsc::UnboundedSender<SourceId>,
        ) -> Result<()> {
            self.0.lock().started.push((id, start_at, buffer.duration()));
            Ok(())
        }

        fn stop(&mut self, id: SourceId) {
            self.0.lock().stopped.push(id);
        }

        fn close(&mut self) -> Result<()> {
            self.0.lock().closed += 1;
            Ok(())
        }
    }

    fn scheduler() -> (PlaybackScheduler, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let (tx, _rx) = mpsc::unbounded_channel();
        (
            PlaybackScheduler::new(Box::new(FakeOutput(Arc::clone(&state))), tx),
            state,
        )
    }

    fn buffer_secs(secs: f64) -> PlaybackBuffer {
        let len = (secs * OUTPUT_SAMPLE_RATE as f64).round() as usize;
        PlaybackBuffer::new(vec![0.0; len], OUTPUT_SAMPLE_RATE)
    }

    #[test]
    fn back_to_back_buffers_start_at_running_sum() {
        let (mut sched, _state) = scheduler();
        let durations = [0.5, 0.25, 1.0, 0.125];
        let mut expected_start = 0.0;
        let mut previous_end = 0.0;

        for d in durations {
            let enq = sched.enqueue(buffer_secs(d)).expect("enqueue");
            assert_relative_eq!(enq.source.start, expected_start, epsilon = 1e-9);
            assert!(enq.source.start >= previous_end - 1e-9, "overlap");
            expected_start += d;
            previous_end = enq.source.end();
        }
        assert_eq!(sched.pending_len(), 4);
    }

    #[test]
    fn only_first_buffer_reports_playback_start() {
        let (mut sched, _state) = scheduler();
        assert!(sched.enqueue(buffer_secs(0.1)).unwrap().started_playback);
        assert!(!sched.enqueue(buffer_secs(0.1)).unwrap().started_playback);
    }

    #[test]
    fn late_enqueue_catches_up_to_now() {
        let (mut sched, state) = scheduler();
        sched.enqueue(buffer_secs(0.5)).unwrap();
        state.lock().now = 2.0;

        let enq = sched.enqueue(buffer_secs(0.5)).unwrap();
        assert_relative_eq!(enq.source.start, 2.0);
        assert_relative_eq!(sched.next_start_time(), 2.5);
    }

    #[test]
    fn flush_clears_pending_and_resets_clock() {
        let (mut sched, state) = scheduler();
        for _ in 0..5 {
            sched.enqueue(buffer_secs(0.3)).unwrap();
        }
        state.lock().now = 0.4;

        assert_eq!(sched.flush(), 5);
        assert_eq!(sched.pending_len(), 0);
        assert!(sched.is_idle());
        assert_relative_eq!(sched.next_start_time(), 0.4);
        assert_eq!(state.lock().stopped.len(), 5);

        // next buffer plays immediately, not after the flushed queue
        let enq = sched.enqueue(buffer_secs(0.1)).unwrap();
        assert_relative_eq!(enq.source.start, 0.4);
        assert!(enq.started_playback);
    }

    #[test]
    fn completion_of_last_source_reports_idle() {
        let (mut sched, _state) = scheduler();
        let a = sched.enqueue(buffer_secs(0.1)).unwrap().source.id;
        let b = sched.enqueue(buffer_secs(0.1)).unwrap().source.id;

        assert!(!sched.complete(a));
        assert!(sched.complete(b));
    }

    #[test]
    fn completion_after_flush_is_ignored() {
        let (mut sched, _state) = scheduler();
        let a = sched.enqueue(buffer_secs(0.1)).unwrap().source.id;
        sched.flush();
        assert!(!sched.complete(a));
        assert!(sched.is_idle());
    }

    #[test]
    fn source_ids_are_never_reused() {
        let (mut sched, _state) = scheduler();
        let a = sched.enqueue(buffer_secs(0.1)).unwrap().source.id;
        sched.flush();
        let b = sched.enqueue(buffer_secs(0.1)).unwrap().source.id;
        assert_ne!(a, b);
    }

    #[test]
    fn drop_closes_device() {
        let (sched, state) = scheduler();
        drop(sched);
        assert_eq!(state.lock().closed, 1);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut sched, state) = scheduler();
        sched.enqueue(buffer_secs(0.2)).unwrap();
        sched.close().unwrap();
        sched.close().unwrap();
        drop(sched);
        assert_eq!(state.lock().closed, 1);
        assert_eq!(state.lock().stopped.len(), 1);
    }
}
