//! Capture pipeline: microphone → 16 kHz mono → fixed 4096-sample frames.
//!
//! ```text
//! cpal callback ─push_slice─► SPSC ring ─pop_slice─► framing thread
//!                                                      │ RateConverter → 16 kHz
//!                                                      │ FrameAssembler (4096)
//!                                                      ▼
//!                                         mpsc::Sender<AudioFrame> (try_send)
//! ```
//!
//! The framing thread also owns the `MicrophoneStream` (cpal streams are
//! `!Send`), so opening, running and releasing the device happen on one
//! thread. Frames are delivered with `try_send`: when the session loop falls
//! behind a frame is dropped rather than blocking the thread that `stop()`
//! joins.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::{
    audio::{resample::RateConverter, MicrophoneStream},
    buffering::{
        create_audio_ring,
        frame::{AudioFrame, FRAME_SAMPLES, INPUT_SAMPLE_RATE},
        framer::FrameAssembler,
        AudioConsumer, Consumer,
    },
    error::{DeeliteError, Result},
};

/// Samples drained from the ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;
const EMPTY_SLEEP: Duration = Duration::from_millis(5);

/// Anything that produces `AudioFrame`s in capture order.
///
/// `start` reports microphone acquisition synchronously: it returns
/// `DeeliteError::Permission` when the device is denied or missing. After a
/// successful start, frames flow to `frames` until `stop`.
pub trait FrameSource: Send {
    fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<()>;

    /// Release the device and stop producing frames. Idempotent.
    fn stop(&mut self) -> Result<()>;
}

/// Microphone capture through cpal.
pub struct CpalCapture {
    preferred_device: Option<String>,
    frame_samples: usize,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl CpalCapture {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self::with_frame_samples(preferred_device, FRAME_SAMPLES)
    }

    pub fn with_frame_samples(preferred_device: Option<String>, frame_samples: usize) -> Self {
        Self {
            preferred_device,
            frame_samples,
            running: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            worker: None,
        }
    }

    /// Frames discarded because the consumer was not keeping up.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameSource for CpalCapture {
    fn start(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<()> {
        if self.worker.is_some() {
            return Err(DeeliteError::AlreadyRunning);
        }

        let (producer, consumer) = create_audio_ring();
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let dropped = Arc::clone(&self.dropped);
        let preferred = self.preferred_device.clone();
        let frame_samples = self.frame_samples;

        // Sync oneshot: framing thread reports device open success/failure.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        let worker = std::thread::Builder::new()
            .name("deelite-capture".into())
            .spawn(move || {
                // Must open on THIS thread: cpal::Stream is !Send.
                let mic = match MicrophoneStream::open(
                    producer,
                    Arc::clone(&running),
                    preferred.as_deref(),
                ) {
                    Ok(mic) => {
                        let _ = open_tx.send(Ok(mic.sample_rate));
                        mic
                    }
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                let framer = match Framer::new(mic.sample_rate, frame_samples) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("capture resampler unavailable: {e}");
                        mic.stop();
                        return;
                    }
                };
                run_framing(consumer, framer, &running, &frames, &dropped);

                mic.stop();
                // Stream drops here, releasing the microphone on this thread.
                drop(mic);
                debug!("microphone released");
            })?;

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                info!(capture_rate = rate, "capture started");
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(DeeliteError::Permission(
                    "capture thread died before opening the microphone".into(),
                ))
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| DeeliteError::AudioStream("capture thread panicked".into()))?;
            info!(dropped = self.dropped_frames(), "capture stopped");
        }
        Ok(())
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Device-rate samples in, 16 kHz frames out.
pub(crate) struct Framer {
    resampler: RateConverter,
    assembler: FrameAssembler,
}

impl Framer {
    pub(crate) fn new(capture_rate: u32, frame_samples: usize) -> Result<Self> {
        let resampler = RateConverter::new(capture_rate, INPUT_SAMPLE_RATE, DRAIN_CHUNK)?;
        if !resampler.is_passthrough() {
            info!(from = capture_rate, to = INPUT_SAMPLE_RATE, "capture resampling enabled");
        }
        Ok(Self {
            resampler,
            assembler: FrameAssembler::new(frame_samples, INPUT_SAMPLE_RATE),
        })
    }

    pub(crate) fn push(&mut self, raw: &[f32]) -> Vec<AudioFrame> {
        let resampled = self.resampler.process(raw);
        if resampled.is_empty() {
            return Vec::new();
        }
        self.assembler.push(&resampled)
    }
}

/// What happened to one frame handed to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    Dropped,
    Closed,
}

pub(crate) fn deliver(frames: &mpsc::Sender<AudioFrame>, frame: AudioFrame) -> Delivery {
    match frames.try_send(frame) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(frame)) => {
            warn!(seq = frame.seq(), "session loop behind, capture frame dropped");
            Delivery::Dropped
        }
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}

fn run_framing(
    mut consumer: AudioConsumer,
    mut framer: Framer,
    running: &AtomicBool,
    frames: &mpsc::Sender<AudioFrame>,
    dropped: &AtomicU64,
) {
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut produced = 0u64;

    'outer: while running.load(Ordering::Relaxed) {
        let n = consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(EMPTY_SLEEP);
            continue;
        }

        for frame in framer.push(&raw[..n]) {
            match deliver(frames, frame) {
                Delivery::Sent => produced += 1,
                Delivery::Dropped => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                Delivery::Closed => {
                    debug!("frame receiver closed, ending capture");
                    running.store(false, Ordering::SeqCst);
                    break 'outer;
                }
            }
        }
    }

    debug!(produced, "framing loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_emits_frames_in_order_at_16k() {
        let mut framer = Framer::new(INPUT_SAMPLE_RATE, 4).unwrap();
        let frames = framer.push(&[0.1; 10]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].seq(), 0);
        assert_eq!(frames[1].seq(), 1);
        assert_eq!(frames[0].sample_rate(), INPUT_SAMPLE_RATE);

        let more = framer.push(&[0.1; 2]);
        assert_eq!(more.len(), 1);
        assert_eq!(more[0].seq(), 2);
    }

    #[test]
    fn framer_resamples_device_rate_down() {
        let mut framer = Framer::new(48_000, FRAME_SAMPLES).unwrap();
        let mut frames = Vec::new();
        // 1 s at 48 kHz ≈ 16000 samples at 16 kHz → 3 full frames
        for _ in 0..50 {
            frames.extend(framer.push(&[0.0; 960]));
        }
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.samples().len() == FRAME_SAMPLES));
    }

    #[test]
    fn deliver_drops_when_full_and_reports_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let frame = |seq| AudioFrame::new(seq, vec![0.0; 4], INPUT_SAMPLE_RATE);

        assert_eq!(deliver(&tx, frame(0)), Delivery::Sent);
        assert_eq!(deliver(&tx, frame(1)), Delivery::Dropped);
        assert_eq!(rx.try_recv().unwrap().seq(), 0);

        drop(rx);
        assert_eq!(deliver(&tx, frame(2)), Delivery::Closed);
    }

    #[test]
    fn framing_loop_exits_when_receiver_is_gone() {
        let (mut producer, consumer) = create_audio_ring();
        let _ = crate::buffering::Producer::push_slice(&mut producer, &[0.0; 64]);
        let framer = Framer::new(INPUT_SAMPLE_RATE, 16).unwrap();
        let running = AtomicBool::new(true);
        let dropped = AtomicU64::new(0);
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        run_framing(consumer, framer, &running, &tx, &dropped);
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let mut capture = CpalCapture::new(None);
        capture.stop().unwrap();
        capture.stop().unwrap();
    }
}
