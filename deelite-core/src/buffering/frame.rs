//! Typed audio blocks flowing through the voice session.
//!
//! ```text
//! capture ──AudioFrame──► codec ──EncodedChunk──► transport ──► remote
//! remote ──bytes──► codec ──PlaybackBuffer──► scheduler ──► speakers
//! ```

use std::sync::Arc;

/// Sample rate of captured microphone audio sent upstream (Hz).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of model audio received downstream (Hz).
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per captured frame: 4096 @ 16 kHz ≈ 256 ms.
pub const FRAME_SAMPLES: usize = 4096;

/// An immutable block of mono PCM captured from the microphone.
///
/// Created by the capture pipeline, consumed once by the session transport.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    seq: u64,
    samples: Box<[f32]>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(seq: u64, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            seq,
            samples: samples.into_boxed_slice(),
            sample_rate,
        }
    }

    /// Position of this frame in capture order, starting at 0.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Mono f32 samples in [-1.0, 1.0].
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Root-mean-square level of the frame.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }
}

/// Transport-safe text encoding of one frame's 16-bit PCM bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub seq: u64,
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
    /// Base64 of little-endian i16 samples.
    pub data: String,
}

/// Decoded model audio ready for the playback scheduler.
///
/// Samples are shared so the output device can hold them without a copy.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn shared_samples(&self) -> Arc<[f32]> {
        Arc::clone(&self.samples)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn frame_rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let frame = AudioFrame::new(3, samples, INPUT_SAMPLE_RATE);
        assert_relative_eq!(frame.rms(), 0.5, epsilon = 1e-5);
        assert_eq!(frame.seq(), 3);
    }

    #[test]
    fn playback_buffer_duration() {
        let buffer = PlaybackBuffer::new(vec![0.0; 12_000], OUTPUT_SAMPLE_RATE);
        assert_relative_eq!(buffer.duration(), 0.5);
        assert!(!buffer.is_empty());
    }
}
