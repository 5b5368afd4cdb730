//! Audio sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Two directions use it:
//! - capture: device rate (commonly 44.1/48 kHz) → 16 kHz, streamed in
//!   small blocks on the framing thread via [`RateConverter::process`].
//! - playback: 24 kHz model audio → device rate when the output device
//!   cannot open at 24 kHz, one whole buffer at a time through
//!   [`BufferResampler`], which carries context from one buffer into the
//!   next so back-to-back buffers join without a seam.
//!
//! When both rates match, `RateConverter` is a passthrough and no rubato
//! session is created.
//!
//! ```ignore
//! let mut rc = RateConverter::new(48_000, 16_000, 960)?;
//! let out = rc.process(&raw_samples); // Vec<f32> at 16 kHz
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{DeeliteError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when input rate == output rate.
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input blocks between calls.
    input_buf: Vec<f32>,
    /// Input frames rubato expects per call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Errors
    /// Returns `DeeliteError::AudioDevice` if rubato fails to initialise.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        let ratio = to_rate as f64 / from_rate as f64;

        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio,
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| DeeliteError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::debug!(from_rate, to_rate, chunk_size, max_out, "resampler ready");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
            ratio,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated until a full `chunk_size` block is available;
    /// any remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Convert one self-contained buffer, returning exactly
    /// `round(len * ratio)` output samples.
    ///
    /// The tail is padded with the last sample through the filter delay so
    /// no audio is held back for a later call. Resets internal state first.
    pub fn convert_all(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.resampler.is_none() {
            return samples.to_vec();
        }

        self.reset();
        let expected = (samples.len() as f64 * self.ratio).round() as usize;
        let delay = self
            .resampler
            .as_ref()
            .map(|r| r.output_delay())
            .unwrap_or(0);

        let mut out = self.process(samples);
        let hold = vec![samples.last().copied().unwrap_or(0.0); self.chunk_size];
        while out.len() < expected + delay {
            let more = self.process(&hold);
            if more.is_empty() {
                break;
            }
            out.extend_from_slice(&more);
        }
        self.reset();

        let start = delay.min(out.len());
        let end = (start + expected).min(out.len());
        let mut trimmed = out[start..end].to_vec();
        trimmed.resize(expected, 0.0);
        trimmed
    }

    /// Drop buffered input and filter state.
    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Returns `true` when no resampling occurs.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Output rate divided by input rate.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }
}

/// Source samples from the previous buffer fed ahead of the next one.
const STITCH_CONTEXT: usize = 16;

/// Resamples consecutive playback buffers of one contiguous run.
///
/// Output lengths follow the running input total, so the device-rate length
/// of N buffers always equals `round(total_in * ratio)`: no frame is gained
/// or lost where buffers meet. The tail of each buffer is fed in front of the
/// next as filter context, which keeps the join free of edge transients.
pub struct BufferResampler {
    converter: RateConverter,
    context: Vec<f32>,
    in_total: u64,
    out_total: u64,
}

impl BufferResampler {
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            converter: RateConverter::new(from_rate, to_rate, chunk_size)?,
            context: Vec::with_capacity(STITCH_CONTEXT),
            in_total: 0,
            out_total: 0,
        })
    }

    /// Start a new run: the next buffer does not continue the previous one.
    pub fn restart(&mut self) {
        self.context.clear();
        self.in_total = 0;
        self.out_total = 0;
    }

    /// Convert the next buffer of the current run.
    pub fn next_buffer(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.converter.is_passthrough() {
            return samples.to_vec();
        }
        let ratio = self.converter.ratio();

        self.in_total += samples.len() as u64;
        let target = (self.in_total as f64 * ratio).round() as u64;
        let want = target.saturating_sub(self.out_total) as usize;
        self.out_total = target;

        let lead = self.context.len();
        let mut input = Vec::with_capacity(lead + samples.len());
        input.extend_from_slice(&self.context);
        input.extend_from_slice(samples);

        let converted = self.converter.convert_all(&input);
        let skip = ((lead as f64 * ratio).round() as usize).min(converted.len());
        let mut out: Vec<f32> = converted[skip..].iter().copied().take(want).collect();
        let pad = out.last().copied().unwrap_or(0.0);
        out.resize(want, pad);

        let keep = input.len().min(STITCH_CONTEXT);
        self.context.clear();
        self.context.extend_from_slice(&input[input.len() - keep..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert_eq!(rc.convert_all(&samples), samples);
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(!out.is_empty(), "expected non-empty output");
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={} expected≈320",
            out.len()
        );
    }

    #[test]
    fn partial_accumulation_returns_empty() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        assert!(!rc.process(&vec![0.0f32; 500]).is_empty());
    }

    #[test]
    fn convert_all_returns_exact_length_for_playback() {
        let mut rc = RateConverter::new(24_000, 48_000, 1024).unwrap();
        // 0.1 s at 24 kHz → 0.1 s at 48 kHz
        let out = rc.convert_all(&vec![0.25f32; 2_400]);
        assert_eq!(out.len(), 4_800);

        // state does not leak into the next buffer
        let again = rc.convert_all(&vec![0.25f32; 100]);
        assert_eq!(again.len(), 200);
    }

    #[test]
    fn consecutive_buffers_sum_to_exact_length() {
        let mut rs = BufferResampler::new(24_000, 44_100, 1024).unwrap();
        let sizes = [480usize, 481, 999, 7, 2_400];
        let total_in: usize = sizes.iter().sum();
        let total_out: usize = sizes
            .iter()
            .map(|&n| rs.next_buffer(&vec![0.5f32; n]).len())
            .sum();
        assert_eq!(total_out, (total_in as f64 * 44_100.0 / 24_000.0).round() as usize);
    }

    #[test]
    fn join_between_buffers_has_no_dip() {
        let mut rs = BufferResampler::new(24_000, 48_000, 1024).unwrap();
        let mut out = rs.next_buffer(&vec![0.5f32; 1_200]);
        out.extend(rs.next_buffer(&vec![0.5f32; 1_200]));
        assert_eq!(out.len(), 4_800);
        // skip the very first samples where the filter starts from rest
        for (i, s) in out.iter().enumerate().skip(16) {
            assert!((s - 0.5).abs() < 0.05, "sample {i} = {s}");
        }
    }

    #[test]
    fn restart_drops_context_and_totals() {
        let mut rs = BufferResampler::new(24_000, 44_100, 1024).unwrap();
        rs.next_buffer(&vec![0.1f32; 333]);
        rs.restart();
        let out = rs.next_buffer(&vec![0.1f32; 240]);
        assert_eq!(out.len(), 441);
    }
}
