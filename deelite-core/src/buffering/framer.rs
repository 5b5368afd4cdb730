//! Cuts an arbitrary-sized sample stream into fixed-size `AudioFrame`s.

use super::frame::AudioFrame;

/// Accumulates resampled audio and emits one frame per `frame_len` samples,
/// numbered in strict capture order.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_len: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_seq: u64,
}

impl FrameAssembler {
    pub fn new(frame_len: usize, sample_rate: u32) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            sample_rate,
            pending: Vec::with_capacity(frame_len * 2),
            next_seq: 0,
        }
    }

    /// Append samples and return every frame that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_len {
            let block: Vec<f32> = self.pending.drain(..self.frame_len).collect();
            frames.push(AudioFrame::new(self.next_seq, block, self.sample_rate));
            self.next_seq += 1;
        }
        frames
    }

    /// Samples waiting for the next frame boundary.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_nothing_until_frame_is_full() {
        let mut framer = FrameAssembler::new(4, 16_000);
        assert!(framer.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(framer.buffered(), 3);
    }

    #[test]
    fn frames_keep_sample_order_across_pushes() {
        let mut framer = FrameAssembler::new(4, 16_000);
        let mut frames = framer.push(&[1.0, 2.0, 3.0]);
        frames.extend(framer.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]));

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(frames[1].samples(), &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(frames[0].seq(), 0);
        assert_eq!(frames[1].seq(), 1);
        assert_eq!(framer.buffered(), 1);
    }
}
