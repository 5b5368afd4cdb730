//! PCM codec: f32 ↔ 16-bit PCM and bytes ↔ transport text (standard base64).
//!
//! ## Boundary convention
//!
//! Samples are clamped to [-1.0, 1.0], scaled by 32767 and rounded half away
//! from zero. The scale is symmetric, so `1.0 → 32767` and `-1.0 → -32767`;
//! `-32768` is never produced on encode.
//!
//! Inbound model audio is headerless little-endian 16-bit PCM and is scaled
//! back by `1 / 32768`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::warn;

use crate::buffering::frame::{AudioFrame, EncodedChunk, PlaybackBuffer};
use crate::error::DecodeError;

/// Width of one PCM sample on the wire.
pub const SAMPLE_WIDTH: usize = 2;

/// Convert float samples to 16-bit PCM. Output length equals input length.
pub fn float_to_int16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| {
            // NaN clamps to NaN; treat it as silence.
            let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            (s * 32767.0).round() as i16
        })
        .collect()
}

/// Serialise 16-bit samples as little-endian bytes.
pub fn int16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_WIDTH);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Lossless binary → text encoding.
pub fn bytes_to_transport_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse of [`bytes_to_transport_text`].
pub fn transport_text_to_bytes(text: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// MIME type announced for captured audio at `sample_rate`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Encode one captured frame for the wire.
pub fn encode_frame(frame: &AudioFrame) -> EncodedChunk {
    let pcm = float_to_int16(frame.samples());
    EncodedChunk {
        seq: frame.seq(),
        mime_type: pcm_mime_type(frame.sample_rate()),
        data: bytes_to_transport_text(&int16_to_le_bytes(&pcm)),
    }
}

/// Interpret `raw` as headerless 16-bit PCM at `target_sample_rate`.
///
/// Fails with [`DecodeError::OddLength`] when a trailing half-sample is
/// present, and with [`DecodeError::Empty`] for an empty payload. Both are
/// logged here so the dropped chunk never goes unnoticed.
pub fn decode_remote_audio(
    raw: &[u8],
    target_sample_rate: u32,
) -> Result<PlaybackBuffer, DecodeError> {
    if raw.is_empty() {
        warn!("dropping empty audio chunk");
        return Err(DecodeError::Empty);
    }
    if raw.len() % SAMPLE_WIDTH != 0 {
        warn!(len = raw.len(), "dropping audio chunk with odd byte length");
        return Err(DecodeError::OddLength { len: raw.len() });
    }

    let samples = raw
        .chunks_exact(SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(PlaybackBuffer::new(samples, target_sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::frame::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
    use approx::assert_relative_eq;

    #[test]
    fn float_to_int16_clamps_out_of_range() {
        assert_eq!(float_to_int16(&[1.5, -1.5, 0.0]), vec![32767, -32767, 0]);
    }

    #[test]
    fn float_to_int16_boundaries_are_symmetric() {
        assert_eq!(float_to_int16(&[1.0, -1.0]), vec![32767, -32767]);
    }

    #[test]
    fn float_to_int16_rounds_half_away_from_zero() {
        // 0.25 * 32767 = 8191.75
        assert_eq!(float_to_int16(&[0.25, -0.25]), vec![8192, -8192]);
        // 0.5 * 32767 = 16383.5
        assert_eq!(float_to_int16(&[0.5, -0.5]), vec![16384, -16384]);
    }

    #[test]
    fn float_to_int16_preserves_length_and_treats_nan_as_silence() {
        let out = float_to_int16(&[f32::NAN, 0.1, 0.2]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], 0);
    }

    #[test]
    fn transport_text_round_trips_edge_lengths() {
        for bytes in [
            vec![],
            vec![0u8],
            vec![0xff, 0x00, 0x7f],
            (0u8..=255).collect::<Vec<_>>(),
        ] {
            let text = bytes_to_transport_text(&bytes);
            assert_eq!(transport_text_to_bytes(&text).expect("decode"), bytes);
        }
    }

    #[test]
    fn transport_text_rejects_garbage() {
        let err = transport_text_to_bytes("not base64 !!").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn encode_frame_uses_little_endian_pcm_and_rate_mime() {
        let frame = AudioFrame::new(9, vec![1.0, -1.0], INPUT_SAMPLE_RATE);
        let chunk = encode_frame(&frame);
        assert_eq!(chunk.seq, 9);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        let bytes = transport_text_to_bytes(&chunk.data).expect("decode");
        assert_eq!(bytes, vec![0xff, 0x7f, 0x01, 0x80]);
    }

    #[test]
    fn decode_remote_audio_scales_samples() {
        let raw = int16_to_le_bytes(&[16384, -32768, 0]);
        let buffer = decode_remote_audio(&raw, OUTPUT_SAMPLE_RATE).expect("decode");
        assert_eq!(buffer.sample_rate(), OUTPUT_SAMPLE_RATE);
        assert_relative_eq!(buffer.samples()[0], 0.5);
        assert_relative_eq!(buffer.samples()[1], -1.0);
        assert_relative_eq!(buffer.samples()[2], 0.0);
    }

    #[test]
    fn decode_remote_audio_rejects_odd_length_and_keeps_working() {
        let err = decode_remote_audio(&[1, 2, 3], OUTPUT_SAMPLE_RATE).unwrap_err();
        assert_eq!(err, DecodeError::OddLength { len: 3 });

        let ok = decode_remote_audio(&[0, 0, 0, 0], OUTPUT_SAMPLE_RATE).expect("decode");
        assert_eq!(ok.samples().len(), 2);
    }

    #[test]
    fn decode_remote_audio_rejects_empty() {
        assert_eq!(
            decode_remote_audio(&[], OUTPUT_SAMPLE_RATE).unwrap_err(),
            DecodeError::Empty
        );
    }
}
