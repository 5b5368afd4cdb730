//! Microphone and speaker access via the cpal backend.
//!
//! # Design constraints
//!
//! cpal callbacks run on OS audio threads at elevated priority. They **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! Input satisfies that by writing straight into an SPSC ring buffer
//! producer; output (see [`output`]) pulls commands from a lock-free queue.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). [`MicrophoneStream`] must therefore be created and dropped on the
//! same thread; the capture pipeline opens it inside `spawn_blocking`.

pub mod device;
pub mod output;
pub mod resample;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::{
    buffering::AudioProducer,
    error::{DeeliteError, Result},
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;

/// Handle to an open microphone stream feeding mono f32 into a ring buffer.
///
/// **Not `Send`**: create and drop on the same OS thread.
pub struct MicrophoneStream {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Set to `false` to make the callback a no-op.
    running: Arc<AtomicBool>,
    /// Native capture rate reported by the device (Hz).
    pub sample_rate: u32,
    /// Name of the device that was opened.
    pub device_name: String,
}

impl MicrophoneStream {
    /// Open an input device by preferred name, otherwise the default input,
    /// otherwise the first non-loopback input.
    ///
    /// # Errors
    /// Every failure to acquire the device maps to `DeeliteError::Permission`:
    /// from the caller's side a denied and a missing microphone look the same.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let preferred = preferred_device_name.and_then(|wanted| {
            let found = host
                .input_devices()
                .ok()?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
            if found.is_none() {
                warn!("preferred input device '{wanted}' not found, falling back");
            }
            found
        });

        let device = match preferred.or_else(|| host.default_input_device()) {
            Some(device) => device,
            None => {
                let devices: Vec<_> = host
                    .input_devices()
                    .map_err(|e| DeeliteError::Permission(e.to_string()))?
                    .collect();
                let names: Vec<String> = devices
                    .iter()
                    .map(|d| d.name().unwrap_or_default())
                    .collect();
                let pick = device::pick_fallback_input(names.iter().map(String::as_str))
                    .map(str::to_owned)
                    .ok_or_else(|| DeeliteError::Permission("no microphone found".into()))?;
                warn!(device = %pick, "no default input device, using fallback");
                devices
                    .into_iter()
                    .find(|d| d.name().map(|n| n == pick).unwrap_or(false))
                    .ok_or_else(|| DeeliteError::Permission("no microphone found".into()))?
            }
        };

        let device_name = device.name().unwrap_or_default();
        info!(device = device_name.as_str(), "opening input device");

        let supported = device
            .default_input_config()
            .map_err(|e| DeeliteError::Permission(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "input config selected");

        let config: StreamConfig = supported.config();

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                build_mono_input::<f32>(&device, &config, producer, Arc::clone(&running))
            }
            SampleFormat::I16 => {
                build_mono_input::<i16>(&device, &config, producer, Arc::clone(&running))
            }
            SampleFormat::U16 => {
                build_mono_input::<u16>(&device, &config, producer, Arc::clone(&running))
            }
            SampleFormat::U8 => {
                build_mono_input::<u8>(&device, &config, producer, Arc::clone(&running))
            }
            fmt => {
                return Err(DeeliteError::AudioStream(format!(
                    "unsupported input sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| DeeliteError::Permission(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DeeliteError::Permission(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
            device_name,
        })
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Build an input stream that down-mixes any channel count to mono f32 and
/// pushes it into `producer`.
#[cfg(feature = "audio-cpal")]
fn build_mono_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ch = config.channels.max(1) as usize;
    // Sized once for the largest block we expect; resized only if a backend
    // hands us a bigger one.
    let mut mono: Vec<f32> = Vec::with_capacity(8192);

    device.build_input_stream(
        config,
        move |data: &[T], _info| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            let frames = data.len() / ch;
            mono.resize(frames, 0.0);
            for (f, out) in mono.iter_mut().enumerate() {
                let base = f * ch;
                let mut sum = 0f32;
                for c in 0..ch {
                    sum += data[base + c].to_sample::<f32>();
                }
                *out = sum / ch as f32;
            }
            let written = producer.push_slice(&mono);
            if written < mono.len() {
                warn!("ring buffer full: dropped {} frames", mono.len() - written);
            }
        },
        |err| error!("audio input stream error: {err}"),
        None,
    )
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl MicrophoneStream {
    pub fn open(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(DeeliteError::Permission(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
