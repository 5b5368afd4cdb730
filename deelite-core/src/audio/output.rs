//! Speaker output: a cpal stream that plays scheduled sources sample-accurately.
//!
//! ```text
//! PlaybackScheduler ──play_at/stop──► Placement (start frame, resample)
//!                                        │ unbounded queue
//!                                        ▼
//!                         Feeder (speaker thread, holds the backlog)
//!                                        │ bounded queue, only when a slot is free
//!                                        ▼
//!                         Renderer (cpal callback) ──SourceId──► session loop
//! ```
//!
//! The renderer's voice table is pre-sized and never grows: the feeder admits
//! a source only once the table has room, so a long reply queued far ahead
//! waits in the backlog instead of being dropped. Finished buffers travel back
//! over a retire queue so the last `Arc` is dropped off the audio thread.
//! Completions go over an unbounded channel; none is ever lost.
//!
//! Device clock = frames rendered / device rate.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    audio::resample::BufferResampler,
    buffering::frame::{PlaybackBuffer, OUTPUT_SAMPLE_RATE},
    error::{DeeliteError, Result},
    playback::{OutputDevice, SourceId},
};

/// Sources the callback holds at once; the rest wait in the feeder backlog.
const MAX_VOICES: usize = 256;
/// Room for a full table of plays plus a stop for each.
const COMMAND_QUEUE_CAP: usize = MAX_VOICES * 2;
const RESAMPLE_CHUNK: usize = 1024;
const FEED_INTERVAL: Duration = Duration::from_millis(5);

pub(crate) enum VoiceCommand {
    Play(Voice),
    Stop(SourceId),
}

pub(crate) struct Voice {
    id: SourceId,
    /// Device frame at which the first sample plays.
    start_frame: u64,
    samples: Arc<[f32]>,
    cursor: usize,
    on_ended: mpsc::UnboundedSender<SourceId>,
}

/// Counters shared between the callback and the control side.
#[derive(Default)]
pub(crate) struct RenderShared {
    frames_rendered: AtomicU64,
    /// Sources handed to the renderer and not yet finished or stopped.
    admitted: AtomicUsize,
    /// Completions nobody was listening for.
    unreported: AtomicU64,
}

/// Real-time side: mixes due voices into the device buffer.
pub(crate) struct Renderer {
    commands: Receiver<VoiceCommand>,
    retire: Sender<Arc<[f32]>>,
    voices: Vec<Voice>,
    shared: Arc<RenderShared>,
    channels: usize,
}

impl Renderer {
    fn new(
        commands: Receiver<VoiceCommand>,
        retire: Sender<Arc<[f32]>>,
        shared: Arc<RenderShared>,
    ) -> Self {
        Self {
            commands,
            retire,
            voices: Vec::with_capacity(MAX_VOICES),
            shared,
            channels: 1,
        }
    }

    fn set_channels(&mut self, channels: usize) {
        self.channels = channels.max(1);
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                // The feeder only admits a voice when a slot is free.
                VoiceCommand::Play(voice) => self.voices.push(voice),
                VoiceCommand::Stop(id) => {
                    if let Some(pos) = self.voices.iter().position(|v| v.id == id) {
                        let voice = self.voices.swap_remove(pos);
                        self.release(voice, false);
                    }
                }
            }
        }
    }

    fn release(&self, voice: Voice, finished: bool) {
        self.shared.admitted.fetch_sub(1, Ordering::AcqRel);
        if finished && voice.on_ended.send(voice.id).is_err() {
            self.shared.unreported.fetch_add(1, Ordering::Relaxed);
        }
        let _ = self.retire.try_send(voice.samples);
    }

    /// Fill one interleaved output block.
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        self.drain_commands();

        let ch = self.channels;
        let frames = out.len() / ch;
        let block_start = self.shared.frames_rendered.load(Ordering::Acquire);
        out.fill(0.0);

        for voice in self.voices.iter_mut() {
            for f in 0..frames {
                // Not started yet and not due: wait. A voice whose start time
                // already passed begins at the top of this block.
                if voice.cursor == 0 && block_start + (f as u64) < voice.start_frame {
                    continue;
                }
                let Some(&sample) = voice.samples.get(voice.cursor) else {
                    break;
                };
                voice.cursor += 1;
                for slot in &mut out[f * ch..(f + 1) * ch] {
                    *slot += sample;
                }
            }
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        let mut i = 0;
        while i < self.voices.len() {
            if self.voices[i].cursor >= self.voices[i].samples.len() {
                let voice = self.voices.swap_remove(i);
                self.release(voice, true);
            } else {
                i += 1;
            }
        }

        self.shared
            .frames_rendered
            .fetch_add(frames as u64, Ordering::Release);
    }
}

/// Control side of the speaker thread: holds sources until the renderer has
/// a free slot, in the order they were scheduled.
pub(crate) struct Feeder {
    incoming: Receiver<VoiceCommand>,
    renderer: Sender<VoiceCommand>,
    retired: Receiver<Arc<[f32]>>,
    backlog: VecDeque<Voice>,
    shared: Arc<RenderShared>,
}

impl Feeder {
    fn handle(&mut self, cmd: VoiceCommand) {
        match cmd {
            VoiceCommand::Play(voice) => self.backlog.push_back(voice),
            VoiceCommand::Stop(id) => {
                if let Some(pos) = self.backlog.iter().position(|v| v.id == id) {
                    self.backlog.remove(pos);
                    return;
                }
                if let Err(e) = self.renderer.try_send(VoiceCommand::Stop(id)) {
                    warn!(%id, "failed to forward stop: {}", describe(&e));
                }
            }
        }
    }

    fn admit(&mut self) {
        while self.shared.admitted.load(Ordering::Acquire) < MAX_VOICES {
            let Some(voice) = self.backlog.pop_front() else {
                break;
            };
            self.shared.admitted.fetch_add(1, Ordering::AcqRel);
            if let Err(e) = self.renderer.try_send(VoiceCommand::Play(voice)) {
                self.shared.admitted.fetch_sub(1, Ordering::AcqRel);
                let failure = describe(&e);
                if let VoiceCommand::Play(voice) = e.into_inner() {
                    self.backlog.push_front(voice);
                }
                debug!("renderer queue {failure}, holding backlog");
                break;
            }
        }
    }

    /// Take every queued command, admit what fits and free retired buffers.
    pub(crate) fn pump(&mut self) {
        while let Ok(cmd) = self.incoming.try_recv() {
            self.handle(cmd);
        }
        self.admit();
        while self.retired.try_recv().is_ok() {}
    }

    /// Run until the control handle is dropped.
    fn run(mut self) {
        loop {
            match self.incoming.recv_timeout(FEED_INTERVAL) {
                Ok(cmd) => self.handle(cmd),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.pump();
        }
        debug!(held = self.backlog_len(), "speaker feeder stopped");
    }

    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

fn describe(e: &TrySendError<VoiceCommand>) -> &'static str {
    match e {
        TrySendError::Full(_) => "full",
        TrySendError::Disconnected(_) => "disconnected",
    }
}

/// Build the connected feeder/renderer pair plus the control-side sender.
fn voice_pipeline() -> (Sender<VoiceCommand>, Feeder, Renderer, Arc<RenderShared>) {
    let (incoming_tx, incoming_rx) = crossbeam_channel::unbounded();
    let (render_tx, render_rx) = crossbeam_channel::bounded(COMMAND_QUEUE_CAP);
    let (retire_tx, retire_rx) = crossbeam_channel::bounded(COMMAND_QUEUE_CAP);
    let shared = Arc::new(RenderShared::default());
    let feeder = Feeder {
        incoming: incoming_rx,
        renderer: render_tx,
        retired: retire_rx,
        backlog: VecDeque::new(),
        shared: Arc::clone(&shared),
    };
    let renderer = Renderer::new(render_rx, retire_tx, Arc::clone(&shared));
    (incoming_tx, feeder, renderer, shared)
}

/// Maps scheduler start times onto device frames.
///
/// A buffer that starts where the previous one ended continues the current
/// run: its first frame is the previous buffer's last frame plus one, and it
/// is resampled with the previous buffer as context. Anything else starts a
/// new run at `round(start_at * rate)`.
pub(crate) struct Placement {
    device_rate: u32,
    resampler: Option<(u32, BufferResampler)>,
    run: Option<Run>,
}

#[derive(Debug, Clone, Copy)]
struct Run {
    /// Scheduler time the last placed buffer ends at.
    end_at: f64,
    /// Device frame right after the last placed buffer.
    next_frame: u64,
}

impl Placement {
    pub(crate) fn new(device_rate: u32) -> Self {
        Self {
            device_rate,
            resampler: None,
            run: None,
        }
    }

    /// Device start frame and device-rate samples for `buffer`.
    pub(crate) fn place(
        &mut self,
        buffer: &PlaybackBuffer,
        start_at: f64,
    ) -> Result<(u64, Arc<[f32]>)> {
        let half_frame = 0.5 / self.device_rate as f64;
        let continues = matches!(self.run, Some(run) if (start_at - run.end_at).abs() < half_frame);

        let start_frame = match self.run {
            Some(run) if continues => run.next_frame,
            _ => (start_at * self.device_rate as f64).round().max(0.0) as u64,
        };

        let samples: Arc<[f32]> = if buffer.sample_rate() == self.device_rate {
            buffer.shared_samples()
        } else {
            let resampler = self.resampler_for(buffer.sample_rate())?;
            if !continues {
                resampler.restart();
            }
            resampler.next_buffer(buffer.samples()).into()
        };

        self.run = Some(Run {
            end_at: start_at + buffer.duration(),
            next_frame: start_frame + samples.len() as u64,
        });
        Ok((start_frame, samples))
    }

    /// The next buffer starts a new run (after a stop).
    pub(crate) fn break_run(&mut self) {
        self.run = None;
    }

    fn resampler_for(&mut self, source_rate: u32) -> Result<&mut BufferResampler> {
        let stale = !matches!(&self.resampler, Some((rate, _)) if *rate == source_rate);
        if stale {
            let rs = BufferResampler::new(source_rate, self.device_rate, RESAMPLE_CHUNK)?;
            self.resampler = Some((source_rate, rs));
            self.run = None;
        }
        self.resampler
            .as_mut()
            .map(|(_, rs)| rs)
            .ok_or_else(|| DeeliteError::AudioDevice("resampler missing".into()))
    }
}

/// Default system speaker as an [`OutputDevice`].
pub struct SpeakerOutput {
    /// `None` once closed; dropping it ends the speaker thread.
    commands: Option<Sender<VoiceCommand>>,
    shared: Arc<RenderShared>,
    sample_rate: u32,
    placement: Placement,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SpeakerOutput {
    /// Open the output device, preferring a 24 kHz configuration.
    ///
    /// The cpal stream lives on a dedicated thread (it is `!Send`); this call
    /// blocks until that thread reports the stream open or failed. The same
    /// thread then feeds queued sources to the callback.
    pub fn open(preferred_device_name: Option<&str>) -> Result<Self> {
        let (cmd_tx, feeder, renderer, shared) = voice_pipeline();
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let preferred = preferred_device_name.map(str::to_owned);

        let thread = std::thread::Builder::new()
            .name("deelite-speaker".into())
            .spawn(move || {
                let stream = match open_stream(preferred.as_deref(), renderer) {
                    Ok((stream, rate)) => {
                        let _ = open_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                // Until close() or the handle is dropped.
                feeder.run();
                drop(stream);
                debug!("speaker stream released");
            })?;

        let sample_rate = match open_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(DeeliteError::AudioDevice(
                    "speaker thread died before opening the stream".into(),
                ))
            }
        };

        Ok(Self {
            commands: Some(cmd_tx),
            shared,
            sample_rate,
            placement: Placement::new(sample_rate),
            thread: Some(thread),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn send(&self, cmd: VoiceCommand) -> Result<()> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| DeeliteError::AudioStream("speaker is closed".into()))?;
        commands
            .send(cmd)
            .map_err(|_| DeeliteError::AudioStream("speaker stream is gone".into()))
    }
}

impl OutputDevice for SpeakerOutput {
    fn current_time(&self) -> f64 {
        self.shared.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn play_at(
        &mut self,
        id: SourceId,
        buffer: &PlaybackBuffer,
        start_at: f64,
        on_ended: mpsc::UnboundedSender<SourceId>,
    ) -> Result<()> {
        let (start_frame, samples) = self.placement.place(buffer, start_at)?;
        self.send(VoiceCommand::Play(Voice {
            id,
            start_frame,
            samples,
            cursor: 0,
            on_ended,
        }))
    }

    fn stop(&mut self, id: SourceId) {
        self.placement.break_run();
        if let Err(e) = self.send(VoiceCommand::Stop(id)) {
            warn!(%id, "failed to queue stop: {e}");
        }
    }

    fn close(&mut self) -> Result<()> {
        self.commands = None;
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| DeeliteError::AudioDevice("speaker thread panicked".into()))?;
            let unreported = self.shared.unreported.load(Ordering::Relaxed);
            if unreported > 0 {
                debug!(unreported, "completions finished after the session stopped listening");
            }
        }
        Ok(())
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(feature = "audio-cpal")]
fn open_stream(
    preferred_device_name: Option<&str>,
    mut renderer: Renderer,
) -> Result<(cpal::Stream, u32)> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, SampleRate};

    let host = cpal::default_host();
    let preferred = preferred_device_name.and_then(|wanted| {
        host.output_devices()
            .ok()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
    });
    let device = preferred
        .or_else(|| host.default_output_device())
        .ok_or_else(|| DeeliteError::AudioDevice("no output device available".into()))?;

    let target = SampleRate(OUTPUT_SAMPLE_RATE);
    let at_model_rate = device.supported_output_configs().ok().and_then(|configs| {
        let configs: Vec<_> = configs.collect();
        [1u16, 2]
            .iter()
            .find_map(|&ch| {
                configs.iter().find(|c| {
                    c.channels() == ch
                        && c.sample_format() == SampleFormat::F32
                        && c.min_sample_rate() <= target
                        && c.max_sample_rate() >= target
                })
            })
            .cloned()
            .map(|c| c.with_sample_rate(target))
    });

    let supported = match at_model_rate {
        Some(cfg) => cfg,
        None => device
            .default_output_config()
            .map_err(|e| DeeliteError::AudioDevice(e.to_string()))?,
    };

    let sample_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels as usize;
    tracing::info!(
        device = device.name().unwrap_or_default().as_str(),
        sample_rate,
        channels,
        "speaker opened"
    );

    renderer.set_channels(channels);
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, renderer),
        SampleFormat::I16 => build_output::<i16>(&device, &config, renderer),
        SampleFormat::U16 => build_output::<u16>(&device, &config, renderer),
        fmt => {
            return Err(DeeliteError::AudioStream(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| DeeliteError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| DeeliteError::AudioStream(e.to_string()))?;

    Ok((stream, sample_rate))
}

#[cfg(feature = "audio-cpal")]
fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    use cpal::traits::DeviceTrait;
    use cpal::Sample;

    let mut mix: Vec<f32> = Vec::with_capacity(16_384);
    device.build_output_stream(
        config,
        move |data: &mut [T], _info| {
            mix.resize(data.len(), 0.0);
            renderer.render(&mut mix);
            for (out, s) in data.iter_mut().zip(mix.iter()) {
                *out = T::from_sample(*s);
            }
        },
        |err| tracing::error!("audio output stream error: {err}"),
        None,
    )
}

#[cfg(not(feature = "audio-cpal"))]
fn open_stream(_preferred_device_name: Option<&str>, _renderer: Renderer) -> Result<((), u32)> {
    Err(DeeliteError::AudioDevice(
        "compiled without audio-cpal feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rig {
        feeder: Feeder,
        renderer: Renderer,
        shared: Arc<RenderShared>,
        commands: Sender<VoiceCommand>,
        ended_rx: mpsc::UnboundedReceiver<SourceId>,
        ended_tx: mpsc::UnboundedSender<SourceId>,
    }

    fn rig(channels: usize) -> Rig {
        let (commands, feeder, mut renderer, shared) = voice_pipeline();
        renderer.set_channels(channels);
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Rig {
            feeder,
            renderer,
            shared,
            commands,
            ended_rx,
            ended_tx,
        }
    }

    impl Rig {
        fn play(&mut self, id: u64, start_frame: u64, samples: Vec<f32>) {
            self.commands
                .send(VoiceCommand::Play(Voice {
                    id: SourceId(id),
                    start_frame,
                    samples: samples.into(),
                    cursor: 0,
                    on_ended: self.ended_tx.clone(),
                }))
                .unwrap();
        }

        fn stop(&mut self, id: u64) {
            self.commands.send(VoiceCommand::Stop(SourceId(id))).unwrap();
        }

        fn render(&mut self, out: &mut [f32]) {
            self.feeder.pump();
            self.renderer.render(out);
        }

        fn ended(&mut self) -> Vec<SourceId> {
            let mut ids = Vec::new();
            while let Ok(id) = self.ended_rx.try_recv() {
                ids.push(id);
            }
            ids
        }
    }

    #[test]
    fn voice_starts_at_exact_frame_offset() {
        let mut rig = rig(1);
        rig.play(0, 2, vec![0.5, 0.5]);
        let mut out = vec![0.0; 6];
        rig.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(rig.ended(), vec![SourceId(0)]);
        assert_eq!(rig.shared.admitted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn consecutive_voices_are_gapless_across_blocks() {
        let mut rig = rig(1);
        rig.play(0, 0, vec![0.1; 3]);
        rig.play(1, 3, vec![0.2; 3]);
        let mut first = vec![0.0; 4];
        let mut second = vec![0.0; 4];
        rig.render(&mut first);
        rig.render(&mut second);
        assert_eq!(first, vec![0.1, 0.1, 0.1, 0.2]);
        assert_eq!(second, vec![0.2, 0.2, 0.0, 0.0]);
    }

    #[test]
    fn late_voice_starts_at_block_start() {
        let mut rig = rig(1);
        let mut out = vec![0.0; 4];
        rig.render(&mut out);
        rig.play(0, 1, vec![0.3; 2]);
        rig.render(&mut out);
        assert_eq!(out, vec![0.3, 0.3, 0.0, 0.0]);
    }

    #[test]
    fn stopped_voice_never_plays_or_reports() {
        let mut rig = rig(1);
        rig.play(0, 8, vec![0.4; 4]);
        rig.stop(0);
        let mut out = vec![0.0; 16];
        rig.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert!(rig.ended().is_empty());
    }

    #[test]
    fn stop_reaches_an_admitted_voice() {
        let mut rig = rig(1);
        rig.play(0, 8, vec![0.4; 4]);
        let mut out = vec![0.0; 4];
        rig.render(&mut out);
        assert_eq!(rig.shared.admitted.load(Ordering::SeqCst), 1);

        rig.stop(0);
        let mut out = vec![0.0; 16];
        rig.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert!(rig.ended().is_empty());
        assert_eq!(rig.shared.admitted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mono_source_fills_every_channel() {
        let mut rig = rig(2);
        rig.play(0, 0, vec![0.25]);
        let mut out = vec![0.0; 4];
        rig.render(&mut out);
        assert_eq!(out, vec![0.25, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn mix_is_clamped() {
        let mut rig = rig(1);
        rig.play(0, 0, vec![0.8]);
        rig.play(1, 0, vec![0.8]);
        let mut out = vec![0.0; 1];
        rig.render(&mut out);
        assert_eq!(out, vec![1.0]);
    }

    #[test]
    fn sources_beyond_the_voice_table_wait_and_play_in_order() {
        let mut rig = rig(1);
        let count = MAX_VOICES as u64 + 44;
        let value = |id: u64| (id + 1) as f32 / 1_000.0;
        for id in 0..count {
            rig.play(id, 10 + id, vec![value(id)]);
        }

        let mut rendered = Vec::new();
        for _ in 0..3 {
            let mut block = vec![0.0; 128];
            rig.render(&mut block);
            rendered.extend(block);
            assert!(rig.shared.admitted.load(Ordering::SeqCst) <= MAX_VOICES);
        }

        for id in 0..count {
            let frame = (10 + id) as usize;
            assert_eq!(rendered[frame], value(id), "frame {frame}");
        }
        let mut ended = rig.ended();
        assert_eq!(ended.len(), count as usize);
        ended.sort();
        assert!(ended.iter().copied().eq((0..count).map(SourceId)));
        assert_eq!(rig.feeder.backlog_len(), 0);
    }

    #[test]
    fn every_completion_in_one_block_is_delivered() {
        let mut rig = rig(1);
        for id in 0..3 {
            rig.play(id, 0, vec![0.1]);
        }
        let mut out = vec![0.0; 4];
        rig.render(&mut out);
        let mut ended = rig.ended();
        ended.sort();
        assert_eq!(ended, vec![SourceId(0), SourceId(1), SourceId(2)]);
    }

    #[test]
    fn completion_without_listener_is_counted() {
        let mut rig = rig(1);
        rig.play(0, 0, vec![0.1]);
        rig.ended_rx.close();
        let mut out = vec![0.0; 2];
        rig.render(&mut out);
        assert_eq!(rig.shared.unreported.load(Ordering::SeqCst), 1);
    }

    fn buffer(len: usize, rate: u32) -> PlaybackBuffer {
        PlaybackBuffer::new(vec![0.2; len], rate)
    }

    #[test]
    fn placement_chains_frames_at_model_rate() {
        let mut placement = Placement::new(OUTPUT_SAMPLE_RATE);
        let (a, sa) = placement.place(&buffer(480, OUTPUT_SAMPLE_RATE), 0.0).unwrap();
        let (b, _) = placement.place(&buffer(480, OUTPUT_SAMPLE_RATE), 0.02).unwrap();
        assert_eq!(a, 0);
        assert_eq!(sa.len(), 480);
        assert_eq!(b, 480);
    }

    #[test]
    fn placement_chains_resampled_buffers_without_rounding_drift() {
        let mut placement = Placement::new(44_100);
        let mut expected_frame = 0u64;
        let mut start_at = 0.0;
        for len in [1_001usize, 333, 2_400, 17] {
            let buf = buffer(len, OUTPUT_SAMPLE_RATE);
            let (frame, samples) = placement.place(&buf, start_at).unwrap();
            assert_eq!(frame, expected_frame);
            expected_frame += samples.len() as u64;
            start_at += buf.duration();
        }
        let total_in = 1_001 + 333 + 2_400 + 17;
        assert_eq!(
            expected_frame,
            (total_in as f64 * 44_100.0 / OUTPUT_SAMPLE_RATE as f64).round() as u64
        );
    }

    #[test]
    fn placement_restarts_after_gap_or_stop() {
        let mut placement = Placement::new(OUTPUT_SAMPLE_RATE);
        placement.place(&buffer(240, OUTPUT_SAMPLE_RATE), 0.0).unwrap();
        let (late, _) = placement.place(&buffer(240, OUTPUT_SAMPLE_RATE), 1.0).unwrap();
        assert_eq!(late, OUTPUT_SAMPLE_RATE as u64);

        placement.break_run();
        let (after_stop, _) = placement.place(&buffer(240, OUTPUT_SAMPLE_RATE), 1.01).unwrap();
        assert_eq!(after_stop, 24_240);
    }
}
