//! The session loop: the single task that owns every voice component.
//!
//! ## Per event
//!
//! ```text
//! close signal        → teardown(Closed)
//! capture frame       → encode → transport.send_frame (dropped unless Open)
//! Transport::Open     → Listening
//! Transport::Audio    → decode (24 kHz) → scheduler.enqueue → Speaking
//! Transport::Interrupted → scheduler.flush → Listening
//! source ended        → scheduler.complete → Listening when idle
//! Transport::Closed / Failed → teardown
//! ```
//!
//! Because this loop is the only owner of the [`PlaybackScheduler`], an
//! interruption can never interleave with an enqueue: every chunk that
//! arrived before the interruption is already scheduled (and is flushed),
//! every chunk after it starts from the reset clock.
//!
//! ## Teardown
//!
//! Capture stop → playback flush → transport close → output release. Each
//! step runs even if an earlier one failed.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{AssistantConfig, AssistantState};
use crate::{
    buffering::frame::AudioFrame,
    capture::FrameSource,
    codec,
    error::{DecodeError, DeeliteError, ErrorKind},
    ipc::events::{AssistantStatusEvent, InputLevelEvent},
    playback::{OutputDevice, PlaybackScheduler, SourceId},
    transport::{SessionConfig, TransportEvent, VoiceTransport},
};

pub struct SessionDiagnostics {
    pub frames_captured: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub chunks_received: AtomicUsize,
    pub chunks_scheduled: AtomicUsize,
    pub chunks_completed: AtomicUsize,
    pub decode_errors: AtomicUsize,
    pub interruptions: AtomicUsize,
    pub sources_flushed: AtomicUsize,
}

impl Default for SessionDiagnostics {
    fn default() -> Self {
        Self {
            frames_captured: AtomicUsize::new(0),
            frames_sent: AtomicUsize::new(0),
            frames_dropped: AtomicUsize::new(0),
            chunks_received: AtomicUsize::new(0),
            chunks_scheduled: AtomicUsize::new(0),
            chunks_completed: AtomicUsize::new(0),
            decode_errors: AtomicUsize::new(0),
            interruptions: AtomicUsize::new(0),
            sources_flushed: AtomicUsize::new(0),
        }
    }
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.frames_captured.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.chunks_received.store(0, Ordering::Relaxed);
        self.chunks_scheduled.store(0, Ordering::Relaxed);
        self.chunks_completed.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.interruptions.store(0, Ordering::Relaxed);
        self.sources_flushed.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            sources_flushed: self.sources_flushed.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub frames_captured: usize,
    pub frames_sent: usize,
    pub frames_dropped: usize,
    pub chunks_received: usize,
    pub chunks_scheduled: usize,
    pub chunks_completed: usize,
    pub decode_errors: usize,
    pub interruptions: usize,
    pub sources_flushed: usize,
}

/// Writes the state snapshot and broadcasts the matching event.
#[derive(Clone)]
pub(crate) struct StatusPublisher {
    pub(crate) state: Arc<Mutex<AssistantState>>,
    pub(crate) tx: broadcast::Sender<AssistantStatusEvent>,
    pub(crate) seq: Arc<AtomicU64>,
}

impl StatusPublisher {
    /// Returns `false` (and sends nothing) when the state is unchanged.
    pub(crate) fn set(&self, new_state: AssistantState, error_kind: Option<ErrorKind>) -> bool {
        {
            let mut state = self.state.lock();
            if *state == new_state {
                return false;
            }
            *state = new_state.clone();
        }
        let event = AssistantStatusEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            status: new_state.status(),
            detail: new_state.detail().map(str::to_owned),
            error_kind,
        };
        debug!(status = ?event.status, "assistant status");
        let _ = self.tx.send(event);
        true
    }

    pub(crate) fn current(&self) -> AssistantState {
        self.state.lock().clone()
    }
}

/// Everything the session task owns, passed as one struct so the spawn
/// stays tidy.
pub struct SessionContext {
    pub config: AssistantConfig,
    pub session: SessionConfig,
    pub capture: Box<dyn FrameSource>,
    pub transport: Box<dyn VoiceTransport>,
    pub output: Box<dyn OutputDevice>,
    pub(crate) close_rx: oneshot::Receiver<()>,
    pub(crate) status: StatusPublisher,
    pub(crate) level_tx: broadcast::Sender<InputLevelEvent>,
    pub(crate) diagnostics: Arc<SessionDiagnostics>,
}

/// Why the loop stopped.
enum Exit {
    Closed,
    Errored {
        kind: ErrorKind,
        reason: String,
    },
}

impl Exit {
    fn from_error(e: &DeeliteError) -> Self {
        Exit::Errored {
            kind: e.kind(),
            reason: e.to_string(),
        }
    }
}

/// Run one voice session to completion.
pub async fn run(ctx: SessionContext) {
    let span = info_span!("voice_session", voice = %ctx.session.voice, model = %ctx.session.model);
    run_inner(ctx).instrument(span).await
}

async fn run_inner(ctx: SessionContext) {
    let SessionContext {
        config,
        session,
        capture,
        mut transport,
        output,
        mut close_rx,
        status,
        level_tx,
        diagnostics,
    } = ctx;

    info!("voice session starting");

    // ── 1. Microphone first: no point connecting without one ──────────────
    let (frames_tx, mut frames_rx) = mpsc::channel::<AudioFrame>(config.frame_queue.max(1));
    let (capture, started) = match tokio::task::spawn_blocking(move || {
        let mut capture = capture;
        let started = capture.start(frames_tx);
        (capture, started)
    })
    .await
    {
        Ok((capture, started)) => (Some(capture), started),
        Err(e) => (
            None,
            Err(DeeliteError::Permission(format!("capture start panicked: {e}"))),
        ),
    };

    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel::<SourceId>();
    let mut scheduler = PlaybackScheduler::new(output, ended_tx);

    if let Err(e) = started {
        error!("microphone unavailable: {e}");
        let exit = Exit::from_error(&e);
        teardown(capture, &mut scheduler, transport.as_mut(), &status, exit, &diagnostics).await;
        return;
    }

    if close_requested(&mut close_rx) {
        teardown(capture, &mut scheduler, transport.as_mut(), &status, Exit::Closed, &diagnostics)
            .await;
        return;
    }

    // ── 2. Connect; Open arrives as an event ──────────────────────────────
    let (events_tx, mut events_rx) = mpsc::channel::<TransportEvent>(config.event_queue.max(1));
    if let Err(e) = transport.connect(&session, events_tx) {
        error!("live session connect failed: {e}");
        let exit = Exit::Errored {
            kind: ErrorKind::Connect,
            reason: e.to_string(),
        };
        teardown(capture, &mut scheduler, transport.as_mut(), &status, exit, &diagnostics).await;
        return;
    }

    // ── 3. Event loop ─────────────────────────────────────────────────────
    let mut opened = false;
    let mut capture_live = true;
    let mut consecutive_decode_errors = 0u32;

    let exit = loop {
        tokio::select! {
            biased;

            _ = &mut close_rx => break Exit::Closed,

            event = events_rx.recv() => {
                let Some(event) = event else {
                    break Exit::Errored {
                        kind: ErrorKind::Transport,
                        reason: "transport ended without closing".into(),
                    };
                };
                match event {
                    TransportEvent::Open => {
                        opened = true;
                        info!("live session open, listening");
                        refresh_activity(&status, &scheduler, opened);
                    }
                    TransportEvent::Audio(bytes) => {
                        SessionDiagnostics::bump(&diagnostics.chunks_received);
                        match codec::decode_remote_audio(&bytes, config.output_sample_rate) {
                            Ok(buffer) => {
                                consecutive_decode_errors = 0;
                                match scheduler.enqueue(buffer) {
                                    Ok(enq) => {
                                        SessionDiagnostics::bump(&diagnostics.chunks_scheduled);
                                        if enq.started_playback {
                                            debug!(source = %enq.source.id, start = enq.source.start, "playback started");
                                        }
                                        refresh_activity(&status, &scheduler, opened);
                                    }
                                    Err(e) => {
                                        error!("playback device failed: {e}");
                                        break Exit::from_error(&e);
                                    }
                                }
                            }
                            Err(e) => {
                                if let Some(exit) = on_decode_error(&e, &mut consecutive_decode_errors, &config, &diagnostics) {
                                    break exit;
                                }
                            }
                        }
                    }
                    TransportEvent::Undecodable(e) => {
                        SessionDiagnostics::bump(&diagnostics.chunks_received);
                        warn!("dropping undecodable audio chunk: {e}");
                        if let Some(exit) = on_decode_error(&e, &mut consecutive_decode_errors, &config, &diagnostics) {
                            break exit;
                        }
                    }
                    TransportEvent::Interrupted => {
                        SessionDiagnostics::bump(&diagnostics.interruptions);
                        let flushed = scheduler.flush();
                        diagnostics.sources_flushed.fetch_add(flushed, Ordering::Relaxed);
                        info!(flushed, "interrupted by user, playback flushed");
                        refresh_activity(&status, &scheduler, opened);
                    }
                    TransportEvent::TurnComplete => debug!("model turn complete"),
                    TransportEvent::Closed => {
                        info!("live session closed by server");
                        break Exit::Closed;
                    }
                    TransportEvent::Failed { kind, reason } => {
                        break Exit::Errored { kind, reason };
                    }
                }
            }

            Some(id) = ended_rx.recv() => {
                SessionDiagnostics::bump(&diagnostics.chunks_completed);
                if scheduler.complete(id) {
                    debug!("playback idle");
                }
                refresh_activity(&status, &scheduler, opened);
            }

            frame = frames_rx.recv(), if capture_live => {
                let Some(frame) = frame else {
                    warn!("capture stream ended; session continues without microphone");
                    capture_live = false;
                    continue;
                };
                SessionDiagnostics::bump(&diagnostics.frames_captured);
                let _ = level_tx.send(InputLevelEvent { seq: frame.seq(), rms: frame.rms() });
                if transport.send_frame(codec::encode_frame(&frame)) {
                    SessionDiagnostics::bump(&diagnostics.frames_sent);
                } else {
                    SessionDiagnostics::bump(&diagnostics.frames_dropped);
                }
            }
        }
    };

    teardown(capture, &mut scheduler, transport.as_mut(), &status, exit, &diagnostics).await;
}

fn close_requested(close_rx: &mut oneshot::Receiver<()>) -> bool {
    !matches!(
        close_rx.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}

/// Count a bad chunk; escalate once the budget of consecutive failures is
/// spent.
fn on_decode_error(
    e: &DecodeError,
    consecutive: &mut u32,
    config: &AssistantConfig,
    diagnostics: &SessionDiagnostics,
) -> Option<Exit> {
    SessionDiagnostics::bump(&diagnostics.decode_errors);
    *consecutive += 1;
    if *consecutive > config.max_consecutive_decode_errors {
        error!(consecutive = *consecutive, "too many undecodable chunks in a row: {e}");
        return Some(Exit::Errored {
            kind: ErrorKind::Transport,
            reason: format!("{} consecutive undecodable audio chunks", *consecutive),
        });
    }
    None
}

/// Listening ⇄ Speaking follows the scheduler's pending set.
fn refresh_activity(status: &StatusPublisher, scheduler: &PlaybackScheduler, opened: bool) {
    if !opened || status.current().status().is_terminal() {
        return;
    }
    let next = if scheduler.is_idle() {
        AssistantState::Listening
    } else {
        AssistantState::Speaking
    };
    status.set(next, None);
}

async fn teardown(
    capture: Option<Box<dyn FrameSource>>,
    scheduler: &mut PlaybackScheduler,
    transport: &mut dyn VoiceTransport,
    status: &StatusPublisher,
    exit: Exit,
    diagnostics: &SessionDiagnostics,
) {
    // 1. microphone (joins the framing thread, so off the async workers)
    if let Some(capture) = capture {
        let stopped = tokio::task::spawn_blocking(move || {
            let mut capture = capture;
            capture.stop()
        })
        .await;
        match stopped {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("capture stop failed: {e}"),
            Err(e) => warn!("capture stop panicked: {e}"),
        }
    }

    // 2. playback
    let flushed = scheduler.flush();
    diagnostics.sources_flushed.fetch_add(flushed, Ordering::Relaxed);

    // 3. transport
    if let Err(e) = transport.close() {
        warn!("transport close failed: {e}");
    }

    // 4. output device
    if let Err(e) = scheduler.close() {
        warn!("output close failed: {e}");
    }

    let snap = diagnostics.snapshot();
    info!(
        frames_captured = snap.frames_captured,
        frames_sent = snap.frames_sent,
        frames_dropped = snap.frames_dropped,
        chunks_received = snap.chunks_received,
        chunks_scheduled = snap.chunks_scheduled,
        chunks_completed = snap.chunks_completed,
        decode_errors = snap.decode_errors,
        interruptions = snap.interruptions,
        sources_flushed = snap.sources_flushed,
        "voice session summary"
    );

    match exit {
        Exit::Closed => {
            status.set(AssistantState::Closed, None);
        }
        Exit::Errored { kind, reason } => {
            warn!(?kind, "voice session ended with error: {reason}");
            status.set(AssistantState::Errored(reason), Some(kind));
        }
    }
}
