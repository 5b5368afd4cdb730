//! Websocket implementation of [`VoiceTransport`] for the live model endpoint.
//!
//! `connect` spawns one connection task that owns the socket:
//!
//! ```text
//!             ┌──────────────── connection task ────────────────┐
//! send_frame ─┤ outbound mpsc ──► ws sink                        │
//!             │ ws stream ──► ServerMessage ──► TransportEvent ──┼─► events
//! close ──────┤ shutdown oneshot ──► Close frame                 │
//!             └──────────────────────────────────────────────────┘
//! ```
//!
//! Frames are serialised in capture order and written by the single task, so
//! outbound order is preserved. The shared [`SessionState`] is advanced only
//! through [`SessionState::on`].

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{
    protocol::{ClientMessage, ServerMessage},
    SessionConfig, SessionEvent, SessionState, TransportEvent, VoiceTransport,
};
use crate::{
    buffering::frame::EncodedChunk,
    error::{DeeliteError, ErrorKind, Result},
};

/// Outbound frames buffered ahead of the socket (~8 s of audio).
const OUTBOUND_CAP: usize = 32;

pub struct LiveTransport {
    state: Arc<Mutex<SessionState>>,
    outbound: Option<mpsc::Sender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Default for LiveTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::Idle)),
            outbound: None,
            shutdown: None,
            task: None,
        }
    }
}

impl VoiceTransport for LiveTransport {
    fn connect(
        &mut self,
        config: &SessionConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Idle {
                return Err(DeeliteError::AlreadyRunning);
            }
            *state = state.on(SessionEvent::ConnectRequested);
        }

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAP);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.outbound = Some(out_tx);
        self.shutdown = Some(shutdown_tx);

        info!(endpoint = %config.endpoint, model = %config.model, voice = %config.voice, "connecting live session");
        self.task = Some(tokio::spawn(run_connection(
            config.clone(),
            Arc::clone(&self.state),
            events,
            out_rx,
            shutdown_rx,
        )));
        Ok(())
    }

    fn send_frame(&mut self, chunk: EncodedChunk) -> bool {
        if *self.state.lock() != SessionState::Open {
            debug!(seq = chunk.seq, "session not open, frame dropped");
            return false;
        }
        let Some(outbound) = self.outbound.as_ref() else {
            return false;
        };

        let seq = chunk.seq;
        let json = match ClientMessage::audio(chunk).to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(seq, "failed to serialise frame: {e}");
                return false;
            }
        };
        match outbound.try_send(json) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(seq, "outbound queue full, frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn close(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock();
            *state = state.on(SessionEvent::LocalClose);
        }
        self.outbound = None;
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already be gone; that is fine.
            let _ = shutdown.send(());
        }
        // The task sends a Close frame and exits on its own.
        self.task = None;
        Ok(())
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }
}

impl Drop for LiveTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn advance(state: &Mutex<SessionState>, event: SessionEvent) -> SessionState {
    let mut guard = state.lock();
    *guard = guard.on(event);
    *guard
}

async fn fail(
    state: &Mutex<SessionState>,
    events: &mpsc::Sender<TransportEvent>,
    reason: String,
) {
    let kind = if *state.lock() == SessionState::Open {
        ErrorKind::Transport
    } else {
        ErrorKind::Connect
    };
    // A local close already won the race: stay quiet.
    if state.lock().is_terminal() {
        return;
    }
    advance(state, SessionEvent::Failed);
    warn!(?kind, "live session failed: {reason}");
    let _ = events.send(TransportEvent::Failed { kind, reason }).await;
}

async fn run_connection(
    config: SessionConfig,
    state: Arc<Mutex<SessionState>>,
    events: mpsc::Sender<TransportEvent>,
    mut outbound: mpsc::Receiver<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let url = config.url();
    let connect = tokio::time::timeout(
        config.connect_timeout,
        tokio_tungstenite::connect_async(url),
    );

    let ws = tokio::select! {
        _ = &mut shutdown => {
            debug!("closed before the socket opened");
            return;
        }
        result = connect => match result {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                fail(&state, &events, format!("websocket connect: {e}")).await;
                return;
            }
            Err(_) => {
                fail(&state, &events, "websocket connect timed out".into()).await;
                return;
            }
        },
    };

    let (mut sink, mut stream) = ws.split();

    let setup = match ClientMessage::setup(&config).to_json() {
        Ok(json) => json,
        Err(e) => {
            fail(&state, &events, format!("setup serialisation: {e}")).await;
            return;
        }
    };
    if let Err(e) = sink.send(Message::Text(setup.into())).await {
        fail(&state, &events, format!("sending setup: {e}")).await;
        return;
    }
    debug!("setup sent, waiting for acknowledgement");

    let mut frames_out = 0u64;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                debug!(frames_out, "live session closed locally");
                break;
            }
            Some(json) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    fail(&state, &events, format!("send failed: {e}")).await;
                    break;
                }
                frames_out += 1;
            }
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(t))) => t.as_str().to_owned(),
                    Some(Ok(Message::Binary(b))) => match String::from_utf8(b.to_vec()) {
                        Ok(s) => s,
                        Err(_) => {
                            warn!("non-UTF-8 binary frame ignored");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server closed live session");
                        if remote_closed(&state) {
                            let _ = events.send(TransportEvent::Closed).await;
                        } else {
                            fail(&state, &events, "server closed before setup completed".into()).await;
                        }
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        fail(&state, &events, format!("websocket error: {e}")).await;
                        break;
                    }
                    None => {
                        if remote_closed(&state) {
                            let _ = events.send(TransportEvent::Closed).await;
                        } else {
                            fail(&state, &events, "socket ended before setup completed".into()).await;
                        }
                        break;
                    }
                };

                if !dispatch(&text, &state, &events).await {
                    debug!("event receiver dropped, ending connection task");
                    break;
                }
            }
        }
    }
}

/// Open → Closed on a remote close. Returns `false` when the session never
/// opened (that close is a connect failure).
fn remote_closed(state: &Mutex<SessionState>) -> bool {
    let was_open = *state.lock() == SessionState::Open;
    if was_open {
        advance(state, SessionEvent::RemoteClosed);
    }
    was_open
}

/// Parse one server frame and forward its events. Returns `false` once the
/// receiver is gone.
async fn dispatch(
    text: &str,
    state: &Mutex<SessionState>,
    events: &mpsc::Sender<TransportEvent>,
) -> bool {
    let message = match ServerMessage::parse(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("unparseable server frame ignored: {e}");
            return true;
        }
    };
    if message.go_away.is_some() {
        warn!("server announced it will close the session soon");
    }

    for event in message.into_events() {
        match &event {
            TransportEvent::Open => {
                if advance(state, SessionEvent::Opened) != SessionState::Open {
                    continue;
                }
                info!("live session open");
            }
            TransportEvent::TurnComplete => debug!("model turn complete"),
            _ => {
                advance(state, SessionEvent::Data);
            }
        }
        if events.send(event).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_before_open_are_dropped() {
        let mut transport = LiveTransport::new();
        let chunk = EncodedChunk {
            seq: 0,
            mime_type: "audio/pcm;rate=16000".into(),
            data: String::new(),
        };
        assert!(!transport.send_frame(chunk));
        assert_eq!(transport.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn close_without_connect_is_idempotent() {
        let mut transport = LiveTransport::new();
        transport.close().unwrap();
        transport.close().unwrap();
        assert_eq!(transport.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn dispatch_opens_then_forwards_audio() {
        let state = Mutex::new(SessionState::Connecting);
        let (tx, mut rx) = mpsc::channel(8);

        assert!(dispatch(r#"{"setupComplete":{}}"#, &state, &tx).await);
        assert_eq!(*state.lock(), SessionState::Open);
        assert_eq!(rx.recv().await, Some(TransportEvent::Open));

        let audio = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"AAA="}}]}}}"#;
        assert!(dispatch(audio, &state, &tx).await);
        assert_eq!(rx.recv().await, Some(TransportEvent::Audio(vec![0, 0])));
        assert_eq!(*state.lock(), SessionState::Open);
    }

    #[tokio::test]
    async fn garbage_frames_are_ignored() {
        let state = Mutex::new(SessionState::Open);
        let (tx, mut rx) = mpsc::channel(8);
        assert!(dispatch("not json", &state, &tx).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failure_after_local_close_is_silent() {
        let state = Mutex::new(SessionState::Closed);
        let (tx, mut rx) = mpsc::channel(8);
        fail(&state, &tx, "late".into()).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(*state.lock(), SessionState::Closed);
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let mut transport = LiveTransport::new();
        let (tx, _rx) = mpsc::channel(8);
        let cfg = SessionConfig {
            endpoint: "ws://127.0.0.1:9".into(),
            ..SessionConfig::default()
        };
        transport.connect(&cfg, tx.clone()).unwrap();
        assert!(matches!(
            transport.connect(&cfg, tx),
            Err(DeeliteError::AlreadyRunning)
        ));
        transport.close().unwrap();
    }
}
