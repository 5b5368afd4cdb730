//! `VoiceAssistant`: lifecycle controller for one realtime voice session.
//!
//! ## Lifecycle
//!
//! ```text
//! VoiceAssistant::new()
//!     └─► start()   → mic open, session connecting, status = Connecting
//!         │             └─► setupComplete  → Listening ⇄ Speaking
//!         └─► close()   → capture stop, playback flush, transport close,
//!                         status = Closed
//! ```
//!
//! Failures (microphone denied, connect failure, mid-session network loss,
//! repeated undecodable audio) run the same teardown and end in
//! `Errored(reason)`.
//!
//! ## Threading
//!
//! The session runs as one tokio task ([`session::run`]) that owns capture,
//! transport and the playback scheduler. Hosts only see the status snapshot,
//! broadcast events and diagnostics counters.

pub mod session;

use std::sync::{atomic::AtomicU64, Arc};

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    buffering::frame::{FRAME_SAMPLES, OUTPUT_SAMPLE_RATE},
    capture::FrameSource,
    error::{DeeliteError, Result},
    ipc::events::{AssistantStatus, AssistantStatusEvent, InputLevelEvent},
    playback::OutputDevice,
    transport::{SessionConfig, VoiceTransport},
};

pub use session::{DiagnosticsSnapshot, SessionDiagnostics};

/// Broadcast channel capacity for status and level events.
const BROADCAST_CAP: usize = 256;

/// Tuning for one voice session.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Capture samples per outbound frame (at 16 kHz). Default: 4096 (256 ms).
    pub frame_samples: usize,
    /// Rate inbound model audio is decoded at. Default: 24000.
    pub output_sample_rate: u32,
    /// Captured frames buffered ahead of the session loop. Default: 16.
    pub frame_queue: usize,
    /// Transport events buffered ahead of the session loop. Default: 64.
    pub event_queue: usize,
    /// Undecodable chunks tolerated in a row before the session fails.
    /// Default: 8.
    pub max_consecutive_decode_errors: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            frame_samples: FRAME_SAMPLES,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            frame_queue: 16,
            event_queue: 64,
            max_consecutive_decode_errors: 8,
        }
    }
}

/// Externally observable assistant state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantState {
    Connecting,
    Listening,
    Speaking,
    Closed,
    Errored(String),
}

impl AssistantState {
    pub fn status(&self) -> AssistantStatus {
        match self {
            AssistantState::Connecting => AssistantStatus::Connecting,
            AssistantState::Listening => AssistantStatus::Listening,
            AssistantState::Speaking => AssistantStatus::Speaking,
            AssistantState::Closed => AssistantStatus::Closed,
            AssistantState::Errored(_) => AssistantStatus::Errored,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            AssistantState::Errored(reason) => Some(reason),
            _ => None,
        }
    }
}

/// The devices and connection one session runs on.
pub struct AssistantComponents {
    pub capture: Box<dyn FrameSource>,
    pub transport: Box<dyn VoiceTransport>,
    pub output: Box<dyn OutputDevice>,
}

impl AssistantComponents {
    /// Real microphone, speaker and live websocket.
    ///
    /// # Errors
    /// Fails when the output device cannot be opened. Microphone problems
    /// surface later, from the session, as `Errored`.
    pub fn system(
        config: &AssistantConfig,
        preferred_input: Option<String>,
        preferred_output: Option<&str>,
    ) -> Result<Self> {
        let output = crate::audio::output::SpeakerOutput::open(preferred_output)?;
        Ok(Self {
            capture: Box::new(crate::capture::CpalCapture::with_frame_samples(
                preferred_input,
                config.frame_samples,
            )),
            transport: Box::new(crate::transport::LiveTransport::new()),
            output: Box::new(output),
        })
    }
}

/// The top-level voice assistant handle.
pub struct VoiceAssistant {
    config: AssistantConfig,
    status: session::StatusPublisher,
    level_tx: broadcast::Sender<InputLevelEvent>,
    diagnostics: Arc<SessionDiagnostics>,
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl VoiceAssistant {
    /// Create an idle assistant. Subscribe to events, then call `start()`.
    pub fn new(config: AssistantConfig) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (level_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            status: session::StatusPublisher {
                state: Arc::new(Mutex::new(AssistantState::Closed)),
                tx: status_tx,
                seq: Arc::new(AtomicU64::new(0)),
            },
            level_tx,
            diagnostics: Arc::new(SessionDiagnostics::default()),
            close_tx: None,
            task: None,
        }
    }

    /// Spawn the session task. Returns immediately with status `Connecting`;
    /// progress and failures arrive as status events.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// - `DeeliteError::AlreadyRunning` while a session is active.
    pub fn start(
        &mut self,
        session_config: SessionConfig,
        components: AssistantComponents,
    ) -> Result<()> {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(DeeliteError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.status.set(AssistantState::Connecting, None);

        let (close_tx, close_rx) = oneshot::channel();
        self.close_tx = Some(close_tx);

        let ctx = session::SessionContext {
            config: self.config.clone(),
            session: session_config,
            capture: components.capture,
            transport: components.transport,
            output: components.output,
            close_rx,
            status: self.status.clone(),
            level_tx: self.level_tx.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };
        self.task = Some(tokio::spawn(session::run(ctx)));
        info!("voice assistant started");
        Ok(())
    }

    /// Tear the session down and wait for cleanup to finish.
    ///
    /// Safe in any state and idempotent; never fails because of a cleanup
    /// step. Only a panicked session task is reported.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| DeeliteError::Other(anyhow::anyhow!("voice session task failed: {e}")))?;
        }
        Ok(())
    }

    /// Wait until the session ends on its own (remote close or failure).
    pub async fn wait(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| DeeliteError::Other(anyhow::anyhow!("voice session task failed: {e}")))?;
        }
        self.close_tx = None;
        Ok(())
    }

    /// Current state (snapshot).
    pub fn state(&self) -> AssistantState {
        self.status.current()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<AssistantStatusEvent> {
        self.status.tx.subscribe()
    }

    /// Per-frame microphone level events.
    pub fn subscribe_levels(&self) -> broadcast::Receiver<InputLevelEvent> {
        self.level_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Drop for VoiceAssistant {
    fn drop(&mut self) {
        // Dropping the sender also wakes the session; be explicit.
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_wire_rates() {
        let cfg = AssistantConfig::default();
        assert_eq!(cfg.frame_samples, 4096);
        assert_eq!(cfg.output_sample_rate, 24_000);
        assert_eq!(cfg.max_consecutive_decode_errors, 8);
    }

    #[test]
    fn state_maps_to_status_tags() {
        assert_eq!(AssistantState::Speaking.status(), AssistantStatus::Speaking);
        let errored = AssistantState::Errored("boom".into());
        assert_eq!(errored.status(), AssistantStatus::Errored);
        assert_eq!(errored.detail(), Some("boom"));
        assert_eq!(AssistantState::Listening.detail(), None);
    }

    #[test]
    fn new_assistant_is_closed() {
        let assistant = VoiceAssistant::new(AssistantConfig::default());
        assert_eq!(assistant.state(), AssistantState::Closed);
    }

    #[tokio::test]
    async fn close_before_start_is_a_no_op() {
        let mut assistant = VoiceAssistant::new(AssistantConfig::default());
        assistant.close().await.unwrap();
        assistant.close().await.unwrap();
    }
}
