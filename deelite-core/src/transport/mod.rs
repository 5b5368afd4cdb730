//! Session transport: one streaming connection to the live voice model.
//!
//! ## State machine
//!
//! ```text
//! Idle ──connect──► Connecting ──setupComplete──► Open ──remote/local close──► Closed
//!                       │                          │ ▲
//!                       └──failure──► Errored ◄────┘ └─ audio / interrupted (self-loop)
//! ```
//!
//! `Closed` and `Errored` are terminal. Every transition goes through
//! [`SessionState::on`], so the live implementation and the test fakes agree
//! on what a lifecycle event does.
//!
//! Inbound traffic is surfaced as [`TransportEvent`]s on an mpsc channel the
//! caller hands to [`VoiceTransport::connect`]; the caller is never blocked
//! waiting for the connection to open.

pub mod live;
pub mod protocol;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    buffering::frame::EncodedChunk,
    error::{DecodeError, ErrorKind, Result},
};

pub use live::LiveTransport;

pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Chef Dee-Lite, a warm, upbeat kitchen assistant \
helping someone cook with the leftovers they have. Keep replies short and natural for speech: one or \
two sentences, no lists or markdown. Offer practical tips, substitutions and timing help.";

/// Lifecycle of one live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Errored,
}

/// Inputs to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectRequested,
    /// Server acknowledged the setup message.
    Opened,
    /// Audio chunk, interruption or turn marker.
    Data,
    RemoteClosed,
    LocalClose,
    Failed,
}

impl SessionState {
    /// Apply one lifecycle event. Events that make no sense in the current
    /// state leave it unchanged.
    pub fn on(self, event: SessionEvent) -> SessionState {
        use SessionEvent as E;
        use SessionState as S;
        match (self, event) {
            (S::Idle, E::ConnectRequested) => S::Connecting,
            (S::Connecting, E::Opened) => S::Open,
            (S::Connecting, E::Failed) => S::Errored,
            (S::Open, E::Data) => S::Open,
            (S::Open, E::RemoteClosed) => S::Closed,
            (S::Open, E::Failed) => S::Errored,
            (S::Connecting, E::RemoteClosed) => S::Errored,
            (S::Idle | S::Connecting | S::Open, E::LocalClose) => S::Closed,
            (state, _) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

/// Prebuilt voices offered by the live model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Voice {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
    Leda,
    Orus,
    #[default]
    Zephyr,
}

impl Voice {
    pub const ALL: [Voice; 8] = [
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
        Voice::Aoede,
        Voice::Leda,
        Voice::Orus,
        Voice::Zephyr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Aoede => "Aoede",
            Voice::Leda => "Leda",
            Voice::Orus => "Orus",
            Voice::Zephyr => "Zephyr",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        Voice::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let names: Vec<&str> = Voice::ALL.iter().map(|v| v.as_str()).collect();
                format!("unknown voice '{wanted}', expected one of {}", names.join(", "))
            })
    }
}

/// Output modality requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseModality {
    #[default]
    Audio,
}

impl ResponseModality {
    pub fn wire_name(self) -> &'static str {
        match self {
            ResponseModality::Audio => "AUDIO",
        }
    }
}

/// Everything needed to open a live session.
#[derive(Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: Voice,
    pub modality: ResponseModality,
    pub system_instruction: String,
    /// Upper bound on socket connect + handshake.
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_LIVE_MODEL.to_string(),
            voice: Voice::default(),
            modality: ResponseModality::default(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("modality", &self.modality)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl SessionConfig {
    /// Endpoint with the API key attached as a query parameter.
    pub fn url(&self) -> String {
        if self.api_key.is_empty() {
            return self.endpoint.clone();
        }
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, sep, self.api_key)
    }
}

/// Inbound traffic and lifecycle notifications from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Setup acknowledged; frames are now accepted.
    Open,
    /// Raw 16-bit PCM bytes of one model audio part.
    Audio(Vec<u8>),
    /// An audio part whose transport text could not be decoded.
    Undecodable(DecodeError),
    /// The user barged in: discard queued playback.
    Interrupted,
    TurnComplete,
    Closed,
    Failed { kind: ErrorKind, reason: String },
}

/// One live voice session.
pub trait VoiceTransport: Send {
    /// Start connecting. Returns once the attempt is under way; `Open` or
    /// `Failed` arrives later on `events`.
    fn connect(&mut self, config: &SessionConfig, events: mpsc::Sender<TransportEvent>)
        -> Result<()>;

    /// Queue one encoded frame. Returns `false` when the frame was dropped
    /// (session not `Open`, or the outbound queue is full).
    fn send_frame(&mut self, chunk: EncodedChunk) -> bool;

    /// Tear the session down. Idempotent, safe before `Open`.
    fn close(&mut self) -> Result<()>;

    fn state(&self) -> SessionState;
}
