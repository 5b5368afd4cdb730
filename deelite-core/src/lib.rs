//! # deelite-core
//!
//! Realtime voice pipeline and model collaborators for the Dee-Lite kitchen
//! assistant.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → cpal callback → SPSC RingBuffer → framing thread (16 kHz, 4096)
//!                                                    │ mpsc
//!                                                    ▼
//!                      ┌──────────── session loop (tokio task) ────────────┐
//!                      │ encode_frame → VoiceTransport::send_frame ──► ws  │
//!               ws ──► │ TransportEvent::Audio → decode → PlaybackScheduler│
//!                      │ TransportEvent::Interrupted → flush               │
//!                      └───────────────────────────┬───────────────────────┘
//!                                                  │ crossbeam queue
//!                                                  ▼
//!                                       cpal output callback → Speaker
//! ```
//!
//! Audio callbacks never allocate or lock. All scheduling state lives in the
//! session loop.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod assistant;
pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod error;
pub mod genai;
pub mod ipc;
pub mod playback;
pub mod transport;

// Convenience re-exports for downstream crates
pub use assistant::{AssistantComponents, AssistantConfig, AssistantState, VoiceAssistant};
pub use error::{DecodeError, DeeliteError, ErrorKind};
pub use genai::{
    chat::ChefChat,
    recipes::{AnalysisResult, DailyLesson, Recipe},
    GenerativeClient,
};
pub use ipc::events::{AssistantStatus, AssistantStatusEvent, InputLevelEvent};
pub use playback::{OutputDevice, PlaybackScheduler, SourceId};
pub use transport::{SessionConfig, SessionState, TransportEvent, Voice, VoiceTransport};
