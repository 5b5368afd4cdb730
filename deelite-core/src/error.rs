use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to turn an inbound audio chunk into a playable buffer.
///
/// Always contained: the offending chunk is dropped and the session keeps
/// accepting further chunks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("pcm payload has odd length {len} (16-bit samples need an even byte count)")]
    OddLength { len: usize },

    #[error("pcm payload is empty")]
    Empty,

    #[error("invalid transport text: {0}")]
    Base64(String),
}

/// All errors produced by deelite-core.
#[derive(Debug, Error)]
pub enum DeeliteError {
    /// Microphone denied or unavailable. Fatal to the voice session.
    #[error("microphone unavailable: {0}")]
    Permission(String),

    /// The live session failed to open.
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("audio decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Mid-session network failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A structured generation response could not be parsed or validated.
    #[error("unexpected model response: {0}")]
    UpstreamFormat(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("voice session is already running")]
    AlreadyRunning,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// User-facing error category, one per row of the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Permission,
    Connect,
    Decode,
    Transport,
    Upstream,
    Device,
    Internal,
}

impl DeeliteError {
    /// Map this error onto the category a host should render.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Permission(_) => ErrorKind::Permission,
            Self::Connect(_) => ErrorKind::Connect,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Transport(_) | Self::Http(_) => ErrorKind::Transport,
            Self::UpstreamFormat(_) | Self::Json(_) => ErrorKind::Upstream,
            Self::AudioDevice(_) | Self::AudioStream(_) => ErrorKind::Device,
            Self::AlreadyRunning | Self::Io(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the user can recover by retrying the action that failed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Permission | ErrorKind::Internal)
    }
}

pub type Result<T> = std::result::Result<T, DeeliteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_convert_and_keep_their_kind() {
        let err: DeeliteError = DecodeError::OddLength { len: 3 }.into();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(err.to_string().contains("odd length 3"));
    }

    #[test]
    fn permission_is_not_recoverable_but_connect_is() {
        assert!(!DeeliteError::Permission("denied".into()).is_recoverable());
        assert!(DeeliteError::Connect("refused".into()).is_recoverable());
        assert!(DeeliteError::UpstreamFormat("bad json".into()).is_recoverable());
    }

    #[test]
    fn error_kind_serializes_lowercase() {
        let json = serde_json::to_value(ErrorKind::Upstream).expect("serialize kind");
        assert_eq!(json, "upstream");
    }
}
