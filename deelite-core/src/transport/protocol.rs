//! JSON messages exchanged with the live endpoint.
//!
//! Client → server: one `setup` message, then one `realtimeInput` per
//! captured frame. Server → client: `setupComplete`, then `serverContent`
//! carrying model audio parts and turn markers.

use serde::{Deserialize, Serialize};

use super::{SessionConfig, TransportEvent};
use crate::{buffering::frame::EncodedChunk, codec};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInput {
    pub media: Blob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

impl ClientMessage {
    pub fn setup(config: &SessionConfig) -> Self {
        ClientMessage::Setup(Setup {
            model: config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![config.modality.wire_name().to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.as_str().to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            },
        })
    }

    pub fn audio(chunk: EncodedChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media: Blob {
                mime_type: chunk.mime_type,
                data: chunk.data,
            },
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Server frame, relevant fields only. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ModelPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPart {
    #[serde(default)]
    pub inline_data: Option<Blob>,
    #[serde(default)]
    pub text: Option<String>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Flatten into transport events: `Open` first, then audio parts in
    /// order, then `Interrupted`, then `TurnComplete`.
    pub fn into_events(self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(TransportEvent::Open);
        }
        if let Some(content) = self.server_content {
            let parts = content.model_turn.map(|t| t.parts).unwrap_or_default();
            for part in parts {
                let Some(blob) = part.inline_data else {
                    continue;
                };
                events.push(match codec::transport_text_to_bytes(&blob.data) {
                    Ok(bytes) => TransportEvent::Audio(bytes),
                    Err(e) => TransportEvent::Undecodable(e),
                });
            }
            if content.interrupted {
                events.push(TransportEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(TransportEvent::TurnComplete);
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Voice;

    #[test]
    fn setup_message_shape() {
        let cfg = SessionConfig {
            voice: Voice::Kore,
            system_instruction: "be brief".into(),
            ..SessionConfig::default()
        };
        let json = serde_json::to_value(ClientMessage::setup(&cfg)).unwrap();
        let setup = &json["setup"];
        assert_eq!(setup["model"], cfg.model.as_str());
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "be brief");
    }

    #[test]
    fn audio_message_shape() {
        let chunk = EncodedChunk {
            seq: 3,
            mime_type: "audio/pcm;rate=16000".into(),
            data: "AAE=".into(),
        };
        let json = serde_json::to_value(ClientMessage::audio(chunk)).unwrap();
        assert_eq!(
            json["realtimeInput"]["media"]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert_eq!(json["realtimeInput"]["media"]["data"], "AAE=");
    }

    #[test]
    fn setup_complete_opens() {
        let msg = ServerMessage::parse(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(msg.into_events(), vec![TransportEvent::Open]);
    }

    #[test]
    fn audio_parts_are_surfaced_in_order_before_interruption() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQI=" } },
                    { "text": "ignored" },
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AwQ=" } }
                ]},
                "interrupted": true,
                "turnComplete": true
            }
        }"#;
        let events = ServerMessage::parse(raw).unwrap().into_events();
        assert_eq!(
            events,
            vec![
                TransportEvent::Audio(vec![1, 2]),
                TransportEvent::Audio(vec![3, 4]),
                TransportEvent::Interrupted,
                TransportEvent::TurnComplete,
            ]
        );
    }

    #[test]
    fn bad_base64_part_is_reported_not_fatal() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"@@@"}}]}}}"#;
        let events = ServerMessage::parse(raw).unwrap().into_events();
        assert!(matches!(events[0], TransportEvent::Undecodable(_)));
    }

    #[test]
    fn unknown_fields_yield_no_events() {
        let msg = ServerMessage::parse(r#"{"usageMetadata":{"totalTokenCount":12}}"#).unwrap();
        assert!(msg.into_events().is_empty());
    }
}
