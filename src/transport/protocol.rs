//! JSON frames exchanged with the live provider.
//!
//! Outbound: one `setup` frame, then `realtimeInput` frames carrying capture
//! packets. Inbound frames are normalised into [`ServerMessage`].

use crate::audio::frame::EncodedPacket;
use serde::{Deserialize, Serialize};

/// First frame sent after the socket opens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupFrame {
    pub setup: Setup,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

impl SetupFrame {
    /// Audio-only session with a prebuilt voice.
    pub fn new(model: &str, voice: &str, system_instruction: Option<&str>) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction: system_instruction
                    .filter(|text| !text.is_empty())
                    .map(Content::text),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Capture audio on its way to the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputFrame {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<EncodedPacket>,
}

impl RealtimeInputFrame {
    pub fn new(packet: EncodedPacket) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![packet],
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Content with parts, used both in setup and in server turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    fn text(text: &str) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<EncodedPacket>,
}

/// Raw inbound frame. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFrame {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// What the session needs from one inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMessage {
    /// Base64 PCM payloads, in part order.
    pub audio: Vec<String>,
    /// The model stopped talking because the user barged in.
    pub interrupted: bool,
    pub turn_complete: bool,
    pub setup_complete: bool,
    /// Server announced it will close soon; the value is the time left.
    pub go_away: Option<String>,
}

impl ServerMessage {
    /// A message carrying a single audio payload.
    pub fn audio(data: impl Into<String>) -> Self {
        Self {
            audio: vec![data.into()],
            ..Default::default()
        }
    }

    /// A bare interruption signal.
    pub fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
            && !self.interrupted
            && !self.turn_complete
            && !self.setup_complete
            && self.go_away.is_none()
    }
}

impl From<ServerFrame> for ServerMessage {
    fn from(frame: ServerFrame) -> Self {
        let mut message = ServerMessage {
            setup_complete: frame.setup_complete.is_some(),
            go_away: frame
                .go_away
                .map(|g| g.time_left.unwrap_or_else(|| "unknown".to_string())),
            ..Default::default()
        };
        if let Some(content) = frame.server_content {
            message.interrupted = content.interrupted;
            message.turn_complete = content.turn_complete;
            message.audio = content
                .model_turn
                .map(|turn| {
                    turn.parts
                        .into_iter()
                        .filter_map(|part| part.inline_data)
                        .filter(|data| data.mime_type.starts_with("audio/"))
                        .map(|data| data.data)
                        .collect()
                })
                .unwrap_or_default();
        }
        message
    }
}

/// Parse one inbound text (or UTF-8 binary) frame.
pub fn parse_server_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str::<ServerFrame>(text).map(ServerMessage::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_setup_frame_shape() {
        let json = SetupFrame::new("gemini-live", "Puck", Some("Be brief."))
            .to_json()
            .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/gemini-live",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Puck"}}
                        }
                    },
                    "systemInstruction": {"parts": [{"text": "Be brief."}]}
                }
            })
        );
    }

    #[test]
    fn test_setup_frame_keeps_qualified_model_and_skips_empty_instruction() {
        let frame = SetupFrame::new("models/x", "Kore", Some(""));
        assert_eq!(frame.setup.model, "models/x");
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert!(value["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn test_realtime_input_frame_shape() {
        let packet = EncodedPacket {
            mime_type: "audio/pcm;rate=16000".to_string(),
            data: "AAAA".to_string(),
        };
        let value: Value =
            serde_json::from_str(&RealtimeInputFrame::new(packet).to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AAAA"}]}})
        );
    }

    #[test]
    fn test_parse_model_turn_audio() {
        let msg = parse_server_message(
            r#"{"serverContent":{"modelTurn":{"parts":[
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}},
                {"text":"hello"},
                {"inlineData":{"mimeType":"image/png","data":"iVBO"}},
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"BBBB"}}
            ]}}}"#,
        )
        .unwrap();
        assert_eq!(msg.audio, vec!["AAAA".to_string(), "BBBB".to_string()]);
        assert!(!msg.interrupted);
    }

    #[test]
    fn test_parse_interrupted_and_turn_complete() {
        let msg = parse_server_message(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert_eq!(msg, ServerMessage::interrupted());

        let msg = parse_server_message(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        assert!(msg.turn_complete);
        assert!(msg.audio.is_empty());
    }

    #[test]
    fn test_parse_setup_complete_and_go_away() {
        assert!(parse_server_message(r#"{"setupComplete":{}}"#).unwrap().setup_complete);

        let msg = parse_server_message(r#"{"goAway":{"timeLeft":"10s"}}"#).unwrap();
        assert_eq!(msg.go_away.as_deref(), Some("10s"));
    }

    #[test]
    fn test_unknown_frames_parse_as_empty() {
        let msg = parse_server_message(r#"{"usageMetadata":{"totalTokenCount":12}}"#).unwrap();
        assert!(msg.is_empty());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(parse_server_message("{not json").is_err());
    }
}
