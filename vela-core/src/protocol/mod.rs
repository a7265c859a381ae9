//! Framed JSON codec for the bidirectional live protocol.
//!
//! Every transport frame is a single JSON object carrying exactly one
//! message variant. Field names are snake_case on the wire; decoding also
//! accepts the camelCase spellings some server builds emit.
//!
//! **Client → server** (encoded here):
//!
//! | Variant | Purpose |
//! |---------|---------|
//! | `setup` | First frame after transport open: model, generation config, system instruction, realtime-input config |
//! | `client_content` | Text conversation turns |
//! | `realtime_input` | Streaming media chunks and activity markers |
//! | `tool_response` | Responses to server function calls |
//!
//! **Server → client** (decoded here):
//!
//! | Variant | Handled by the core |
//! |---------|---------------------|
//! | `setup_complete` | handshake acknowledgement |
//! | `server_content` | model audio, `turn_complete`, `interrupted` |
//! | `tool_call`, `tool_call_cancellation` | logged only |
//! | `usage_metadata`, `go_away`, `session_resumption_update` | logged only |
//! | `input_transcription`, `output_transcription` | logged only |
//!
//! Unknown top-level fields are ignored on decode; absent optional fields
//! are omitted on encode. A frame that is not valid JSON (or not an object
//! of the expected shape) is `MalformedFrame`; a valid object with no
//! recognized variant is `UnexpectedVariant`. Both are per-frame and never
//! tear the connection down.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// MIME type for microphone audio sent to the model.
pub const INPUT_AUDIO_MIME: &str = "audio/pcm";

/// Per-frame codec failures. Non-fatal: the offending frame is dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("no recognized message variant present")]
    UnexpectedVariant,
}

// ---------------------------------------------------------------------------
// Client messages
// ---------------------------------------------------------------------------

/// One outgoing frame. Externally tagged, so serialization produces exactly
/// one variant field per JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

/// Session configuration, sent exactly once per physical connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Setup {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime_input_config: Option<RealtimeInputConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SpeechConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_config: Option<VoiceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VoiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prebuilt_voice_config: Option<PrebuiltVoiceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RealtimeInputConfig {
    pub automatic_activity_detection: AutomaticActivityDetection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AutomaticActivityDetection {
    pub disabled: bool,
}

/// A content block: an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// A single-text-part content, the shape used for system instructions.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

/// One content part: text, inline media, or both absent (ignored).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "inlineData")]
    pub inline_data: Option<Blob>,
}

impl Part {
    /// True when this part carries inline data with an `audio/*` MIME type.
    pub fn is_audio(&self) -> bool {
        self.inline_data
            .as_ref()
            .is_some_and(|blob| blob.mime_type.starts_with("audio/"))
    }
}

/// Inline media body: declared MIME type plus base64 payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Blob {
    #[serde(alias = "mimeType")]
    pub mime_type: String,
    /// Base64, standard alphabet, no line wrapping.
    pub data: String,
}

impl Blob {
    /// Wrap raw bytes with the given MIME type.
    pub fn encode(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: BASE64.encode(bytes),
        }
    }

    /// Decode the base64 payload back to bytes.
    pub fn decode_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        BASE64
            .decode(&self.data)
            .map_err(|e| ProtocolError::MalformedFrame(format!("invalid base64 body: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClientContent {
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "is_false", alias = "turnComplete")]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Turn {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Streaming media input. Activity markers are empty objects whose mere
/// presence delimits the user's speech when server-side detection is off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RealtimeInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty", alias = "mediaChunks")]
    pub media_chunks: Vec<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "activityStart")]
    pub activity_start: Option<ActivityMarker>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "activityEnd")]
    pub activity_end: Option<ActivityMarker>,
}

/// Presence-only marker; serializes to `{}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ActivityMarker {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ToolResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty", alias = "functionResponses")]
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FunctionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Server messages
// ---------------------------------------------------------------------------

/// One incoming frame, reduced to its single recognized variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    SetupComplete(SetupComplete),
    ServerContent(ServerContent),
    ToolCall(ToolCall),
    ToolCallCancellation(ToolCallCancellation),
    UsageMetadata(UsageMetadata),
    GoAway(GoAway),
    SessionResumptionUpdate(SessionResumptionUpdate),
    InputTranscription(Transcription),
    OutputTranscription(Transcription),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SetupComplete {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "modelTurn")]
    pub model_turn: Option<ModelTurn>,
    #[serde(default, skip_serializing_if = "is_false", alias = "turnComplete")]
    pub turn_complete: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ToolCall {
    #[serde(default, alias = "functionCalls")]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UsageMetadata {
    #[serde(default, alias = "promptTokenCount")]
    pub prompt_token_count: Option<u64>,
    #[serde(default, alias = "responseTokenCount")]
    pub response_token_count: Option<u64>,
    #[serde(default, alias = "totalTokenCount")]
    pub total_token_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GoAway {
    /// Remaining connection time as reported by the server, if any.
    #[serde(default, alias = "timeLeft")]
    pub time_left: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionResumptionUpdate {
    #[serde(default, alias = "newHandle")]
    pub new_handle: Option<String>,
    #[serde(default)]
    pub resumable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

/// Decode intermediate: optional field per known variant so unknown
/// top-level fields never fail the frame and both spellings are accepted.
#[derive(Debug, Default, Deserialize)]
struct RawServerFrame {
    #[serde(default, alias = "setupComplete")]
    setup_complete: Option<SetupComplete>,
    #[serde(default, alias = "serverContent")]
    server_content: Option<ServerContent>,
    #[serde(default, alias = "toolCall")]
    tool_call: Option<ToolCall>,
    #[serde(default, alias = "toolCallCancellation")]
    tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default, alias = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default, alias = "goAway")]
    go_away: Option<GoAway>,
    #[serde(default, alias = "sessionResumptionUpdate")]
    session_resumption_update: Option<SessionResumptionUpdate>,
    #[serde(default, alias = "inputTranscription")]
    input_transcription: Option<Transcription>,
    #[serde(default, alias = "outputTranscription")]
    output_transcription: Option<Transcription>,
}

// ---------------------------------------------------------------------------
// Codec entry points
// ---------------------------------------------------------------------------

/// Serialize one outgoing message to a single JSON document.
pub fn encode_client(message: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}

/// Parse one outgoing message back. Used for loopback tests and proxies.
pub fn decode_client(frame: &str) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_str(frame).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}

/// Parse one server frame into its recognized variant.
pub fn decode_server(frame: &str) -> Result<ServerMessage, ProtocolError> {
    let raw: RawServerFrame =
        serde_json::from_str(frame).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

    if let Some(m) = raw.setup_complete {
        Ok(ServerMessage::SetupComplete(m))
    } else if let Some(m) = raw.server_content {
        Ok(ServerMessage::ServerContent(m))
    } else if let Some(m) = raw.tool_call {
        Ok(ServerMessage::ToolCall(m))
    } else if let Some(m) = raw.tool_call_cancellation {
        Ok(ServerMessage::ToolCallCancellation(m))
    } else if let Some(m) = raw.usage_metadata {
        Ok(ServerMessage::UsageMetadata(m))
    } else if let Some(m) = raw.go_away {
        Ok(ServerMessage::GoAway(m))
    } else if let Some(m) = raw.session_resumption_update {
        Ok(ServerMessage::SessionResumptionUpdate(m))
    } else if let Some(m) = raw.input_transcription {
        Ok(ServerMessage::InputTranscription(m))
    } else if let Some(m) = raw.output_transcription {
        Ok(ServerMessage::OutputTranscription(m))
    } else {
        Err(ProtocolError::UnexpectedVariant)
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_encodes_snake_case_with_single_variant() {
        let message = ClientMessage::Setup(Setup {
            model: "models/m".into(),
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["AUDIO".into()],
                speech_config: Some(SpeechConfig {
                    voice_config: Some(VoiceConfig {
                        prebuilt_voice_config: Some(PrebuiltVoiceConfig {
                            voice_name: "Aoede".into(),
                        }),
                    }),
                }),
            }),
            system_instruction: Some(Content::text("be terse")),
            realtime_input_config: Some(RealtimeInputConfig {
                automatic_activity_detection: AutomaticActivityDetection { disabled: true },
            }),
        });

        let json = encode_client(&message).expect("encode");
        assert!(json.contains("\"setup\""));
        assert!(json.contains("\"model\":\"models/m\""));
        assert!(json.contains("\"response_modalities\":[\"AUDIO\"]"));
        assert!(json.contains("\"automatic_activity_detection\":{\"disabled\":true}"));
        assert!(json.contains("\"voice_name\":\"Aoede\""));
        assert!(json.contains("be terse"));
        // Exactly one top-level variant key.
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 1);
    }

    #[test]
    fn realtime_input_markers_encode_as_empty_objects() {
        let start = ClientMessage::RealtimeInput(RealtimeInput {
            activity_start: Some(ActivityMarker {}),
            ..Default::default()
        });
        let json = encode_client(&start).expect("encode");
        assert!(json.contains("\"activity_start\":{}"));
        assert!(!json.contains("media_chunks"), "empty chunk list must be omitted");

        let end = ClientMessage::RealtimeInput(RealtimeInput {
            activity_end: Some(ActivityMarker {}),
            ..Default::default()
        });
        let json = encode_client(&end).expect("encode");
        assert!(json.contains("\"activity_end\":{}"));
    }

    #[test]
    fn media_chunks_round_trip_base64() {
        let pcm = [0u8, 1, 2, 3, 4, 5, 6, 7];
        let message = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob::encode(INPUT_AUDIO_MIME, &pcm)],
            ..Default::default()
        });
        let json = encode_client(&message).expect("encode");
        assert!(json.contains("\"mime_type\":\"audio/pcm\""));
        assert!(json.contains("AAECAwQFBgc="));

        let back = decode_client(&json).expect("decode");
        let ClientMessage::RealtimeInput(input) = back else {
            panic!("wrong variant");
        };
        assert_eq!(input.media_chunks[0].decode_bytes().unwrap(), pcm);
    }

    #[test]
    fn client_messages_round_trip() {
        let messages = [
            ClientMessage::Setup(Setup {
                model: "models/m".into(),
                system_instruction: Some(Content::text("hi")),
                ..Default::default()
            }),
            ClientMessage::ClientContent(ClientContent {
                turns: vec![Turn {
                    role: "user".into(),
                    parts: vec![Part {
                        text: Some("hello".into()),
                        inline_data: None,
                    }],
                }],
                turn_complete: true,
            }),
            ClientMessage::RealtimeInput(RealtimeInput {
                media_chunks: vec![Blob::encode("image/jpeg", &[9, 9])],
                activity_start: Some(ActivityMarker {}),
                activity_end: None,
            }),
            ClientMessage::ToolResponse(ToolResponse {
                function_responses: vec![FunctionResponse {
                    id: "1".into(),
                    name: "f".into(),
                    response: serde_json::json!({"ok": true}),
                }],
            }),
        ];

        for message in messages {
            let json = encode_client(&message).expect("encode");
            let back = decode_client(&json).expect("decode");
            assert_eq!(back, message);
        }
    }

    #[test]
    fn decode_setup_complete_camel_case() {
        let message = decode_server(r#"{"setupComplete":{"model":"m"}}"#).expect("decode");
        let ServerMessage::SetupComplete(ack) = message else {
            panic!("wrong variant");
        };
        assert_eq!(ack.model.as_deref(), Some("m"));
    }

    #[test]
    fn decode_server_content_mixed_case_fields() {
        let frame = r#"{"serverContent":{"model_turn":{"parts":[{"inline_data":{"mime_type":"audio/pcm","data":"AAECAwQFBgc="}}]}}}"#;
        let ServerMessage::ServerContent(content) = decode_server(frame).expect("decode") else {
            panic!("wrong variant");
        };
        let parts = &content.model_turn.as_ref().unwrap().parts;
        assert!(parts[0].is_audio());
        assert_eq!(
            parts[0].inline_data.as_ref().unwrap().decode_bytes().unwrap(),
            vec![0, 1, 2, 3, 4, 5, 6, 7]
        );
        assert!(!content.turn_complete);
        assert!(!content.interrupted);
    }

    #[test]
    fn decode_server_content_snake_case_flags() {
        let frame = r#"{"server_content":{"turn_complete":true}}"#;
        let ServerMessage::ServerContent(content) = decode_server(frame).expect("decode") else {
            panic!("wrong variant");
        };
        assert!(content.turn_complete);

        let frame = r#"{"serverContent":{"interrupted":true}}"#;
        let ServerMessage::ServerContent(content) = decode_server(frame).expect("decode") else {
            panic!("wrong variant");
        };
        assert!(content.interrupted);
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let frame = r#"{"setupComplete":{"model":"m","future_field":1},"trailing_metadata":{"x":2}}"#;
        assert!(matches!(
            decode_server(frame).expect("decode"),
            ServerMessage::SetupComplete(_)
        ));
    }

    #[test]
    fn decode_rejects_invalid_json_as_malformed() {
        let err = decode_server("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }

    #[test]
    fn decode_rejects_unrecognized_variant() {
        let err = decode_server(r#"{"somethingElse":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedVariant));
    }

    #[test]
    fn decode_go_away_and_usage() {
        assert!(matches!(
            decode_server(r#"{"goAway":{"timeLeft":"10s"}}"#).expect("decode"),
            ServerMessage::GoAway(GoAway { time_left: Some(_) })
        ));
        assert!(matches!(
            decode_server(r#"{"usageMetadata":{"totalTokenCount":42}}"#).expect("decode"),
            ServerMessage::UsageMetadata(UsageMetadata {
                total_token_count: Some(42),
                ..
            })
        ));
    }
}
