//! Live session wire messages
//!
//! Server frames are JSON objects discriminated by which top-level field is
//! present. They are parsed through optional-field raw structs and folded
//! into the [`ServerMessage`] tagged union so dispatch is exhaustive.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::ResponseMode;
use crate::{Error, Result};

/// A decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Setup acknowledged; the session is usable
    SetupComplete,
    /// New resumption token
    SessionResumptionUpdate {
        resumable: bool,
        new_handle: Option<String>,
    },
    /// Model output and turn signals
    ServerContent(ServerContent),
    /// Model requested function calls
    ToolCall(Vec<FunctionCall>),
    /// Server will close the connection soon
    GoAway { time_left: Option<String> },
    /// A bare binary frame carrying PCM audio
    RawAudio(Vec<u8>),
    /// Anything else; ignored
    Unknown,
}

/// Contents of a `serverContent` frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContent {
    pub parts: Vec<Part>,
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
    pub turn_complete: bool,
    pub interrupted: bool,
}

/// One part of a model turn
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: String },
    FunctionCall(FunctionCall),
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    setup_complete: Option<Value>,
    session_resumption_update: Option<RawResumptionUpdate>,
    server_content: Option<RawServerContent>,
    tool_call: Option<RawToolCall>,
    go_away: Option<RawGoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResumptionUpdate {
    #[serde(default)]
    resumable: bool,
    new_handle: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    model_turn: Option<RawContent>,
    input_transcription: Option<RawTranscription>,
    output_transcription: Option<RawTranscription>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawContent {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    text: Option<String>,
    inline_data: Option<RawInlineData>,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInlineData {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawTranscription {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToolCall {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGoAway {
    time_left: Option<String>,
}

impl ServerMessage {
    /// Parse a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` if the frame is not a JSON object
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawServerMessage = serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("invalid server message: {e}")))?;
        Ok(raw.into())
    }

    /// Interpret a binary frame: JSON if it parses, raw PCM otherwise
    #[must_use]
    pub fn from_binary(bytes: Vec<u8>) -> Self {
        let parsed = std::str::from_utf8(&bytes).ok().map(Self::parse);
        match parsed {
            Some(Ok(message)) => message,
            _ => Self::RawAudio(bytes),
        }
    }
}

impl From<RawServerMessage> for ServerMessage {
    fn from(raw: RawServerMessage) -> Self {
        if raw.setup_complete.is_some() {
            return Self::SetupComplete;
        }
        if let Some(update) = raw.session_resumption_update {
            return Self::SessionResumptionUpdate {
                resumable: update.resumable,
                new_handle: update.new_handle.filter(|h| !h.is_empty()),
            };
        }
        if let Some(content) = raw.server_content {
            return Self::ServerContent(content.into());
        }
        if let Some(tool_call) = raw.tool_call {
            return Self::ToolCall(tool_call.function_calls);
        }
        if let Some(go_away) = raw.go_away {
            return Self::GoAway {
                time_left: go_away.time_left,
            };
        }
        Self::Unknown
    }
}

impl From<RawServerContent> for ServerContent {
    fn from(raw: RawServerContent) -> Self {
        let parts = raw
            .model_turn
            .map(|turn| turn.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| {
                if let Some(call) = part.function_call {
                    Some(Part::FunctionCall(call))
                } else if let Some(inline) = part.inline_data {
                    Some(Part::InlineData {
                        mime_type: inline.mime_type,
                        data: inline.data,
                    })
                } else {
                    part.text.map(Part::Text)
                }
            })
            .collect();

        Self {
            parts,
            input_transcription: raw.input_transcription.and_then(|t| t.text),
            output_transcription: raw.output_transcription.and_then(|t| t.text),
            turn_complete: raw.turn_complete,
            interrupted: raw.interrupted,
        }
    }
}

/// A message sent to the server after setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// One chunk of streamed microphone audio (base64 PCM)
    RealtimeAudio { mime_type: String, data: String },
    /// Explicit end of the user's turn
    AudioStreamEnd,
    /// A complete user text turn
    ClientContent(String),
}

impl ClientMessage {
    /// Serialize to the JSON text frame
    #[must_use]
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::RealtimeAudio { mime_type, data } => json!({
                "realtimeInput": { "audio": { "mimeType": mime_type, "data": data } }
            }),
            Self::AudioStreamEnd => json!({ "realtimeInput": { "audioStreamEnd": true } }),
            Self::ClientContent(text) => json!({
                "clientContent": {
                    "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                    "turnComplete": true
                }
            }),
        };
        value.to_string()
    }
}

/// Everything needed to open one live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRequest {
    pub model: String,
    pub system_instruction: String,
    pub voice: String,
    pub response_mode: ResponseMode,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub resumption_handle: Option<String>,
}

impl SetupRequest {
    /// Build the `setup` frame
    ///
    /// Audio mode carries a prebuilt voice; text mode omits speech config.
    #[must_use]
    pub fn to_json(&self) -> String {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        let mut generation = json!({
            "responseModalities": [self.response_mode.modality()],
        });
        if self.response_mode == ResponseMode::Audio {
            generation["speechConfig"] = json!({
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": self.voice } }
            });
        }

        let mut setup = json!({
            "model": model,
            "generationConfig": generation,
            "systemInstruction": { "parts": [{ "text": self.system_instruction }] },
            "sessionResumption": match &self.resumption_handle {
                Some(handle) => json!({ "handle": handle }),
                None => json!({}),
            },
        });
        if self.input_transcription {
            setup["inputAudioTranscription"] = json!({});
        }
        if self.output_transcription {
            setup["outputAudioTranscription"] = json!({});
        }

        json!({ "setup": setup }).to_string()
    }
}
