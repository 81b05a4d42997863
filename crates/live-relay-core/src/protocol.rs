//! Wire types shared by the browser client and the upstream live session.
//!
//! Field names follow the upstream JSON schema (camelCase). Server messages
//! keep every field they do not model in `extra`, so forwarding a message to
//! the browser never loses data.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inline binary payload (base64 encoded on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// IANA mime type, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
    /// Base64 encoded bytes.
    pub data: String,
}

impl Blob {
    /// Create a blob from raw bytes.
    #[must_use]
    pub fn new(mime_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: BASE64.encode(data),
        }
    }

    /// Create a 16-bit PCM audio blob at the given sample rate.
    #[must_use]
    pub fn pcm(data: &[u8], sample_rate: u32) -> Self {
        Self::new(format!("audio/pcm;rate={sample_rate}"), data)
    }

    /// Decode the base64 payload.
    ///
    /// # Errors
    /// Returns error if `data` is not valid base64.
    pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.data)
    }
}

/// Marks the start of user activity when automatic detection is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStart {}

/// Marks the end of user activity when automatic detection is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEnd {}

/// Realtime input sent by the browser, forwarded to the live session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    /// Generic media chunk (audio or video).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Blob>,
    /// Audio stream chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    /// Video frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Blob>,
    /// Text typed by the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// The audio stream was paused (e.g. microphone muted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_stream_end: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_start: Option<ActivityStart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_end: Option<ActivityEnd>,
}

impl RealtimeInput {
    /// Text-only input.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Iterate over every blob carried by this input.
    pub fn blobs(&self) -> impl Iterator<Item = (&'static str, &Blob)> {
        [
            ("media", self.media.as_ref()),
            ("audio", self.audio.as_ref()),
            ("video", self.video.as_ref()),
        ]
        .into_iter()
        .filter_map(|(field, blob)| blob.map(|b| (field, b)))
    }
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    /// Correlation id; echoed back in the matching response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Declared function name.
    pub name: String,
    /// Call arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
}

/// Batch of function calls emitted in one server message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// Result of one function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

impl FunctionResponse {
    /// Build a response correlated with `call`.
    #[must_use]
    pub fn for_call(call: &FunctionCall, response: Value) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response,
        }
    }
}

/// Batch of function responses, sent back on the live session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    #[serde(default)]
    pub function_responses: Vec<FunctionResponse>,
}

/// The server withdrew previously issued function calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// The server will disconnect soon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_left: Option<String>,
}

/// One part of a model turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A model turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Content generated by the model, destined for the browser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerContent {
    /// Concatenated text of the model turn, if any.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        let parts = &self.model_turn.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.is_empty()).then_some(text)
    }
}

/// One message received from the live session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<GoAway>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_resumption_update: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerMessage {
    /// Message carrying only server content.
    #[must_use]
    pub fn content(content: ServerContent) -> Self {
        Self {
            server_content: Some(content),
            ..Self::default()
        }
    }

    /// Message carrying only a tool call.
    #[must_use]
    pub fn tool_call(function_calls: Vec<FunctionCall>) -> Self {
        Self {
            tool_call: Some(ToolCall { function_calls }),
            ..Self::default()
        }
    }

    /// Short label for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        if self.tool_call.is_some() {
            "tool_call"
        } else if self.server_content.is_some() {
            "server_content"
        } else if self.setup_complete.is_some() {
            "setup_complete"
        } else if self.tool_call_cancellation.is_some() {
            "tool_call_cancellation"
        } else if self.go_away.is_some() {
            "go_away"
        } else if self.usage_metadata.is_some() {
            "usage_metadata"
        } else if self.session_resumption_update.is_some() {
            "session_resumption_update"
        } else {
            "other"
        }
    }
}
