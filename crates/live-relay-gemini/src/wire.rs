//! Client-to-server messages of the `BidiGenerateContent` protocol.

use live_relay_core::{
    LiveConnectConfig, RealtimeInput, ToolResponse,
    config::{RealtimeInputConfig, Tool},
    protocol::{ActivityEnd, ActivityStart, Blob},
};
use serde::Serialize;

/// Top-level client message; serialises as `{"<variant>": {...}}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage<'a> {
    Setup(Setup<'a>),
    RealtimeInput(WireRealtimeInput),
    ToolResponse(&'a ToolResponse),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup<'a> {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Tool]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input_config: Option<&'a RealtimeInputConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: &'a [String],
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

impl<'a> Setup<'a> {
    #[must_use]
    pub fn new(model: &str, config: &'a LiveConnectConfig) -> Self {
        Self {
            model: model_resource_name(model),
            generation_config: (!config.response_modalities.is_empty()).then(|| {
                GenerationConfig {
                    response_modalities: &config.response_modalities,
                }
            }),
            system_instruction: config.system_instruction.as_deref().map(|text| {
                SystemInstruction {
                    parts: [TextPart { text }],
                }
            }),
            tools: (!config.tools.is_empty()).then_some(config.tools.as_slice()),
            realtime_input_config: config.realtime_input_config.as_ref(),
        }
    }
}

/// Bare model ids are resolved under `models/`.
#[must_use]
pub fn model_resource_name(model: &str) -> String {
    if model.contains('/') {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// Realtime input as the server expects it: generic media travels in
/// `mediaChunks`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRealtimeInput {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    media_chunks: Vec<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_stream_end: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    activity_start: Option<ActivityStart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    activity_end: Option<ActivityEnd>,
}

impl From<RealtimeInput> for WireRealtimeInput {
    fn from(input: RealtimeInput) -> Self {
        Self {
            media_chunks: input.media.into_iter().collect(),
            audio: input.audio,
            video: input.video,
            text: input.text,
            audio_stream_end: input.audio_stream_end,
            activity_start: input.activity_start,
            activity_end: input.activity_end,
        }
    }
}
