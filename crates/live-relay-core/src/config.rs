//! Configuration for opening a live session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How eagerly the server detects the start of speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartSensitivity {
    StartSensitivityHigh,
    StartSensitivityLow,
}

/// How eagerly the server detects the end of speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndSensitivity {
    EndSensitivityHigh,
    EndSensitivityLow,
}

/// Server-side voice activity detection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticActivityDetection {
    /// Disable detection; the client then sends activity start/end itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_of_speech_sensitivity: Option<StartSensitivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_of_speech_sensitivity: Option<EndSensitivity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,
    /// Silence required before speech is considered finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic_activity_detection: Option<AutomaticActivityDetection>,
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl FunctionDeclaration {
    /// Declaration without description or parameters.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(default)]
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Options passed to a [`SessionFactory`](crate::SessionFactory) when opening
/// a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveConnectConfig {
    pub realtime_input_config: Option<RealtimeInputConfig>,
    pub tools: Vec<Tool>,
    /// e.g. `["AUDIO"]` or `["TEXT"]`; server default when empty.
    pub response_modalities: Vec<String>,
    pub system_instruction: Option<String>,
}

impl LiveConnectConfig {
    /// Low end-of-speech sensitivity, 200 ms of silence, and a single
    /// `turn_on_the_lights` function.
    #[must_use]
    pub fn default_demo() -> Self {
        Self {
            realtime_input_config: Some(RealtimeInputConfig {
                automatic_activity_detection: Some(AutomaticActivityDetection {
                    end_of_speech_sensitivity: Some(EndSensitivity::EndSensitivityLow),
                    silence_duration_ms: Some(200),
                    ..AutomaticActivityDetection::default()
                }),
            }),
            tools: vec![Tool {
                function_declarations: vec![FunctionDeclaration::named("turn_on_the_lights")],
            }],
            ..Self::default()
        }
    }

    /// Names of every declared function.
    pub fn declared_functions(&self) -> impl Iterator<Item = &str> {
        self.tools
            .iter()
            .flat_map(|t| t.function_declarations.iter())
            .map(|d| d.name.as_str())
    }
}
