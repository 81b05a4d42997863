//! Translation between browser frames and live session messages.
//!
//! Everything here is free of I/O except [`build_tool_responses`], which
//! awaits the configured [`ToolHandler`].

use std::time::Duration;

use futures::future;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    protocol::{
        FunctionCall, FunctionResponse, RealtimeInput, ServerMessage, ToolCall, ToolResponse,
    },
    tools::{ToolError, ToolHandler},
};

/// Codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid base64 in `{field}`: {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },
}

/// Which non tool-call server messages reach the browser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardPolicy {
    /// Only messages carrying server content.
    #[default]
    ContentOnly,
    /// Every message except tool calls.
    All,
}

/// Outcome of [`classify`].
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Must be answered on the live session, never forwarded.
    ToolCalls(ToolCall),
    /// Send to the browser.
    Forward(ServerMessage),
    /// Drop.
    Ignore(ServerMessage),
}

/// Decode one browser frame into realtime input.
///
/// # Errors
/// Returns error if the frame is not a JSON object of the expected shape or
/// if a blob does not carry valid base64.
pub fn decode_client_frame(bytes: &[u8]) -> Result<RealtimeInput, CodecError> {
    let input: RealtimeInput = serde_json::from_slice(bytes)?;
    for (field, blob) in input.blobs() {
        blob.decode_data()
            .map_err(|source| CodecError::Base64 { field, source })?;
    }
    Ok(input)
}

/// Encode a server message for the browser.
///
/// # Errors
/// Returns error if serialization fails.
pub fn encode_server_message(message: &ServerMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decide what the relay does with a server message.
#[must_use]
pub fn classify(mut message: ServerMessage, policy: ForwardPolicy) -> Classified {
    // An empty batch is still a tool call and never reaches the browser.
    let had_tool_call = match message.tool_call.take() {
        Some(call) if !call.function_calls.is_empty() => return Classified::ToolCalls(call),
        other => other.is_some(),
    };

    match policy {
        _ if message.server_content.is_some() => Classified::Forward(message),
        ForwardPolicy::All if !had_tool_call => Classified::Forward(message),
        _ => Classified::Ignore(message),
    }
}

/// Answer every call in `batch`.
///
/// Produces exactly one response per call, in request order, with id and
/// name copied from the request. Handler failures and timeouts become error
/// payloads rather than missing responses.
pub async fn build_tool_responses(
    batch: &ToolCall,
    handler: &dyn ToolHandler,
    timeout: Option<Duration>,
) -> ToolResponse {
    let function_responses =
        future::join_all(batch.function_calls.iter().map(|call| respond(call, handler, timeout)))
            .await;
    ToolResponse { function_responses }
}

async fn respond(
    call: &FunctionCall,
    handler: &dyn ToolHandler,
    timeout: Option<Duration>,
) -> FunctionResponse {
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, handler.call(call))
            .await
            .unwrap_or(Err(ToolError::TimedOut)),
        None => handler.call(call).await,
    };

    let response = result.unwrap_or_else(|e| {
        tracing::warn!(function = %call.name, id = ?call.id, "Function call failed: {e}");
        e.to_response()
    });
    FunctionResponse::for_call(call, response)
}
