//! Contracts for the upstream live session.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    LiveConnectConfig,
    protocol::{RealtimeInput, ServerMessage, ToolResponse},
};

/// Live session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Rejected by server: {0}")]
    Rejected(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Session closed")]
    Closed,
    #[error("Timed out: {0}")]
    Timeout(&'static str),
    #[error("Failed to decode server message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("Failed to encode client message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// An open duplex session with the upstream model.
///
/// Methods take `&self` so one session can be shared by a reader and a
/// writer. Implementations must tolerate `receive` running concurrently with
/// the send methods and with `close`.
#[async_trait]
pub trait LiveSession: Send + Sync {
    /// Wait for the next server message.
    ///
    /// Returns `Ok(None)` once the server has closed the session.
    async fn receive(&self) -> Result<Option<ServerMessage>, SessionError>;

    /// Forward realtime input from the client.
    async fn send_realtime_input(&self, input: RealtimeInput) -> Result<(), SessionError>;

    /// Answer a tool call.
    async fn send_tool_response(&self, response: ToolResponse) -> Result<(), SessionError>;

    /// Close the session. Calling it more than once is a no-op.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Opens live sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a new session for `model`.
    async fn connect(
        &self,
        model: &str,
        config: &LiveConnectConfig,
    ) -> Result<Arc<dyn LiveSession>, SessionError>;
}
