//! Core building blocks for relaying a browser socket to a live model session.
//!
//! This crate provides:
//! - Wire types for realtime input, server messages and tool calls
//! - `translate` - decoding, encoding and classification of messages
//! - `ToolHandler` - pluggable execution of model function calls
//! - `LiveSession` / `SessionFactory` - the upstream session contract

pub mod config;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod translate;

pub use config::LiveConnectConfig;
pub use protocol::{RealtimeInput, ServerMessage, ToolCall, ToolResponse};
pub use session::{LiveSession, SessionError, SessionFactory};
pub use tools::{AcknowledgeHandler, ToolError, ToolHandler, ToolRegistry};
pub use translate::{Classified, CodecError, ForwardPolicy};
