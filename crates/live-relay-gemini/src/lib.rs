//! Gemini Live upstream for the live relay.
//!
//! Provides:
//! - `GeminiClient` - a `SessionFactory` speaking `BidiGenerateContent`
//! - `GeminiSession` - the resulting `LiveSession`

pub mod client;
pub mod session;
pub mod wire;

pub use client::{ClientConfig, DEFAULT_API_VERSION, DEFAULT_ENDPOINT, GeminiClient};
pub use session::GeminiSession;
