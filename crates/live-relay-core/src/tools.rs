//! Pluggable execution of function calls requested by the model.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

use crate::protocol::FunctionCall;

/// Tool execution error.
///
/// Never fatal to a relay: the failure is reported back to the model as the
/// function's response payload.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Function call timed out")]
    TimedOut,
    #[error("Function failed: {0}")]
    Failed(String),
}

impl ToolError {
    /// Payload sent back to the model in place of a result.
    #[must_use]
    pub fn to_response(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

/// Trait for executing function calls.
///
/// Implement this trait to give the model real tools. The relay calls it
/// once per function call and always answers the model, whatever the result.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute one function call and return its response payload.
    async fn call(&self, call: &FunctionCall) -> Result<Value, ToolError>;

    /// Whether calls to `name` reach a real handler.
    fn handles(&self, _name: &str) -> bool {
        true
    }
}

/// Handler that acknowledges every call without doing anything.
#[derive(Debug, Default, Clone)]
pub struct AcknowledgeHandler;

#[async_trait]
impl ToolHandler for AcknowledgeHandler {
    async fn call(&self, _call: &FunctionCall) -> Result<Value, ToolError> {
        Ok(json!({ "ok": "true" }))
    }
}

/// Adapter turning a synchronous closure into a [`ToolHandler`].
pub struct FnToolHandler<F>(F);

impl<F> FnToolHandler<F>
where
    F: Fn(&FunctionCall) -> Result<Value, ToolError> + Send + Sync,
{
    #[must_use]
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> ToolHandler for FnToolHandler<F>
where
    F: Fn(&FunctionCall) -> Result<Value, ToolError> + Send + Sync,
{
    async fn call(&self, call: &FunctionCall) -> Result<Value, ToolError> {
        (self.0)(call)
    }
}

/// Dispatches calls to per-function handlers by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `name`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        self.register(name, handler);
        self
    }

    /// Register a handler for `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, handler: impl ToolHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

}

#[async_trait]
impl ToolHandler for ToolRegistry {
    async fn call(&self, call: &FunctionCall) -> Result<Value, ToolError> {
        let handler = self
            .handlers
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownFunction(call.name.clone()))?;
        handler.call(call).await
    }

    fn handles(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}
