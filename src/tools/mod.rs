//! Tool contract, registry and dispatch boundary

mod diagnostic;
pub mod dispatch;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::Result;

pub use diagnostic::SecretKeyTool;
pub use dispatch::dispatch;
pub use registry::{ToolRegistry, build_registry};

/// A tool advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Unique tool name
    pub name: String,

    /// Human readable description shown to the model
    pub description: String,

    /// JSON Schema object describing the arguments
    pub parameters: Value,
}

impl ToolDeclaration {
    /// Create a declaration
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Create a declaration that takes no arguments
    #[must_use]
    pub fn without_parameters(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(
            name,
            description,
            json!({ "type": "object", "properties": {} }),
        )
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider correlation id, echoed in the response
    pub id: String,

    /// Tool name
    pub name: String,

    /// Arguments object
    #[serde(default)]
    pub args: Value,
}

/// Outcome of a tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Result returned to the model for exactly one [`ToolCallRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub status: ToolStatus,

    /// Structured data for the model
    #[serde(default)]
    pub payload: Value,

    /// Human readable summary
    #[serde(default)]
    pub message: String,
}

impl ToolCallResult {
    /// Successful result with a payload and message
    #[must_use]
    pub fn success(payload: Value, message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            payload,
            message: message.into(),
        }
    }

    /// Error result with a message and no payload
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            payload: Value::Null,
            message: message.into(),
        }
    }

    /// Whether the call succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// Render as the response object sent back to the model
    ///
    /// Payload object fields are flattened next to `status` and `message`.
    #[must_use]
    pub fn to_response(&self) -> Value {
        let mut response = serde_json::Map::new();
        if let Value::Object(fields) = &self.payload {
            response.extend(fields.clone());
        } else if !self.payload.is_null() {
            response.insert("result".to_string(), self.payload.clone());
        }
        response.insert("status".to_string(), json!(self.status));
        if !self.message.is_empty() {
            response.insert("message".to_string(), json!(self.message));
        }
        Value::Object(response)
    }
}

/// A callable tool
///
/// Handlers return `Err` for failures; the dispatch boundary turns every
/// error into an error [`ToolCallResult`].
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invoke the tool with the model-supplied arguments
    async fn invoke(&self, args: Value) -> Result<ToolCallResult>;
}

/// Read a required string argument
///
/// # Errors
///
/// Returns error if the argument is missing or not a string
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| crate::Error::Tool(format!("missing required argument: {key}")))
}

/// Read an optional string argument
#[must_use]
pub fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
