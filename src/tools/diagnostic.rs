//! Diagnostic tool that echoes the configured secret key

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ToolCallResult, ToolDeclaration, ToolHandler};
use crate::Result;

/// `get_secret_key`: returns the configured secret key
///
/// Used to verify end to end that the model can call tools.
pub struct SecretKeyTool {
    secret: Option<String>,
}

impl SecretKeyTool {
    #[must_use]
    pub const fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    #[must_use]
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::without_parameters(
            "get_secret_key",
            "Returns the secret key configured for this assistant. Use when the user asks for the secret key.",
        )
    }
}

#[async_trait]
impl ToolHandler for SecretKeyTool {
    async fn invoke(&self, _args: Value) -> Result<ToolCallResult> {
        Ok(match &self.secret {
            Some(key) => ToolCallResult::success(json!({ "secret_key": key }), "Secret key retrieved."),
            None => ToolCallResult::error("No secret key is configured."),
        })
    }
}
