//! Dispatch boundary: every request yields exactly one result

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;

use super::{ToolCallRequest, ToolCallResult, ToolRegistry};
use crate::Error;

/// Invoke the tool named by `request`
///
/// Never fails: unknown tools, handler errors, panics and timeouts all become
/// error results so the session can continue.
pub async fn dispatch(
    registry: &ToolRegistry,
    request: &ToolCallRequest,
    timeout: Duration,
) -> ToolCallResult {
    let handler = match registry.resolve(&request.name) {
        Ok(handler) => handler,
        Err(Error::ToolNotFound(name)) => {
            tracing::warn!(tool = %name, id = %request.id, "model called unknown tool");
            return ToolCallResult::error(format!("Unknown function: {name}"));
        }
        Err(e) => return ToolCallResult::error(e.to_string()),
    };

    let args = if request.args.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        request.args.clone()
    };

    tracing::info!(tool = %request.name, id = %request.id, "dispatching tool call");

    let invocation = AssertUnwindSafe(handler.invoke(args)).catch_unwind();
    match tokio::time::timeout(timeout, invocation).await {
        Ok(Ok(Ok(result))) => {
            tracing::debug!(tool = %request.name, status = ?result.status, "tool call finished");
            result
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(tool = %request.name, error = %e, "tool call failed");
            ToolCallResult::error(handler_message(e))
        }
        Ok(Err(_)) => {
            tracing::error!(tool = %request.name, id = %request.id, "tool handler panicked");
            ToolCallResult::error(format!("tool {} panicked", request.name))
        }
        Err(_) => {
            tracing::warn!(tool = %request.name, timeout_secs = timeout.as_secs(), "tool call timed out");
            ToolCallResult::error(format!(
                "tool {} timed out after {}s",
                request.name,
                timeout.as_secs()
            ))
        }
    }
}

/// Strip the variant prefix from handler errors the model sees
fn handler_message(error: Error) -> String {
    match error {
        Error::Tool(msg) | Error::Integration(msg) | Error::Transport(msg) => msg,
        other => other.to_string(),
    }
}
