//! Launches configured MCP servers and exposes their tools

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};

use super::config::{McpServerConfig, load_servers};
use super::transport::StdioTransport;
use crate::tools::{ToolCallResult, ToolDeclaration, ToolHandler, ToolRegistry};
use crate::{Error, Result};

/// MCP protocol revision sent in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A tool advertised by an MCP server
#[derive(Debug, Clone, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Deserialize)]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<McpTool>,
    #[serde(rename = "nextCursor")]
    next_cursor: Option<String>,
}

/// Registry name for a server's tool
#[must_use]
pub fn tool_name(server: &str, tool: &str) -> String {
    format!("mcp_{server}_{tool}")
}

/// A running server and the tools it advertised
pub struct McpServerHandle {
    pub name: String,
    pub transport: Arc<StdioTransport>,
    pub tools: Vec<McpTool>,

    /// Registry names of this server's tools, filled by `register_tools`
    pub registered: Vec<String>,
}

impl McpServerHandle {
    /// Spawn the server, run the handshake and list its tools
    ///
    /// The whole sequence is bounded by `timeout`. The child is killed on
    /// any failure.
    ///
    /// # Errors
    ///
    /// Returns `Transport`, `Timeout` or `Tool` if the server cannot be used
    pub async fn connect(name: &str, config: &McpServerConfig, timeout: Duration) -> Result<Self> {
        let transport = Arc::new(StdioTransport::spawn(name, config)?);

        match tokio::time::timeout(timeout, handshake(&transport, timeout)).await {
            Ok(Ok(tools)) => Ok(Self {
                name: name.to_string(),
                transport,
                tools,
                registered: Vec::new(),
            }),
            Ok(Err(e)) => {
                transport.kill().await;
                Err(e)
            }
            Err(_) => {
                transport.kill().await;
                Err(Error::Timeout(format!(
                    "MCP server {name} handshake exceeded {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}

async fn handshake(transport: &StdioTransport, timeout: Duration) -> Result<Vec<McpTool>> {
    let init = transport
        .request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
            timeout,
        )
        .await?;

    let protocol = init
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    tracing::debug!(server = transport.name(), protocol, "MCP server initialized");

    transport.notify("notifications/initialized", json!({})).await?;

    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let params = cursor.as_ref().map_or_else(|| json!({}), |c| json!({ "cursor": c }));
        let page: ToolsPage =
            serde_json::from_value(transport.request("tools/list", params, timeout).await?)?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok(tools)
}

/// Forwards calls for one MCP tool over its server's transport
pub struct McpToolHandler {
    server: String,
    tool: String,
    transport: Arc<StdioTransport>,
    timeout: Duration,
}

impl McpToolHandler {
    #[must_use]
    pub fn new(server: &str, tool: &str, transport: Arc<StdioTransport>, timeout: Duration) -> Self {
        Self {
            server: server.to_string(),
            tool: tool.to_string(),
            transport,
            timeout,
        }
    }
}

/// Join the text parts of MCP `content`
fn content_text(content: &[Value]) -> String {
    content
        .iter()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convert a `tools/call` result into a tool result
///
/// # Errors
///
/// Returns `Tool` when the server flags the result with `isError`
fn call_result(server: &str, tool: &str, result: &Value) -> Result<ToolCallResult> {
    let content = result
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let text = content_text(&content);

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        let message = if text.is_empty() {
            format!("{tool} on {server} reported an error")
        } else {
            text
        };
        return Err(Error::Tool(message));
    }

    Ok(ToolCallResult::success(json!({ "content": content }), text))
}

#[async_trait]
impl ToolHandler for McpToolHandler {
    async fn invoke(&self, args: Value) -> Result<ToolCallResult> {
        if !self.transport.is_alive() {
            return Err(Error::Transport(format!(
                "MCP server {} is no longer running",
                self.server
            )));
        }

        let result = self
            .transport
            .request(
                "tools/call",
                json!({ "name": self.tool, "arguments": args }),
                self.timeout,
            )
            .await?;
        call_result(&self.server, &self.tool, &result)
    }
}

/// Running MCP servers, keyed by config name
#[derive(Default)]
pub struct McpLauncher {
    servers: Mutex<IndexMap<String, McpServerHandle>>,
}

impl McpLauncher {
    /// Launch every server listed in the config file at `path`
    ///
    /// Servers that fail to start are skipped with a warning.
    pub async fn start(path: &Path, handshake_timeout: Duration) -> Self {
        Self::start_servers(load_servers(path), handshake_timeout).await
    }

    /// Launch the given servers, in order
    pub async fn start_servers(
        configs: IndexMap<String, McpServerConfig>,
        handshake_timeout: Duration,
    ) -> Self {
        let mut servers = IndexMap::new();

        for (name, config) in configs {
            match McpServerHandle::connect(&name, &config, handshake_timeout).await {
                Ok(handle) => {
                    tracing::info!(server = %name, tools = handle.tools.len(), "connected to MCP server");
                    servers.insert(name, handle);
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "skipping MCP server");
                }
            }
        }

        Self {
            servers: Mutex::new(servers),
        }
    }

    /// Names of connected servers
    #[must_use]
    pub fn server_names(&self) -> Vec<String> {
        self.servers
            .lock()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.lock().map(|s| s.is_empty()).unwrap_or(true)
    }

    /// Register every discovered tool as `mcp_<server>_<tool>`
    ///
    /// Returns the number of tools registered.
    ///
    /// # Errors
    ///
    /// Returns error if the registry rejects a name
    pub fn register_tools(&self, registry: &mut ToolRegistry, call_timeout: Duration) -> Result<usize> {
        let mut servers = self
            .servers
            .lock()
            .map_err(|_| Error::Transport("MCP server table poisoned".to_string()))?;

        let mut count = 0;
        for handle in servers.values_mut() {
            let mut registered = Vec::with_capacity(handle.tools.len());
            for tool in &handle.tools {
                let name = tool_name(&handle.name, &tool.name);
                let description = format!(
                    "Tool from {} server: {}",
                    handle.name,
                    tool.description.as_deref().unwrap_or_default()
                );
                registry.register(
                    ToolDeclaration::new(name.clone(), description, tool.input_schema.clone()),
                    Arc::new(McpToolHandler::new(
                        &handle.name,
                        &tool.name,
                        Arc::clone(&handle.transport),
                        call_timeout,
                    )),
                )?;
                registered.push(name);
                count += 1;
            }
            handle.registered = registered;
        }
        Ok(count)
    }

    /// Drop servers whose transport died and unregister their tools
    ///
    /// Returns the names of the pruned servers.
    pub fn prune_dead(&self, registry: &mut ToolRegistry) -> Vec<String> {
        let Ok(mut servers) = self.servers.lock() else {
            return Vec::new();
        };

        let dead: Vec<String> = servers
            .values()
            .filter(|h| !h.transport.is_alive())
            .map(|h| h.name.clone())
            .collect();

        for name in &dead {
            let Some(handle) = servers.shift_remove(name) else {
                continue;
            };
            let removed = handle
                .registered
                .iter()
                .filter(|tool| registry.unregister(tool))
                .count();
            tracing::warn!(server = %name, removed, "MCP server died, removed its tools");
        }
        dead
    }

    /// Stop every server within `grace`
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<McpServerHandle> = match self.servers.lock() {
            Ok(mut servers) => servers.drain(..).map(|(_, h)| h).collect(),
            Err(_) => return,
        };
        if handles.is_empty() {
            return;
        }

        tracing::info!(servers = handles.len(), "stopping MCP servers");
        futures::future::join_all(handles.iter().map(|h| h.transport.shutdown(grace))).await;
    }
}
