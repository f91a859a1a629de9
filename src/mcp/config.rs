//! MCP server list (`{"mcpServers": {...}}`)

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

/// How to launch one MCP server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct McpServerConfig {
    /// Executable to run
    pub command: String,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct McpServersFile {
    #[serde(rename = "mcpServers", default)]
    servers: IndexMap<String, McpServerConfig>,
}

/// Parse a server list document
///
/// # Errors
///
/// Returns error if the document is not valid JSON of the expected shape
pub fn parse_servers(raw: &str) -> crate::Result<IndexMap<String, McpServerConfig>> {
    let file: McpServersFile = serde_json::from_str(raw)?;
    Ok(file.servers)
}

/// Load the server list, in file order
///
/// A missing file yields no servers. An unreadable or malformed file is
/// logged and also yields no servers.
#[must_use]
pub fn load_servers(path: &Path) -> IndexMap<String, McpServerConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no MCP server config, skipping MCP");
            return IndexMap::new();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read MCP server config");
            return IndexMap::new();
        }
    };

    match parse_servers(&raw) {
        Ok(servers) => {
            tracing::info!(path = %path.display(), count = servers.len(), "loaded MCP server config");
            servers
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid MCP server config, skipping MCP");
            IndexMap::new()
        }
    }
}
