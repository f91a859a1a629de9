//! MCP client: launches stdio servers and bridges their tools into the registry

pub mod config;
mod launcher;
mod transport;

pub use config::{McpServerConfig, load_servers, parse_servers};
pub use launcher::{McpLauncher, McpServerHandle, McpTool, McpToolHandler, PROTOCOL_VERSION, tool_name};
pub use transport::StdioTransport;
