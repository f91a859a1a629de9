//! Error types for Roomey

use thiserror::Error;

/// Result type alias for Roomey operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Roomey
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Tool name is not registered
    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    /// Tool name registered twice on a strict registry
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    /// A tool handler failed (network, auth, bad input)
    #[error("tool error: {0}")]
    Tool(String),

    /// Integration API error (calendar, Home Assistant, `OpenRouter`)
    #[error("integration error: {0}")]
    Integration(String),

    /// MCP subprocess transport failure (spawn, handshake, dead pipe)
    #[error("mcp transport error: {0}")]
    Transport(String),

    /// Operation exceeded its time bound
    #[error("timed out: {0}")]
    Timeout(String),

    /// Model provider session failure; fatal to the current run
    #[error("provider error: {0}")]
    Provider(String),

    /// A session task panicked
    #[error("session task failed: {0}")]
    Session(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Websocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Whether this error should end the current run
    ///
    /// Only provider-session and session-task failures are fatal; everything
    /// else is reported back to the model as an error tool result.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::WebSocket(_) | Self::Session(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_provider_errors_are_fatal() {
        assert!(Error::Provider("socket closed".to_string()).is_fatal());
        assert!(Error::Session("reader panicked".to_string()).is_fatal());
        assert!(!Error::ToolNotFound("add_reminder".to_string()).is_fatal());
        assert!(!Error::Transport("broken pipe".to_string()).is_fatal());
        assert!(!Error::Tool("bad input".to_string()).is_fatal());
    }

    #[test]
    fn messages_name_the_tool() {
        let err = Error::ToolNotFound("mcp_fs_read".to_string());
        assert_eq!(err.to_string(), "unknown tool: mcp_fs_read");
    }
}
