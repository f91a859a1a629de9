//! Roomey - a push-to-talk voice assistant on a realtime model session
//!
//! This library provides:
//! - The live provider session (Gemini Live over a websocket)
//! - The session orchestrator: capture, model events and playback under a
//!   push-to-talk gate
//! - The tool registry and its dispatch boundary
//! - Tool integrations (calendar, Home Assistant, reminders, post formatter)
//! - An MCP stdio client that exposes server tools through the registry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Keys  │  Microphone  │  Speaker         │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Session orchestrator                 │
//! │   capture  │  provider reader  │  playback  │ text  │
//! └──────────┬─────────────────────────────┬────────────┘
//!            │                             │
//! ┌──────────▼──────────┐   ┌──────────────▼────────────┐
//! │   Provider session  │   │  Tool registry / dispatch │
//! │    (Gemini Live)    │   │  integrations  │  MCP     │
//! └─────────────────────┘   └───────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod integrations;
pub mod keys;
pub mod mcp;
pub mod provider;
pub mod session;
pub mod setup;
pub mod tools;
pub mod transcript;

pub use config::Config;
pub use error::{Error, Result};
pub use mcp::McpLauncher;
pub use provider::{GeminiConnector, ProviderConnector};
pub use session::{RecordingState, Session, SessionOptions, SessionState};
pub use tools::{ToolCallRequest, ToolCallResult, ToolDeclaration, ToolHandler, ToolRegistry};
pub use transcript::TranscriptLog;
