//! Realtime model provider session
//!
//! The orchestrator talks to the model through three seams: a
//! [`ProviderConnector`] opens a session and splits it into a
//! [`ProviderSink`] (outbound, shared between tasks) and a
//! [`ProviderStream`] (inbound, owned by the reader task).

pub mod gemini;

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::tools::{ToolCallRequest, ToolCallResult, ToolDeclaration};

pub use gemini::GeminiConnector;

/// Everything sent when a session is opened
#[derive(Debug, Clone)]
pub struct SessionSetup {
    /// Model identifier
    pub model: String,

    /// Prebuilt voice
    pub voice: String,

    /// Full system instruction, tool list included
    pub system_instruction: String,

    /// Tools advertised to the model, in registry order
    pub tools: Vec<ToolDeclaration>,

    /// Also advertise the provider's built-in web search
    pub google_search: bool,

    /// Sample rate of outbound PCM16 audio
    pub send_sample_rate: u32,
}

/// A tool result paired with its request's correlation id
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub result: ToolCallResult,
}

/// Outbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// PCM16 little-endian mono frame at the send rate
    Audio(Vec<u8>),

    /// Push-to-talk pressed
    ActivityStart,

    /// Push-to-talk released
    ActivityEnd,

    /// A complete typed user turn
    Text(String),

    /// Results for one batch of tool calls
    ToolResponses(Vec<ToolResponse>),
}

/// Inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Setup acknowledged
    SetupComplete,

    /// PCM16 little-endian mono chunk at the receive rate
    Audio(Vec<u8>),

    /// Model text
    Text(String),

    /// Transcription of the user's speech
    InputTranscription(String),

    /// Transcription of the model's speech
    OutputTranscription(String),

    /// One batch of tool calls, answered together
    ToolCalls(Vec<ToolCallRequest>),

    /// The model withdrew these tool calls
    ToolCallCancellation(Vec<String>),

    /// The model finished its turn
    TurnComplete,

    /// The user barged in; queued audio is stale
    Interrupted,

    /// The server will close the connection soon
    GoAway { time_left: Option<String> },
}

/// Outbound half of a session
#[async_trait]
pub trait ProviderSink: Send + Sync {
    /// Send one message
    async fn send(&self, message: ClientMessage) -> Result<()>;

    /// Close the session
    async fn close(&self) -> Result<()>;
}

/// Inbound half of a session
#[async_trait]
pub trait ProviderStream: Send {
    /// Next event, or `None` once the server closed the session
    async fn next_event(&mut self) -> Result<Option<ServerEvent>>;
}

/// Opens provider sessions
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Connect and send `setup`
    async fn connect(
        &self,
        setup: &SessionSetup,
    ) -> Result<(Arc<dyn ProviderSink>, Box<dyn ProviderStream>)>;
}

/// Build the system instruction: the prompt, then one line per tool
#[must_use]
pub fn system_instruction(prompt: &str, tools: &[ToolDeclaration], google_search: bool) -> String {
    let mut text = prompt.trim_end().to_string();

    if !tools.is_empty() {
        text.push_str("\nYou have access to the following tools:\n");
        let lines: Vec<String> = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect();
        text.push_str(&lines.join("\n"));
    }

    if google_search {
        text.push_str("\n\nYou also have access to Google Search to find information online.");
        text.push_str("\nDon't mention your origins or google.\n");
    }
    text
}
