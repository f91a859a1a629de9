//! Gemini Live (`BidiGenerateContent`) over a websocket

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{
    ClientMessage, ProviderConnector, ProviderSink, ProviderStream, ServerEvent, SessionSetup,
};
use crate::tools::{ToolCallRequest, ToolDeclaration};
use crate::{Error, Result};

const ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens Gemini Live sessions
pub struct GeminiConnector {
    api_key: String,
    endpoint: String,
    setup_timeout: Duration,
}

impl GeminiConnector {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: ENDPOINT.to_string(),
            setup_timeout: Duration::from_secs(15),
        }
    }

    /// Use a different websocket endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl ProviderConnector for GeminiConnector {
    async fn connect(
        &self,
        setup: &SessionSetup,
    ) -> Result<(Arc<dyn ProviderSink>, Box<dyn ProviderStream>)> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        tracing::info!(model = %setup.model, voice = %setup.voice, "connecting to Gemini Live");

        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::Provider(format!("websocket connect failed: {e}")))?;
        let (mut write, read) = socket.split();

        write
            .send(Message::Text(setup_message(setup).to_string()))
            .await
            .map_err(|e| Error::Provider(format!("failed to send setup: {e}")))?;

        let mut stream = GeminiStream {
            read,
            queue: VecDeque::new(),
        };

        // Nothing else is valid until the server acknowledges setup
        let ack = tokio::time::timeout(self.setup_timeout, async {
            loop {
                match stream.next_event().await? {
                    Some(ServerEvent::SetupComplete) => return Ok::<(), Error>(()),
                    Some(other) => tracing::debug!(event = ?other, "event before setup ack"),
                    None => {
                        return Err(Error::Provider(
                            "session closed during setup".to_string(),
                        ));
                    }
                }
            }
        })
        .await
        .map_err(|_| Error::Provider("timed out waiting for setup ack".to_string()))?;
        ack?;

        tracing::info!(tools = setup.tools.len(), "Gemini Live session ready");

        let sink = GeminiSink {
            write: Mutex::new(write),
            audio_mime: format!("audio/pcm;rate={}", setup.send_sample_rate),
        };
        Ok((Arc::new(sink), Box::new(stream)))
    }
}

/// Strip JSON Schema keywords the function-declaration schema rejects
fn clean_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !matches!(k.as_str(), "$schema" | "additionalProperties"))
                .map(|(k, v)| (k.clone(), clean_schema(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(clean_schema).collect()),
        other => other.clone(),
    }
}

fn function_declaration(tool: &ToolDeclaration) -> Value {
    let has_properties = tool
        .parameters
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|p| !p.is_empty());

    if has_properties {
        json!({
            "name": tool.name,
            "description": tool.description,
            "parameters": clean_schema(&tool.parameters),
        })
    } else {
        json!({ "name": tool.name, "description": tool.description })
    }
}

/// The first message of every session
#[must_use]
pub fn setup_message(setup: &SessionSetup) -> Value {
    let mut tools = Vec::new();
    if !setup.tools.is_empty() {
        let declarations: Vec<Value> = setup.tools.iter().map(function_declaration).collect();
        tools.push(json!({ "functionDeclarations": declarations }));
    }
    if setup.google_search {
        tools.push(json!({ "googleSearch": {} }));
    }

    json!({
        "setup": {
            "model": setup.model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": setup.voice }
                    }
                }
            },
            "systemInstruction": {
                "role": "user",
                "parts": [{ "text": setup.system_instruction }]
            },
            "tools": tools,
            "realtimeInputConfig": {
                "automaticActivityDetection": { "disabled": true }
            },
            "contextWindowCompression": {
                "triggerTokens": 25_600,
                "slidingWindow": { "targetTokens": 12_800 }
            },
            "inputAudioTranscription": {},
            "outputAudioTranscription": {}
        }
    })
}

/// Wire form of an outbound message
#[must_use]
pub fn client_message(message: &ClientMessage, audio_mime: &str) -> Value {
    match message {
        ClientMessage::Audio(pcm) => json!({
            "realtimeInput": {
                "audio": { "data": BASE64.encode(pcm), "mimeType": audio_mime }
            }
        }),
        ClientMessage::ActivityStart => json!({ "realtimeInput": { "activityStart": {} } }),
        ClientMessage::ActivityEnd => json!({ "realtimeInput": { "activityEnd": {} } }),
        ClientMessage::Text(text) => json!({
            "clientContent": {
                "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                "turnComplete": true
            }
        }),
        ClientMessage::ToolResponses(responses) => {
            let function_responses: Vec<Value> = responses
                .iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "name": r.name,
                        "response": r.result.to_response(),
                    })
                })
                .collect();
            json!({ "toolResponse": { "functionResponses": function_responses } })
        }
    }
}

/// Events carried by one server message, in order
#[must_use]
pub fn parse_server_message(message: &Value) -> Vec<ServerEvent> {
    let mut events = Vec::new();

    if message.get("setupComplete").is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = message.get("serverContent") {
        if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
            events.push(ServerEvent::Interrupted);
        }

        if let Some(text) = transcription(content, "inputTranscription") {
            events.push(ServerEvent::InputTranscription(text));
        }

        let parts = content
            .pointer("/modelTurn/parts")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            if let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) {
                match BASE64.decode(data) {
                    Ok(pcm) => events.push(ServerEvent::Audio(pcm)),
                    Err(e) => tracing::warn!(error = %e, "dropping undecodable audio part"),
                }
            } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                events.push(ServerEvent::Text(text.to_string()));
            }
        }

        if let Some(text) = transcription(content, "outputTranscription") {
            events.push(ServerEvent::OutputTranscription(text));
        }

        if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(calls) = message.pointer("/toolCall/functionCalls").and_then(Value::as_array) {
        let requests: Vec<ToolCallRequest> = calls
            .iter()
            .map(|call| ToolCallRequest {
                id: call.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                name: call.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                args: call.get("args").cloned().unwrap_or(Value::Null),
            })
            .collect();
        events.push(ServerEvent::ToolCalls(requests));
    }

    if let Some(ids) = message.pointer("/toolCallCancellation/ids").and_then(Value::as_array) {
        let ids = ids
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        events.push(ServerEvent::ToolCallCancellation(ids));
    }

    if let Some(go_away) = message.get("goAway") {
        events.push(ServerEvent::GoAway {
            time_left: go_away
                .get("timeLeft")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    events
}

fn transcription(content: &Value, key: &str) -> Option<String> {
    content
        .get(key)
        .and_then(|t| t.get("text"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

struct GeminiSink {
    write: Mutex<SplitSink<Socket, Message>>,
    audio_mime: String,
}

#[async_trait]
impl ProviderSink for GeminiSink {
    async fn send(&self, message: ClientMessage) -> Result<()> {
        let payload = client_message(&message, &self.audio_mime).to_string();
        self.write
            .lock()
            .await
            .send(Message::Text(payload))
            .await
            .map_err(|e| Error::Provider(format!("send failed: {e}")))
    }

    async fn close(&self) -> Result<()> {
        let mut write = self.write.lock().await;
        // The peer may already be gone
        let _ = write.send(Message::Close(None)).await;
        write.close().await.ok();
        tracing::debug!("Gemini Live session closed");
        Ok(())
    }
}

struct GeminiStream {
    read: SplitStream<Socket>,
    queue: VecDeque<ServerEvent>,
}

impl GeminiStream {
    fn enqueue(&mut self, raw: &[u8]) {
        match serde_json::from_slice::<Value>(raw) {
            Ok(message) => self.queue.extend(parse_server_message(&message)),
            Err(e) => tracing::warn!(error = %e, "ignoring malformed server message"),
        }
    }
}

#[async_trait]
impl ProviderStream for GeminiStream {
    async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Ok(Some(event));
            }

            let Some(frame) = self.read.next().await else {
                return Ok(None);
            };

            match frame.map_err(|e| Error::Provider(format!("receive failed: {e}")))? {
                Message::Text(text) => self.enqueue(text.as_bytes()),
                Message::Binary(bytes) => self.enqueue(&bytes),
                Message::Close(frame) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    tracing::info!(reason = %reason, "server closed the session");
                    if reason.is_empty() {
                        return Ok(None);
                    }
                    return Err(Error::Provider(format!("session closed: {reason}")));
                }
                _ => {}
            }
        }
    }
}
