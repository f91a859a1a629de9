//! Shared test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};

use roomey::audio::{AudioSink, FrameSource};
use roomey::provider::{
    ClientMessage, ProviderConnector, ProviderSink, ProviderStream, ServerEvent, SessionSetup,
};
use roomey::tools::{ToolCallRequest, ToolCallResult, ToolDeclaration, ToolHandler};
use roomey::{Error, Result};

/// How long tests wait for an expected message before failing
pub const WAIT: Duration = Duration::from_secs(5);

/// A scripted provider: tests push server events and inspect what was sent
pub struct MockConnector {
    stream: Mutex<Option<MockStream>>,
    sink: Arc<MockSink>,
    refuse: bool,
    setups: Mutex<Vec<SessionSetup>>,
}

/// Test-side handle to a [`MockConnector`]
pub struct ProviderHandle {
    events: mpsc::UnboundedSender<std::result::Result<ServerEvent, String>>,
    sink: Arc<MockSink>,
    connector: Arc<MockConnector>,
}

/// Create a connected mock provider
pub fn mock_provider() -> (Arc<dyn ProviderConnector>, ProviderHandle) {
    build_provider(false)
}

/// Create a provider whose connect always fails
pub fn refusing_provider() -> (Arc<dyn ProviderConnector>, ProviderHandle) {
    build_provider(true)
}

fn build_provider(refuse: bool) -> (Arc<dyn ProviderConnector>, ProviderHandle) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (sent, _) = watch::channel(Vec::new());
    let sink = Arc::new(MockSink {
        sent,
        closed: AtomicBool::new(false),
    });
    let connector = Arc::new(MockConnector {
        stream: Mutex::new(Some(MockStream { events: events_rx })),
        sink: Arc::clone(&sink),
        refuse,
        setups: Mutex::new(Vec::new()),
    });

    let handle = ProviderHandle {
        events: events_tx,
        sink,
        connector: Arc::clone(&connector),
    };
    let connector: Arc<dyn ProviderConnector> = connector;
    (connector, handle)
}

impl ProviderHandle {
    /// Deliver a server event to the session
    pub fn emit(&self, event: ServerEvent) {
        self.events.send(Ok(event)).expect("session stream dropped");
    }

    /// Make the stream fail as if the socket broke
    pub fn fail(&self, message: &str) {
        self.events
            .send(Err(message.to_string()))
            .expect("session stream dropped");
    }

    /// Everything the session has sent so far
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sink.sent.borrow().clone()
    }

    /// Wait until the sent messages satisfy `condition`
    pub async fn wait_for<F>(&self, condition: F) -> Vec<ClientMessage>
    where
        F: Fn(&[ClientMessage]) -> bool,
    {
        let mut rx = self.sink.sent.subscribe();
        let sent = tokio::time::timeout(WAIT, rx.wait_for(|sent| condition(sent)))
            .await
            .expect("timed out waiting for provider messages")
            .expect("sink dropped");
        sent.clone()
    }

    /// Wait for the first tool response and return it
    pub async fn next_tool_response(&self, already_seen: usize) -> Vec<roomey::provider::ToolResponse> {
        let sent = self
            .wait_for(|sent| tool_responses(sent).len() > already_seen)
            .await;
        tool_responses(&sent)
            .into_iter()
            .nth(already_seen)
            .expect("tool response present")
    }

    pub fn closed(&self) -> bool {
        self.sink.closed.load(Ordering::SeqCst)
    }

    /// Setup messages received by the connector
    pub fn setups(&self) -> Vec<SessionSetup> {
        self.connector.setups.lock().unwrap().clone()
    }
}

/// All tool responses in `sent`, in order
pub fn tool_responses(sent: &[ClientMessage]) -> Vec<Vec<roomey::provider::ToolResponse>> {
    sent.iter()
        .filter_map(|m| match m {
            ClientMessage::ToolResponses(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}

/// Count messages matching `predicate`
pub fn count(sent: &[ClientMessage], predicate: impl Fn(&ClientMessage) -> bool) -> usize {
    sent.iter().filter(|m| predicate(m)).count()
}

#[async_trait]
impl ProviderConnector for MockConnector {
    async fn connect(
        &self,
        setup: &SessionSetup,
    ) -> Result<(Arc<dyn ProviderSink>, Box<dyn ProviderStream>)> {
        self.setups.lock().unwrap().push(setup.clone());
        if self.refuse {
            return Err(Error::Provider("connection refused".to_string()));
        }
        let stream = self
            .stream
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Provider("already connected".to_string()))?;
        let sink: Arc<dyn ProviderSink> = Arc::clone(&self.sink) as Arc<dyn ProviderSink>;
        Ok((sink, Box::new(stream)))
    }
}

pub struct MockSink {
    sent: watch::Sender<Vec<ClientMessage>>,
    closed: AtomicBool,
}

#[async_trait]
impl ProviderSink for MockSink {
    async fn send(&self, message: ClientMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Provider("session closed".to_string()));
        }
        self.sent.send_modify(|sent| sent.push(message));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockStream {
    events: mpsc::UnboundedReceiver<std::result::Result<ServerEvent, String>>,
}

#[async_trait]
impl ProviderStream for MockStream {
    async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        match self.events.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(message)) => Err(Error::Provider(message)),
            None => Ok(None),
        }
    }
}

/// Microphone stand-in producing a small frame every 10ms
pub struct TickingSource;

#[async_trait]
impl FrameSource for TickingSource {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Some(vec![1, 0, 2, 0]))
    }
}

/// Microphone that yields a few frames and then goes away
pub struct FiniteSource(pub usize);

#[async_trait]
impl FrameSource for FiniteSource {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.0 == 0 {
            return Ok(None);
        }
        self.0 -= 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Some(vec![1, 0, 2, 0]))
    }
}

/// Speaker stand-in recording what it played
pub struct RecordingSink {
    played: Arc<Mutex<Vec<Vec<u8>>>>,
    delay: Duration,
}

impl RecordingSink {
    pub fn new(delay: Duration) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
        let played = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                played: Arc::clone(&played),
                delay,
            },
            played,
        )
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&mut self, pcm: Vec<u8>) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.played.lock().unwrap().push(pcm);
        Ok(())
    }
}

/// Speaker that never finishes a chunk
pub struct StuckSink;

#[async_trait]
impl AudioSink for StuckSink {
    async fn play(&mut self, _pcm: Vec<u8>) -> Result<()> {
        std::future::pending().await
    }
}

/// Speaker whose driver panics on the first chunk
pub struct PanickingSink;

#[async_trait]
impl AudioSink for PanickingSink {
    async fn play(&mut self, _pcm: Vec<u8>) -> Result<()> {
        panic!("speaker driver bug");
    }
}

/// Tool returning its arguments
pub struct EchoTool;

impl EchoTool {
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::new(
            "echo",
            "Echo the arguments back",
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } }
            }),
        )
    }
}

#[async_trait]
impl ToolHandler for EchoTool {
    async fn invoke(&self, args: Value) -> Result<ToolCallResult> {
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default().to_string();
        Ok(ToolCallResult::success(args, text))
    }
}

/// Tool that always fails
pub struct FailingTool;

impl FailingTool {
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::without_parameters("explode", "Always fails")
    }
}

#[async_trait]
impl ToolHandler for FailingTool {
    async fn invoke(&self, _args: Value) -> Result<ToolCallResult> {
        Err(Error::Tool("boom".to_string()))
    }
}

/// Tool whose handler panics
pub struct PanickingTool;

impl PanickingTool {
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::without_parameters("crash", "Panics")
    }
}

#[async_trait]
impl ToolHandler for PanickingTool {
    async fn invoke(&self, _args: Value) -> Result<ToolCallResult> {
        panic!("tool bug");
    }
}

/// Tool that takes a while
pub struct SlowTool(pub Duration);

impl SlowTool {
    pub fn declaration() -> ToolDeclaration {
        ToolDeclaration::without_parameters("slow", "Takes its time")
    }
}

#[async_trait]
impl ToolHandler for SlowTool {
    async fn invoke(&self, _args: Value) -> Result<ToolCallResult> {
        tokio::time::sleep(self.0).await;
        Ok(ToolCallResult::success(json!({}), "done"))
    }
}

/// A tool call request
pub fn call(id: &str, name: &str, args: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        args,
    }
}
