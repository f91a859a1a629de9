//! Owns one provider session and runs its tasks

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{RecordingState, SessionState, transition};
use crate::audio::{AudioSink, FrameSource};
use crate::config::{Config, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT, DEFAULT_VOICE};
use crate::keys::echo;
use crate::mcp::McpLauncher;
use crate::provider::{
    ClientMessage, ProviderConnector, ProviderSink, ProviderStream, ServerEvent, SessionSetup,
    ToolResponse, system_instruction,
};
use crate::tools::{ToolCallRequest, ToolRegistry, dispatch};
use crate::transcript::{Speaker, TranscriptLog};
use crate::{Error, Result};

/// Tunables for one session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    pub voice: String,
    pub system_prompt: String,
    pub google_search: bool,
    pub send_sample_rate: u32,

    /// Audio chunks buffered ahead of the speaker
    pub playback_queue: usize,

    pub tool_timeout: Duration,

    /// How long tasks get to finish once closing starts
    pub shutdown_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            google_search: true,
            send_sample_rate: 16_000,
            playback_queue: 64,
            tool_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

impl SessionOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.provider.model.clone(),
            voice: config.provider.voice.clone(),
            system_prompt: config.provider.system_prompt.clone(),
            google_search: config.provider.google_search,
            send_sample_rate: config.audio.send_sample_rate,
            playback_queue: config.audio.playback_queue,
            tool_timeout: config.session.tool_timeout,
            shutdown_grace: config.session.shutdown_grace,
        }
    }

    /// The setup message for a session advertising `registry`
    #[must_use]
    pub fn setup(&self, registry: &ToolRegistry) -> SessionSetup {
        let tools = registry.declarations();
        SessionSetup {
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: system_instruction(&self.system_prompt, &tools, self.google_search),
            tools,
            google_search: self.google_search,
            send_sample_rate: self.send_sample_rate,
        }
    }
}

/// Skips audio queued before the last interruption
#[derive(Default)]
struct PlaybackControl {
    generation: AtomicU64,
    interrupted: Notify,
}

impl PlaybackControl {
    fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn interrupt(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.interrupted.notify_one();
    }
}

struct Chunk {
    generation: u64,
    pcm: Vec<u8>,
}

/// A single live conversation with the model
///
/// Created idle; [`Session::run`] connects, runs capture, provider reader,
/// playback and text input concurrently, and returns once the cancellation
/// token fires or the provider fails.
pub struct Session {
    connector: Arc<dyn ProviderConnector>,
    registry: ToolRegistry,
    options: SessionOptions,
    launcher: Option<Arc<McpLauncher>>,
    transcript: Option<Arc<TranscriptLog>>,
    recording: Arc<RecordingState>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
}

impl Session {
    #[must_use]
    pub fn new(
        connector: Arc<dyn ProviderConnector>,
        registry: ToolRegistry,
        options: SessionOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            connector,
            registry,
            options,
            launcher: None,
            transcript: None,
            recording: Arc::new(RecordingState::new()),
            cancel: CancellationToken::new(),
            state: Arc::new(state),
        }
    }

    /// Prune tools of MCP servers that die, and stop them on close
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<McpLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    #[must_use]
    pub fn with_transcript(mut self, transcript: Arc<TranscriptLog>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    #[must_use]
    pub fn with_recording(mut self, recording: Arc<RecordingState>) -> Self {
        self.recording = recording;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Observe state transitions
    #[must_use]
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn recording(&self) -> Arc<RecordingState> {
        Arc::clone(&self.recording)
    }

    /// Cancelling this token closes the session
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until shutdown is requested or the provider fails
    ///
    /// Lines received on `text` are sent as complete user turns.
    ///
    /// # Errors
    ///
    /// Returns `Provider` if the session cannot be opened or fails while
    /// running
    #[allow(clippy::too_many_lines)]
    pub async fn run(
        self,
        source: Box<dyn FrameSource>,
        sink: Box<dyn AudioSink>,
        text: Option<mpsc::Receiver<String>>,
    ) -> Result<()> {
        let Self {
            connector,
            registry,
            options,
            launcher,
            transcript,
            recording,
            cancel,
            state,
        } = self;

        state.send_replace(SessionState::Connecting);

        let setup = options.setup(&registry);

        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = connector.connect(&setup) => Some(result),
        };

        let (provider, stream) = match connected {
            Some(Ok(pair)) => pair,
            Some(Err(e)) => {
                tracing::error!(error = %e, "failed to open provider session");
                state.send_replace(SessionState::Closing);
                if let Some(launcher) = &launcher {
                    launcher.shutdown(options.shutdown_grace).await;
                }
                state.send_replace(SessionState::Terminated);
                return Err(provider_error(e));
            }
            None => {
                state.send_replace(SessionState::Terminated);
                return Ok(());
            }
        };

        state.send_replace(SessionState::Active);
        tracing::info!(tools = setup.tools.len(), "session active");

        let control = Arc::new(PlaybackControl::default());
        let (playback_tx, playback_rx) = mpsc::channel(options.playback_queue.max(1));

        let mut tasks = vec![
            spawn_task(
                "capture",
                &cancel,
                capture_loop(source, Arc::clone(&provider), recording, cancel.clone()),
            ),
            spawn_task(
                "reader",
                &cancel,
                Reader {
                    stream,
                    provider: Arc::clone(&provider),
                    registry,
                    launcher: launcher.clone(),
                    transcript: transcript.clone(),
                    playback: playback_tx,
                    control: Arc::clone(&control),
                    state: Arc::clone(&state),
                    tool_timeout: options.tool_timeout,
                    user_turn: String::new(),
                    model_turn: String::new(),
                }
                .run(cancel.clone()),
            ),
            spawn_task(
                "playback",
                &cancel,
                playback_loop(sink, playback_rx, control, Arc::clone(&state), cancel.clone()),
            ),
        ];
        if let Some(lines) = text {
            tasks.push(spawn_task(
                "text",
                &cancel,
                text_loop(lines, Arc::clone(&provider), transcript.clone(), cancel.clone()),
            ));
        }

        cancel.cancelled().await;
        state.send_replace(SessionState::Closing);
        tracing::info!("closing session");

        let failure = close(
            tasks,
            provider.as_ref(),
            transcript.as_deref(),
            launcher.as_deref(),
            options.shutdown_grace,
        )
        .await;

        state.send_replace(SessionState::Terminated);
        tracing::info!("session terminated");

        match failure {
            Some(e) => Err(provider_error(e)),
            None => Ok(()),
        }
    }
}

/// Await every task within `grace`, then release the session's resources
///
/// Returns the first task failure.
async fn close(
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
    provider: &dyn ProviderSink,
    transcript: Option<&TranscriptLog>,
    launcher: Option<&McpLauncher>,
    grace: Duration,
) -> Option<Error> {
    let deadline = Instant::now() + grace;
    let mut failure = None;
    for (name, mut handle) in tasks {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                failure.get_or_insert(e);
            }
            Ok(Err(e)) => tracing::warn!(task = name, error = %e, "session task did not complete"),
            Err(_) => {
                tracing::warn!(task = name, "session task overran shutdown grace, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    match tokio::time::timeout_at(deadline, provider.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "provider close failed"),
        Err(_) => tracing::debug!("provider close timed out"),
    }

    if let Some(Err(e)) = transcript.map(TranscriptLog::flush) {
        tracing::warn!(error = %e, "failed to flush transcript");
    }

    if let Some(launcher) = launcher {
        launcher.shutdown(grace).await;
    }
    failure
}

fn provider_error(error: Error) -> Error {
    if error.is_fatal() {
        error
    } else {
        Error::Provider(error.to_string())
    }
}

/// Spawn a session task; a failing or panicking task closes the session
fn spawn_task<F>(
    name: &'static str,
    cancel: &CancellationToken,
    task: F,
) -> (&'static str, JoinHandle<Result<()>>)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        let result = AssertUnwindSafe(task)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::Session(format!("{name} task panicked"))));
        if let Err(e) = &result {
            tracing::error!(task = name, error = %e, "session task failed");
            cancel.cancel();
        }
        result
    });
    (name, handle)
}

fn record(transcript: Option<&TranscriptLog>, speaker: Speaker, text: &str) {
    if let Some(Err(e)) = transcript.map(|log| log.append(speaker, text)) {
        tracing::warn!(error = %e, "failed to write transcript");
    }
}

/// Open or close the user's turn to match the gate
async fn sync_turn(
    turn_open: &mut bool,
    recording: &RecordingState,
    provider: &dyn ProviderSink,
) -> Result<()> {
    let armed = recording.is_armed();
    if armed && !*turn_open {
        provider.send(ClientMessage::ActivityStart).await?;
        *turn_open = true;
        tracing::info!("recording");
    } else if !armed && *turn_open {
        provider.send(ClientMessage::ActivityEnd).await?;
        *turn_open = false;
        tracing::info!("recording stopped");
    }
    Ok(())
}

async fn capture_loop(
    mut source: Box<dyn FrameSource>,
    provider: Arc<dyn ProviderSink>,
    recording: Arc<RecordingState>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut turn_open = false;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = recording.changed() => {
                sync_turn(&mut turn_open, &recording, provider.as_ref()).await?;
            }
            frame = source.next_frame() => {
                let frame = match frame {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        tracing::warn!("microphone stream ended");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "microphone failed");
                        break;
                    }
                };

                sync_turn(&mut turn_open, &recording, provider.as_ref()).await?;
                if turn_open {
                    provider.send(ClientMessage::Audio(frame)).await?;
                }
            }
        }
    }

    // The microphone went away mid-turn; the provider still needs the end marker
    if turn_open && !cancel.is_cancelled() {
        provider.send(ClientMessage::ActivityEnd).await?;
        tracing::info!("recording stopped");
    }
    Ok(())
}

/// Consumes provider events; owns the registry so MCP pruning needs no lock
struct Reader {
    stream: Box<dyn ProviderStream>,
    provider: Arc<dyn ProviderSink>,
    registry: ToolRegistry,
    launcher: Option<Arc<McpLauncher>>,
    transcript: Option<Arc<TranscriptLog>>,
    playback: mpsc::Sender<Chunk>,
    control: Arc<PlaybackControl>,
    state: Arc<watch::Sender<SessionState>>,
    tool_timeout: Duration,
    user_turn: String,
    model_turn: String,
}

impl Reader {
    async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = self.stream.next_event() => event?,
            };

            let Some(event) = event else {
                self.finish_turn();
                return Err(Error::Provider("session closed by server".to_string()));
            };

            match event {
                ServerEvent::SetupComplete => {}
                ServerEvent::Audio(pcm) => {
                    let chunk = Chunk {
                        generation: self.control.current(),
                        pcm,
                    };
                    // Waits when the queue is full
                    let sent = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        sent = self.playback.send(chunk) => sent,
                    };
                    if sent.is_err() {
                        break;
                    }
                }
                // Spoken replies arrive as transcription; text parts would repeat it
                ServerEvent::Text(text) => tracing::debug!(text = %text, "model text part"),
                ServerEvent::OutputTranscription(text) => {
                    echo(&text);
                    self.model_turn.push_str(&text);
                }
                ServerEvent::InputTranscription(text) => self.user_turn.push_str(&text),
                ServerEvent::ToolCalls(calls) => self.dispatch_batch(calls).await?,
                ServerEvent::ToolCallCancellation(ids) => {
                    tracing::info!(ids = ?ids, "model cancelled tool calls");
                }
                ServerEvent::TurnComplete => self.finish_turn(),
                ServerEvent::Interrupted => {
                    tracing::info!("model interrupted");
                    self.control.interrupt();
                }
                ServerEvent::GoAway { time_left } => {
                    tracing::warn!(time_left = ?time_left, "provider will close the session soon");
                }
            }
        }

        self.finish_turn();
        Ok(())
    }

    fn finish_turn(&mut self) {
        let transcript = self.transcript.as_deref();
        if !self.user_turn.is_empty() {
            record(transcript, Speaker::User, &self.user_turn);
            self.user_turn.clear();
        }
        if !self.model_turn.is_empty() {
            echo("\n");
            record(transcript, Speaker::Roomey, &self.model_turn);
            self.model_turn.clear();
        }
    }

    /// Answer one batch: serial dispatch, one response carrying every id
    async fn dispatch_batch(&mut self, calls: Vec<ToolCallRequest>) -> Result<()> {
        transition(
            &self.state,
            &[SessionState::Active, SessionState::AudioPlayback],
            SessionState::ToolDispatch,
        );

        let mut responses = Vec::with_capacity(calls.len());
        for call in calls {
            let result = dispatch(&self.registry, &call, self.tool_timeout).await;
            record(
                self.transcript.as_deref(),
                Speaker::Tool,
                &format!("{} ({:?}): {}", call.name, result.status, result.message),
            );
            responses.push(ToolResponse {
                id: call.id,
                name: call.name,
                result,
            });
        }

        tracing::debug!(results = responses.len(), "sending tool response");
        self.provider
            .send(ClientMessage::ToolResponses(responses))
            .await?;

        if let Some(launcher) = &self.launcher {
            launcher.prune_dead(&mut self.registry);
        }

        transition(&self.state, &[SessionState::ToolDispatch], SessionState::Active);
        Ok(())
    }
}

async fn playback_loop(
    mut sink: Box<dyn AudioSink>,
    mut queue: mpsc::Receiver<Chunk>,
    control: Arc<PlaybackControl>,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = control.interrupted.notified() => {
                sink.clear();
                continue;
            }
            chunk = queue.recv() => chunk,
        };
        let Some(chunk) = chunk else { break };

        if chunk.generation != control.current() {
            continue;
        }

        transition(&state, &[SessionState::Active], SessionState::AudioPlayback);
        if let Err(e) = sink.play(chunk.pcm).await {
            tracing::warn!(error = %e, "playback failed");
        }
        if queue.is_empty() {
            transition(&state, &[SessionState::AudioPlayback], SessionState::Active);
        }
    }
    Ok(())
}

async fn text_loop(
    mut lines: mpsc::Receiver<String>,
    provider: Arc<dyn ProviderSink>,
    transcript: Option<Arc<TranscriptLog>>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        // Input closed; the session carries on with voice only
        let Some(line) = line else { break };

        let text = line.trim();
        // The provider rejects empty turns
        let turn = if text.is_empty() { "." } else { text };
        provider.send(ClientMessage::Text(turn.to_string())).await?;
        record(transcript.as_deref(), Speaker::User, text);
    }
    Ok(())
}
