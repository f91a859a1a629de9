//! Session orchestrator integration tests
//!
//! Drive a full session against a scripted provider and fake audio devices

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;

use roomey::audio::{NoInput, NoOutput};
use roomey::provider::{ClientMessage, ServerEvent};
use roomey::tools::{ToolRegistry, ToolStatus};
use roomey::transcript::TranscriptLog;
use roomey::{Error, Session, SessionOptions, SessionState};

mod common;

use common::{
    EchoTool, FailingTool, FiniteSource, PanickingSink, PanickingTool, RecordingSink, SlowTool,
    StuckSink, TickingSource, WAIT, call, count, mock_provider, refusing_provider,
};

fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool::declaration(), Arc::new(EchoTool)).unwrap();
    registry.register(FailingTool::declaration(), Arc::new(FailingTool)).unwrap();
    registry
        .register(SlowTool::declaration(), Arc::new(SlowTool(Duration::from_millis(300))))
        .unwrap();
    registry
}

fn options() -> SessionOptions {
    SessionOptions {
        system_prompt: "You are a test.".to_string(),
        tool_timeout: Duration::from_secs(2),
        shutdown_grace: Duration::from_millis(500),
        playback_queue: 4,
        ..SessionOptions::default()
    }
}

async fn wait_state(session_state: &mut tokio::sync::watch::Receiver<SessionState>, state: SessionState) {
    tokio::time::timeout(WAIT, session_state.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("session dropped state channel");
}

#[tokio::test]
async fn test_setup_advertises_registry_tools() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let cancel = session.cancel_token();
    let mut state = session.state();

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(NoOutput), None));
    wait_state(&mut state, SessionState::Active).await;

    let setups = provider.setups();
    assert_eq!(setups.len(), 1);
    let names: Vec<&str> = setups[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["echo", "explode", "slow"]);
    assert!(setups[0].system_instruction.starts_with("You are a test."));
    assert!(setups[0].system_instruction.contains("- echo: Echo the arguments back"));

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unknown_tool_yields_error_and_session_continues() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let cancel = session.cancel_token();

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(NoOutput), None));

    provider.emit(ServerEvent::ToolCalls(vec![call("c1", "missing_tool", json!({}))]));
    let response = provider.next_tool_response(0).await;
    assert_eq!(response.len(), 1);
    assert_eq!(response[0].id, "c1");
    assert_eq!(response[0].result.status, ToolStatus::Error);
    assert_eq!(response[0].result.message, "Unknown function: missing_tool");

    // Still serving calls
    provider.emit(ServerEvent::ToolCalls(vec![call("c2", "echo", json!({ "text": "hi" }))]));
    let response = provider.next_tool_response(1).await;
    assert_eq!(response[0].id, "c2");
    assert_eq!(response[0].result.status, ToolStatus::Success);
    assert_eq!(response[0].result.message, "hi");

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handler_error_does_not_end_session() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let cancel = session.cancel_token();
    let state = session.state();
    let (text_tx, text_rx) = mpsc::channel(4);

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(NoOutput), Some(text_rx)));

    provider.emit(ServerEvent::ToolCalls(vec![call("x", "explode", json!(null))]));
    let response = provider.next_tool_response(0).await;
    assert_eq!(response[0].result.status, ToolStatus::Error);
    assert_eq!(response[0].result.message, "boom");

    text_tx.send("still there?".to_string()).await.unwrap();
    provider
        .wait_for(|sent| sent.contains(&ClientMessage::Text("still there?".to_string())))
        .await;
    assert_eq!(*state.borrow(), SessionState::Active);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_batch_preserves_ids_in_order() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let cancel = session.cancel_token();

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(NoOutput), None));

    provider.emit(ServerEvent::ToolCalls(vec![
        call("first", "echo", json!({ "text": "a" })),
        call("second", "nope", json!({})),
        call("third", "echo", json!({ "text": "c" })),
    ]));

    let response = provider.next_tool_response(0).await;
    let ids: Vec<&str> = response.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["first", "second", "third"]);
    assert_eq!(response[1].name, "nope");
    assert_eq!(response[1].result.status, ToolStatus::Error);

    // One response for the whole batch
    assert_eq!(common::tool_responses(&provider.sent()).len(), 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_state_passes_through_tool_dispatch() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let cancel = session.cancel_token();
    let mut state = session.state();

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(NoOutput), None));
    wait_state(&mut state, SessionState::Active).await;

    provider.emit(ServerEvent::ToolCalls(vec![call("s", "slow", json!({}))]));
    wait_state(&mut state, SessionState::ToolDispatch).await;
    provider.next_tool_response(0).await;
    wait_state(&mut state, SessionState::Active).await;

    cancel.cancel();
    run.await.unwrap().unwrap();
    assert_eq!(*state.borrow(), SessionState::Terminated);
}

#[tokio::test]
async fn test_audio_played_in_arrival_order() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let cancel = session.cancel_token();
    let (sink, played) = RecordingSink::new(Duration::from_millis(20));

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(sink), None));

    // More chunks than the queue holds: the reader waits instead of dropping
    for i in 0..10u8 {
        provider.emit(ServerEvent::Audio(vec![i, i]));
    }

    let deadline = Instant::now() + WAIT;
    while played.lock().unwrap().len() < 10 {
        assert!(Instant::now() < deadline, "playback did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let played: Vec<u8> = played.lock().unwrap().iter().map(|c| c[0]).collect();
    assert_eq!(played, (0..10).collect::<Vec<u8>>());

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_toggle_off_sends_single_activity_end() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let cancel = session.cancel_token();
    let recording = session.recording();

    let run = tokio::spawn(session.run(Box::new(TickingSource), Box::new(NoOutput), None));

    // Nothing is forwarded while disarmed
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(provider.sent().is_empty());

    recording.set(true);
    provider
        .wait_for(|sent| count(sent, |m| matches!(m, ClientMessage::Audio(_))) >= 3)
        .await;

    recording.set(false);
    provider
        .wait_for(|sent| sent.contains(&ClientMessage::ActivityEnd))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = provider.sent();
    assert_eq!(sent[0], ClientMessage::ActivityStart);
    assert_eq!(count(&sent, |m| *m == ClientMessage::ActivityStart), 1);
    assert_eq!(count(&sent, |m| *m == ClientMessage::ActivityEnd), 1);

    // No audio after the turn closed
    let end = sent.iter().position(|m| *m == ClientMessage::ActivityEnd).unwrap();
    assert_eq!(end, sent.len() - 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_typed_text_reaches_provider() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let cancel = session.cancel_token();
    let (text_tx, text_rx) = mpsc::channel(4);

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(NoOutput), Some(text_rx)));

    text_tx.send("  what's on today?  ".to_string()).await.unwrap();
    text_tx.send(String::new()).await.unwrap();

    let sent = provider
        .wait_for(|sent| count(sent, |m| matches!(m, ClientMessage::Text(_))) == 2)
        .await;
    assert_eq!(sent[0], ClientMessage::Text("what's on today?".to_string()));
    assert_eq!(sent[1], ClientMessage::Text(".".to_string()));

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_terminates_within_grace() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let cancel = session.cancel_token();
    let mut state = session.state();

    let run = tokio::spawn(session.run(Box::new(TickingSource), Box::new(StuckSink), None));
    wait_state(&mut state, SessionState::Active).await;

    // Playback wedges on the first chunk
    provider.emit(ServerEvent::Audio(vec![0, 0]));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    cancel.cancel();
    run.await.unwrap().unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(*state.borrow(), SessionState::Terminated);
    assert!(provider.closed());
}

#[tokio::test]
async fn test_provider_failure_returns_error() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let mut state = session.state();

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(NoOutput), None));
    wait_state(&mut state, SessionState::Active).await;

    provider.fail("socket reset");
    let err = tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap_err();

    assert!(matches!(err, Error::Provider(ref msg) if msg.contains("socket reset")));
    assert_eq!(*state.borrow(), SessionState::Terminated);
}

#[tokio::test]
async fn test_server_close_is_provider_failure() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let mut state = session.state();

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(NoOutput), None));
    wait_state(&mut state, SessionState::Active).await;

    drop(provider);
    let err = tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, Error::Provider(_)));
}

#[tokio::test]
async fn test_connect_failure_returns_error() {
    let (connector, _provider) = refusing_provider();
    let session = Session::new(connector, registry(), options());
    let state = session.state();

    let err = session
        .run(Box::new(NoInput), Box::new(NoOutput), None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Provider(ref msg) if msg.contains("connection refused")));
    assert_eq!(*state.borrow(), SessionState::Terminated);
}

#[tokio::test]
async fn test_transcript_records_turns() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = Arc::new(TranscriptLog::new(dir.path()));

    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options()).with_transcript(Arc::clone(&transcript));
    let cancel = session.cancel_token();
    let (text_tx, text_rx) = mpsc::channel(4);

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(NoOutput), Some(text_rx)));

    text_tx.send("say hello".to_string()).await.unwrap();
    provider
        .wait_for(|sent| sent.contains(&ClientMessage::Text("say hello".to_string())))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    provider.emit(ServerEvent::ToolCalls(vec![call("t1", "echo", json!({ "text": "ping" }))]));
    provider.next_tool_response(0).await;

    provider.emit(ServerEvent::OutputTranscription("Hello ".to_string()));
    provider.emit(ServerEvent::OutputTranscription("there.".to_string()));
    provider.emit(ServerEvent::TurnComplete);
    tokio::time::sleep(Duration::from_millis(100)).await;

    cancel.cancel();
    run.await.unwrap().unwrap();

    let path = transcript.path_for(chrono::Local::now().date_naive());
    let contents = std::fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(
        lines,
        ["User: say hello", "Tool: echo (Success): ping", "Roomey: Hello there."]
    );
}

#[tokio::test]
async fn test_panicking_tool_yields_error_and_session_continues() {
    let mut registry = registry();
    registry.register(PanickingTool::declaration(), Arc::new(PanickingTool)).unwrap();

    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry, options());
    let cancel = session.cancel_token();
    let mut state = session.state();

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(NoOutput), None));

    provider.emit(ServerEvent::ToolCalls(vec![
        call("p1", "crash", json!({})),
        call("p2", "echo", json!({ "text": "after" })),
    ]));
    let response = provider.next_tool_response(0).await;
    assert_eq!(response.len(), 2);
    assert_eq!(response[0].id, "p1");
    assert_eq!(response[0].result.status, ToolStatus::Error);
    assert_eq!(response[0].result.message, "tool crash panicked");
    assert_eq!(response[1].result.message, "after");

    // Leaves tool dispatch and keeps serving calls
    wait_state(&mut state, SessionState::Active).await;
    provider.emit(ServerEvent::ToolCalls(vec![call("p3", "echo", json!({ "text": "again" }))]));
    let response = provider.next_tool_response(1).await;
    assert_eq!(response[0].id, "p3");
    assert_eq!(response[0].result.status, ToolStatus::Success);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_panicking_task_closes_session() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let state = session.state();

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(PanickingSink), None));
    provider.emit(ServerEvent::Audio(vec![1, 2]));

    let err = tokio::time::timeout(WAIT, run)
        .await
        .expect("session did not close")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, Error::Session(ref msg) if msg.contains("playback")));
    assert_eq!(*state.borrow(), SessionState::Terminated);
    assert!(provider.closed());
}

#[tokio::test]
async fn test_microphone_end_closes_open_turn() {
    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options());
    let cancel = session.cancel_token();
    session.recording().set(true);

    let run = tokio::spawn(session.run(Box::new(FiniteSource(3)), Box::new(NoOutput), None));

    let sent = provider
        .wait_for(|sent| sent.contains(&ClientMessage::ActivityEnd))
        .await;
    assert_eq!(sent[0], ClientMessage::ActivityStart);
    assert_eq!(count(&sent, |m| matches!(m, ClientMessage::Audio(_))), 3);
    assert_eq!(sent.last(), Some(&ClientMessage::ActivityEnd));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count(&provider.sent(), |m| *m == ClientMessage::ActivityEnd), 1);

    cancel.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_model_text_is_recorded_once() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = Arc::new(TranscriptLog::new(dir.path()));

    let (connector, provider) = mock_provider();
    let session = Session::new(connector, registry(), options()).with_transcript(Arc::clone(&transcript));
    let cancel = session.cancel_token();

    let run = tokio::spawn(session.run(Box::new(NoInput), Box::new(NoOutput), None));

    // The same reply as a text part and as output transcription
    provider.emit(ServerEvent::Text("Hello".to_string()));
    provider.emit(ServerEvent::OutputTranscription("Hello".to_string()));
    provider.emit(ServerEvent::TurnComplete);
    tokio::time::sleep(Duration::from_millis(100)).await;

    cancel.cancel();
    run.await.unwrap().unwrap();

    let path = transcript.path_for(chrono::Local::now().date_naive());
    let contents = std::fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines, ["Roomey: Hello"]);
}
