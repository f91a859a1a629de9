//! Keyboard control in raw terminal mode
//!
//! The toggle key arms and disarms recording, `q`, `Esc` or Ctrl-C quit,
//! and `/` opens a line of typed input that Enter sends and Esc discards.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::session::RecordingState;

static RAW_MODE: AtomicBool = AtomicBool::new(false);

/// Whether the terminal is currently in raw mode
#[must_use]
pub fn raw_mode_active() -> bool {
    RAW_MODE.load(Ordering::SeqCst)
}

/// Writer that emits `\r\n` line endings while raw mode is on
pub struct Crlf<W>(pub W);

impl<W: Write> Write for Crlf<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !raw_mode_active() {
            return self.0.write(buf);
        }
        for (i, line) in buf.split(|&b| b == b'\n').enumerate() {
            if i > 0 {
                self.0.write_all(b"\r\n")?;
            }
            self.0.write_all(line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Print model or UI text to stdout
pub fn echo(text: &str) {
    let mut out = Crlf(io::stdout().lock());
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

/// What a key press asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    ToggleRecording,
    Quit,
    LineStarted,
    Typed(char),
    Erased,
    LineCancelled,
    Submit(String),
}

/// Maps key presses to actions, tracking the typed-line mode
#[derive(Debug)]
pub struct KeyInterpreter {
    toggle: char,
    line: Option<String>,
}

impl KeyInterpreter {
    #[must_use]
    pub const fn new(toggle: char) -> Self {
        Self { toggle, line: None }
    }

    #[must_use]
    pub const fn in_line(&self) -> bool {
        self.line.is_some()
    }

    pub fn handle(&mut self, key: &KeyEvent) -> Option<KeyAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Some(KeyAction::Quit);
        }

        if let Some(line) = self.line.as_mut() {
            return match key.code {
                KeyCode::Enter => {
                    let text = std::mem::take(line);
                    self.line = None;
                    Some(KeyAction::Submit(text))
                }
                KeyCode::Esc => {
                    self.line = None;
                    Some(KeyAction::LineCancelled)
                }
                KeyCode::Backspace => line.pop().map(|_| KeyAction::Erased),
                KeyCode::Char(c) => {
                    line.push(c);
                    Some(KeyAction::Typed(c))
                }
                _ => None,
            };
        }

        match key.code {
            KeyCode::Char(c) if c.eq_ignore_ascii_case(&self.toggle) => {
                Some(KeyAction::ToggleRecording)
            }
            KeyCode::Char('/') => {
                self.line = Some(String::new());
                Some(KeyAction::LineStarted)
            }
            KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
            _ => None,
        }
    }
}

/// Reads keys on a blocking thread while the terminal is in raw mode
///
/// Dropping the listener stops the thread and restores the terminal.
pub struct KeyListener {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl KeyListener {
    /// Enter raw mode and start listening
    ///
    /// # Errors
    ///
    /// Returns error if the terminal cannot enter raw mode
    pub fn spawn(
        toggle: char,
        recording: Arc<RecordingState>,
        lines: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        terminal::enable_raw_mode()?;
        RAW_MODE.store(true, Ordering::SeqCst);

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let spawned = std::thread::Builder::new()
            .name("roomey-keys".to_string())
            .spawn(move || {
                let mut keys = KeyInterpreter::new(toggle);
                while !thread_stop.load(Ordering::SeqCst) && !cancel.is_cancelled() {
                    match event::poll(Duration::from_millis(100)) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "key input failed");
                            break;
                        }
                    }

                    let key = match event::read() {
                        Ok(Event::Key(key)) => key,
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "key input failed");
                            break;
                        }
                    };

                    match keys.handle(&key) {
                        Some(KeyAction::ToggleRecording) => {
                            let armed = recording.toggle();
                            echo(if armed { "\n[listening]\n" } else { "\n[sent]\n" });
                        }
                        Some(KeyAction::Quit) => {
                            tracing::info!("shutdown requested");
                            cancel.cancel();
                        }
                        Some(KeyAction::LineStarted) => echo("\n> "),
                        Some(KeyAction::Typed(c)) => echo(c.encode_utf8(&mut [0; 4])),
                        Some(KeyAction::Erased) => echo("\u{8} \u{8}"),
                        Some(KeyAction::LineCancelled) => echo(" (discarded)\n"),
                        Some(KeyAction::Submit(line)) => {
                            echo("\n");
                            if lines.blocking_send(line).is_err() {
                                tracing::debug!("text input closed");
                            }
                        }
                        None => {}
                    }
                }
            });

        match spawned {
            Ok(thread) => Ok(Self {
                stop,
                thread: Some(thread),
            }),
            Err(e) => {
                restore_terminal();
                Err(e.into())
            }
        }
    }
}

fn restore_terminal() {
    RAW_MODE.store(false, Ordering::SeqCst);
    if let Err(e) = terminal::disable_raw_mode() {
        tracing::warn!(error = %e, "failed to restore terminal");
    }
}

impl Drop for KeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        restore_terminal();
    }
}
